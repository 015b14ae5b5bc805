use std::io;
use std::path::PathBuf;

/// Failure to read a module image or symbol file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read module image: {0}")]
    Read(#[source] io::Error),
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}
