//! The `cil2cpp` command line front end.
//!
//! ```text
//! cil2cpp -i App.json -i mscorlib.json -o out -t executable -O 1
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cil2cpp::translate::{ModuleKind, ShimRegistry, TranslateError, TranslateOptions, Translator};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    Executable,
    Library,
}

impl From<Kind> for ModuleKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Executable => ModuleKind::Executable,
            Kind::Library => ModuleKind::Library,
        }
    }
}

#[derive(Parser)]
#[command(name = "cil2cpp", version, about = "Translate CIL module images to C++ sources")]
struct Cli {
    /// Module image to translate; repeat for dependencies
    #[arg(short, long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Output source directory
    #[arg(short, long)]
    output: PathBuf,

    /// What the first input is
    #[arg(short = 't', long = "type", value_enum, default_value = "executable")]
    kind: Kind,

    /// Optimization level (0 = none, 1 = IR cleanup passes)
    #[arg(short = 'O', long = "opt-level", default_value = "0", value_parser = clap::value_parser!(u8).range(0..=1))]
    opt_level: u8,

    /// Module that defines primitive types, when none of the inputs is flagged as core library
    #[arg(long = "core-library", default_value = "mscorlib")]
    core_library: String,

    /// Extra JSON shim bodies for externally implemented methods
    #[arg(long)]
    shims: Vec<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG applies otherwise
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn translate(cli: &Cli) -> Result<(), TranslateError> {
    let mut shims = ShimRegistry::default();
    for path in &cli.shims {
        shims.extend_from_path(path)?;
    }

    let options = TranslateOptions {
        kind: cli.kind.into(),
        optimize: cli.opt_level > 0,
        core_library: cli.core_library.clone(),
        ..TranslateOptions::default()
    };
    let mut translator = Translator::with_shims(options, shims);
    let written = translator.run(&cli.inputs, &cli.output)?;
    println!("wrote {} files to {}", written.len(), cli.output.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = translate(&cli) {
        eprintln!("error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}
