mod signature;
mod types;

pub use self::signature::*;
pub use self::types::*;
