pub mod config;
pub mod error;
pub mod hash;
pub mod path;
pub mod types;

pub use config::Config;
pub use error::ZenError;
pub use types::*;
