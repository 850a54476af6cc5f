pub mod config;
pub mod error;
pub mod names;
pub mod types;

pub use config::Config;
pub use error::{DeedScoutError, GraphConfigurationError};
pub use names::*;
pub use types::*;
