pub mod config;
#[cfg(feature = "cli")]
pub mod display;
pub mod error;
pub mod replay;
pub mod rib;
pub mod utils;

pub use config::ServerConfig;
pub use error::{RdeError, Result};
pub use rib::{RibEvent, RIB};
