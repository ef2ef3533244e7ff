//! Core engine types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod config;
pub mod cancel;
pub mod wire;

pub use types::*;
pub use error::Error;
pub use config::{LodConfig, ThreadConfig};
pub use cancel::CancelToken;
