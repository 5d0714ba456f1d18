pub mod artifact;
pub mod backend;
pub mod config;
pub mod error;
pub mod log_sanitize;
pub mod logging;
pub mod registry;
pub mod runner;
pub mod selection;
pub mod session;
pub mod status;
pub mod ui;

pub use error::{Error, Result};
