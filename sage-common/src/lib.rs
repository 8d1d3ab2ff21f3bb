//! Shared infrastructure for the Sage property services
//!
//! Provides the common error type, settings resolution, and SQLite pool
//! initialization used by every service in the workspace.

pub mod config;
pub mod db;
pub mod error;

pub use config::Settings;
pub use error::{Error, Result};
