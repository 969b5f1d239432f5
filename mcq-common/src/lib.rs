//! # MCQ Common Library
//!
//! Shared code for the mcq workspace:
//! - Error type and result alias
//! - TOML bootstrap configuration loading and config-file resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
