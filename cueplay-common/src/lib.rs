//! # cueplay Common Library
//!
//! Shared code for the cueplay crates:
//! - Error type used by configuration loading
//! - Configuration file resolution and TOML loading
//! - Logging (tracing subscriber) setup

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
