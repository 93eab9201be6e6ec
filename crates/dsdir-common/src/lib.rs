//! DSDir Common - Shared types and utilities
//!
//! This crate provides the dataset metadata types, error definitions and
//! node configuration used across all directory components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
