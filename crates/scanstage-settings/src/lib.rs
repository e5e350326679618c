//! # Scanstage Settings
//!
//! Configuration loading, validation, and persistence. One file carries
//! the tunables of every layer: serial connection, protocol timeouts,
//! axis limits and feed rates, and scan policy.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{SettingsError, SettingsResult};
