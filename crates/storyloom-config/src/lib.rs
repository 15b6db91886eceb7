//! Configuration for storyloom.
//!
//! Hierarchical configuration with discovery and precedence
//! CLI > environment > `.storyloom/config.toml` > built-in defaults.

mod config;

pub use config::*;
