//! Command-line interface for storyloom
//!
//! - `args`: clap argument definitions
//! - `run`: entry point and dispatch
//! - `commands`: command implementations

pub mod args;
mod commands;
mod run;


pub use args::{Cli, Commands, ModelArgs, WriteArgs};
pub use run::run;
