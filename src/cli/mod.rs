//! CLI module for the Halldyll hotswap tool.
//!
//! Classification runs offline against a recorded environment snapshot;
//! the CLI never applies changes.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
