//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::hotswap::HotswapMode;

/// Halldyll hotswap - classify template changes for in-place patching.
#[derive(Parser, Debug)]
#[command(name = "halldyll-hotswap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "HALLDYLL_HOTSWAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a change set against a template and a recorded environment.
    Classify {
        /// New template (JSON or YAML).
        #[arg(short, long)]
        template: PathBuf,

        /// Change set (JSON or YAML).
        #[arg(long)]
        changes: PathBuf,

        /// Environment snapshot (JSON or YAML).
        #[arg(short, long)]
        environment: PathBuf,

        /// Hotswap mode, overriding the configuration.
        #[arg(short, long)]
        mode: Option<HotswapMode>,
    },

    /// Validate the hotswap configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Write a default configuration file.
    Init {
        /// Directory to write to.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classify() {
        let cli = Cli::try_parse_from([
            "halldyll-hotswap",
            "classify",
            "--template",
            "t.json",
            "--changes",
            "c.json",
            "--environment",
            "e.yaml",
            "--mode",
            "hotswap-only",
        ])
        .unwrap();

        match cli.command {
            Commands::Classify { template, mode, .. } => {
                assert_eq!(template, PathBuf::from("t.json"));
                assert_eq!(mode, Some(HotswapMode::HotswapOnly));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let result = Cli::try_parse_from([
            "halldyll-hotswap",
            "classify",
            "--template",
            "t.json",
            "--changes",
            "c.json",
            "--environment",
            "e.yaml",
            "--mode",
            "sometimes",
        ]);
        assert!(result.is_err());
    }
}
