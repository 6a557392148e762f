//! Halldyll hotswap CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use halldyll_hotswap::cli::{Cli, Commands, OutputFormatter};
use halldyll_hotswap::config::{
    ConfigParser, ConfigValidator, DEFAULT_CONFIG_FILES, HotswapConfig, find_config_file,
};
use halldyll_hotswap::error::{ConfigError, HotswapError, Result};
use halldyll_hotswap::hotswap::{HotswapMode, HotswapOrchestrator};
use halldyll_hotswap::services::EnvironmentSnapshot;
use halldyll_hotswap::template::{ChangeSet, Template, TemplateEvaluator, load_document};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Classify {
            template,
            changes,
            environment,
            mode,
        } => {
            cmd_classify(
                cli.config.as_deref(),
                &template,
                &changes,
                &environment,
                mode,
                &formatter,
            )
            .await
        }
        Commands::Validate { warnings } => cmd_validate(cli.config.as_deref(), warnings, &formatter),
        Commands::Init { path, force } => cmd_init(&path, force),
    }
}

/// Classifies a change set offline and prints the report.
async fn cmd_classify(
    config_path: Option<&Path>,
    template_path: &Path,
    changes_path: &Path,
    environment_path: &Path,
    mode: Option<HotswapMode>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mode = mode.unwrap_or(config.mode);

    let template: Template = load_document(template_path, "template")?;
    let change_set: ChangeSet = load_document(changes_path, "change set")?;
    let context = EnvironmentSnapshot::load(environment_path)?.into_context();
    info!(
        "Classifying {} resource changes in {} mode",
        change_set.resource_changes.len(),
        mode
    );

    let evaluator = Arc::new(TemplateEvaluator::new(template, context));
    let orchestrator = HotswapOrchestrator::new(&config);
    let report = orchestrator.plan(mode, &change_set, &evaluator).await?;

    write_stdout(&formatter.format_report(&report))
}

/// Validates the configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file(".")?,
    };
    info!("Validating configuration: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(Some(&config_file))?;

    let result = ConfigValidator::new().validate(&config)?;
    write_stdout(&formatter.format_validation(&result, show_warnings))
}

/// Writes a default configuration file.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_FILES[0]);

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let content = serde_yaml::to_string(&HotswapConfig::default()).map_err(|e| {
        HotswapError::Config(ConfigError::ParseError {
            message: format!("Failed to render default configuration: {e}"),
            location: None,
        })
    })?;
    std::fs::write(&config_path, content)?;
    eprintln!("Created: {}", config_path.display());

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads and validates the configuration, falling back to defaults when no
/// file is given or found.
fn load_config(config_path: Option<&Path>) -> Result<HotswapConfig> {
    let config_file: Option<PathBuf> = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(".").ok(),
    };

    let parser = config_file
        .as_deref()
        .map_or_else(ConfigParser::new, parser_for);
    parser.load_dotenv()?;

    let config = match config_file.as_deref() {
        Some(file) => {
            debug!("Loading configuration from: {}", file.display());
            parser.load_with_env(Some(file))?
        }
        None => {
            debug!("No configuration file found, using defaults");
            parser.load_with_env(None)?
        }
    };

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

fn write_stdout(content: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{content}")?;
    Ok(())
}
