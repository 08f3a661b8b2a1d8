//! Command-line surface for the `choir` binary.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use choir_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "choir", about = "Multi-persona conversational service", version)]
pub struct Cli {
    /// Config file path (default: $CHOIR_CONFIG or ./choir.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket server (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective config as TOML.
    Show,
}

/// Load the config: the explicit `--config` path, else `$CHOIR_CONFIG`,
/// else `./choir.toml`. A missing file yields the built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("CHOIR_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("choir.toml"));

    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found — using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path))
}

/// `choir config validate`: print every issue, return overall success.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// `choir config show`: print the effective config.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
