//! CLI argument definitions and the interactive command grammar.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use xsimple_core::{UnitGranularity, XSimpleConfig};

/// XSimple: a terminal report assistant that streams its answers.
#[derive(Parser, Debug)]
#[command(name = "xsimple", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Delay before each streamed unit, in milliseconds.
    #[arg(long = "delay-ms")]
    pub delay_ms: Option<u64>,

    /// Streamed unit size: char or grapheme.
    #[arg(short = 'g', long = "granularity")]
    pub granularity: Option<UnitGranularity>,

    /// Submit a single query, print the answer and report, then exit.
    #[arg(long = "once", value_name = "QUERY")]
    pub once: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > XSIMPLE_CONFIG env var > ~/.xsimple/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("XSIMPLE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level. Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Apply the streaming overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut XSimpleConfig) {
        if let Some(delay) = self.delay_ms {
            config.stream.unit_delay_ms = delay;
        }
        if let Some(granularity) = self.granularity {
            config.stream.granularity = granularity;
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".xsimple").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".xsimple").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Query(&'a str),
    Cancel,
    Reset,
    Report,
    Quit,
    Help,
    Unknown(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }
        match trimmed {
            "/cancel" => Command::Cancel,
            "/reset" => Command::Reset,
            "/report" => Command::Report,
            "/quit" | "/exit" => Command::Quit,
            "/help" => Command::Help,
            cmd if cmd.starts_with('/') => Command::Unknown(cmd),
            _ => Command::Query(line),
        }
    }
}

pub const HELP: &str = "commands: /cancel  /reset  /report  /help  /quit  (anything else is sent as a query)";
