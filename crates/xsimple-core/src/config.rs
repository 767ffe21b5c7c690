use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, XSimpleError};
use crate::types::{CancelPolicy, UnitGranularity};

/// Welcome text shown as the first assistant message of a session.
pub const DEFAULT_GREETING: &str =
    "你好！我是 XSimple 智能助手。我可以帮你生成销售、用户增长或财务报表。请告诉我你的需求。";

/// Top-level configuration for the assistant.
///
/// Loaded from `~/.xsimple/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XSimpleConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl XSimpleConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: XSimpleConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| XSimpleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Incremental delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay before each unit is delivered, in milliseconds.
    pub unit_delay_ms: u64,
    /// Size of one delivered unit.
    pub granularity: UnitGranularity,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            unit_delay_ms: 30,
            granularity: UnitGranularity::Char,
        }
    }
}

/// Conversation log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// First assistant message of a session. Empty disables it.
    pub greeting: String,
    /// Longest accepted query, in characters. Unset means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_query_chars: Option<usize>,
    /// Fate of a cycle's messages when it is cancelled.
    pub cancel_policy: CancelPolicy,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            max_query_chars: None,
            cancel_policy: CancelPolicy::Discard,
        }
    }
}

/// Domain event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the broadcast channel; slow subscribers lag past this.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}
