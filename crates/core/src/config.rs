//! Engine settings.
//!
//! Settings are a flat JSON object with snake_case keys. Every key is
//! optional; missing keys take the defaults below. Loading rejects unknown
//! keys, ill-typed values, and out-of-range values, naming the offending
//! key in each case.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::codec::CodecConfig;
use crate::queue::{QueueRules, DEFAULT_MAX_SIZE};
use crate::selection::SelectionCycle;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings are not valid JSON: {0}")]
    Syntax(String),

    #[error("Settings must be a JSON object")]
    NotAnObject,

    #[error("Unknown setting '{0}'")]
    UnknownKey(String),

    #[error("Invalid value for setting '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Settings out of range: {}", .0.join(", "))]
    OutOfRange(Vec<String>),
}

/// Typed settings schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Broadcaster login; may hold any number of items.
    pub channel: Option<String>,
    #[validate(range(min = 1))]
    pub max_size: usize,
    #[validate(range(min = 1))]
    pub level_timeout_minutes: Option<i64>,
    /// Policy names cycled round-robin on each "next level" request.
    #[validate(length(min = 1))]
    pub level_selection: Vec<String>,
    pub romhacks_enabled: bool,
    pub max_course_id: Option<u32>,
    pub max_maker_id: Option<u32>,
    #[validate(range(min = 1.0))]
    pub subscriber_weight_multiplier: f64,
    #[validate(range(min = 1))]
    pub wait_tick_seconds: u64,
    #[validate(range(min = 0))]
    pub online_grace_minutes: i64,
    #[validate(range(min = 1))]
    pub presence_timeout_secs: u64,
    pub data_directory: PathBuf,
    pub persistence_enabled: bool,
    pub custom_codes_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel: None,
            max_size: DEFAULT_MAX_SIZE,
            level_timeout_minutes: None,
            level_selection: vec!["next".to_string()],
            romhacks_enabled: false,
            max_course_id: None,
            max_maker_id: None,
            subscriber_weight_multiplier: 1.0,
            wait_tick_seconds: 60,
            online_grace_minutes: 5,
            presence_timeout_secs: 10,
            data_directory: PathBuf::from("data"),
            persistence_enabled: true,
            custom_codes_enabled: false,
        }
    }
}

impl Settings {
    /// Read and check a settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and check settings text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Syntax(e.to_string()))?;
        let serde_json::Value::Object(given) = value else {
            return Err(ConfigError::NotAnObject);
        };

        let defaults = default_object()?;
        if let Some(unknown) = given.keys().find(|key| !defaults.contains_key(*key)) {
            return Err(ConfigError::UnknownKey(unknown.clone()));
        }

        // Try each key on its own over the defaults so the error names it.
        for (key, value) in &given {
            let mut probe = defaults.clone();
            probe.insert(key.clone(), value.clone());
            if let Err(e) = serde_json::from_value::<Settings>(serde_json::Value::Object(probe)) {
                return Err(ConfigError::InvalidValue {
                    key: key.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let settings: Settings = serde_json::from_value(serde_json::Value::Object(given))
            .map_err(|e| ConfigError::Syntax(e.to_string()))?;

        settings.validate().map_err(|errors| {
            let mut fields: Vec<String> = errors
                .field_errors()
                .keys()
                .map(|field| field.to_string())
                .collect();
            fields.sort();
            ConfigError::OutOfRange(fields)
        })?;

        Ok(settings)
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            romhacks_enabled: self.romhacks_enabled,
            max_course_id: self.max_course_id,
            max_maker_id: self.max_maker_id,
        }
    }

    pub fn queue_rules(&self) -> QueueRules {
        QueueRules {
            max_size: self.max_size,
            unlimited_submitter: self.channel.clone(),
            codec: self.codec_config(),
            custom_codes_enabled: self.custom_codes_enabled,
        }
    }

    pub fn selection_cycle(&self) -> SelectionCycle {
        SelectionCycle::from_names(&self.level_selection)
    }

    pub fn level_timeout(&self) -> Option<Duration> {
        self.level_timeout_minutes.map(Duration::minutes)
    }

    pub fn online_grace(&self) -> Duration {
        Duration::minutes(self.online_grace_minutes)
    }

    pub fn wait_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.wait_tick_seconds)
    }

    pub fn presence_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.presence_timeout_secs)
    }
}

fn default_object() -> Result<serde_json::Map<String, serde_json::Value>, ConfigError> {
    match serde_json::to_value(Settings::default()) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject),
        Err(e) => Err(ConfigError::Syntax(e.to_string())),
    }
}
