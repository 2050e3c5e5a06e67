//! Already-resolved configuration consumed by the pipeline
//!
//! Loading configuration files is the host's job. The pipeline only sees
//! string dictionaries (one per sink) and the small structs below, all of
//! which deserialize with serde.

use super::error::{LogError, Result};
use super::overflow_policy::OverflowPolicy;
use super::severity::Threshold;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;

/// Case-insensitive option dictionary for one sink instance.
///
/// # Example
///
/// ```
/// use sourcelog::SinkConfig;
///
/// let config = SinkConfig::new("main")
///     .with("Type", "file")
///     .with("MAXFILESIZE", "1024");
/// assert_eq!(config.get("maxFileSize"), Some("1024"));
/// assert!(config.is_async());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkConfig {
    values: HashMap<String, String>,
}

impl SinkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self::default().with("Name", name)
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key, value);
        }
        config
    }

    #[must_use]
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.values
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Instance name, used as the component in error reports
    pub fn name(&self) -> &str {
        self.get("Name").unwrap_or("unnamed")
    }

    pub fn sink_type(&self) -> Option<&str> {
        self.get("Type")
    }

    /// Value of a required, non-empty key
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| LogError::config(self.name(), format!("missing required key '{}'", key)))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                _ => Err(self.invalid(key, v)),
            },
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(v) => v.parse().map_err(|_| self.invalid(key, v)),
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(v) => v.parse().map_err(|_| self.invalid(key, v)),
        }
    }

    pub fn get_duration_secs(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| self.invalid(key, v)),
        }
    }

    /// Comma or semicolon separated list, empty entries removed
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split([',', ';'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_async(&self) -> bool {
        self.get_bool("Async", true).unwrap_or(true)
    }

    pub fn format_template(&self) -> Option<&str> {
        self.get("Format").filter(|f| !f.trim().is_empty())
    }

    /// Per-sink threshold applied after source gating
    pub fn filter(&self) -> Result<Option<Threshold>> {
        match self.get("Filter").map(str::trim) {
            None | Some("") => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|e: String| LogError::config(self.name(), e)),
        }
    }

    /// Maximum queued items, 0 for unbounded
    pub fn max_queue(&self) -> Result<usize> {
        self.get_usize("MaxQueue", 0)
    }

    pub fn overflow_policy(&self) -> Result<OverflowPolicy> {
        match self.get("OverflowPolicy").map(str::trim) {
            None | Some("") => Ok(OverflowPolicy::default()),
            Some(v) => v.parse().map_err(|e: String| LogError::config(self.name(), e)),
        }
    }

    pub fn close_timeout(&self) -> Result<Duration> {
        self.get_duration_secs("CloseTimeout", super::async_writer::DEFAULT_CLOSE_TIMEOUT)
    }

    fn invalid(&self, key: &str, value: &str) -> LogError {
        LogError::config(
            self.name(),
            format!("invalid value '{}' for key '{}'", value, key),
        )
    }
}

impl<'de> Deserialize<'de> for SinkConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = HashMap::<String, ConfigValue>::deserialize(deserializer)?;
        Ok(SinkConfig::from_pairs(
            raw.into_iter().map(|(k, v)| (k, v.into_string())),
        ))
    }
}

// Scalars are accepted in any JSON shape and stored as text
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ConfigValue {
    fn into_string(self) -> String {
        match self {
            ConfigValue::Text(s) => s,
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Float(f) => f.to_string(),
        }
    }
}

/// Per-source overrides
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub threshold: Option<Threshold>,
    /// Sink instance names; `None` means the context defaults
    #[serde(default)]
    pub sinks: Option<Vec<String>>,
}

/// Configuration of a whole [`LoggingContext`](crate::LoggingContext).
///
/// ```
/// use sourcelog::{ContextConfig, Threshold};
///
/// let config: ContextConfig = serde_json::from_str(r#"{
///     "name": "billing",
///     "default_threshold": "Warning",
///     "sinks": [{ "Name": "main", "Type": "file", "FileName": "app.log", "Async": false }],
///     "default_sinks": ["main"]
/// }"#).unwrap();
/// assert_eq!(config.default_threshold, Threshold::WARNING);
/// assert!(!config.sinks[0].is_async());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default = "default_threshold")]
    pub default_threshold: Threshold,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub default_sinks: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_threshold() -> Threshold {
    Threshold::INFORMATION
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            name: None,
            app_version: None,
            default_threshold: default_threshold(),
            sinks: Vec::new(),
            default_sinks: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl ContextConfig {
    pub fn sink(&self, name: &str) -> Option<&SinkConfig> {
        self.sinks.iter().find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn with_sink(mut self, sink: SinkConfig, default: bool) -> Self {
        if default {
            self.default_sinks.push(sink.name().to_string());
        }
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn with_default_threshold(mut self, threshold: Threshold) -> Self {
        self.default_threshold = threshold;
        self
    }
}
