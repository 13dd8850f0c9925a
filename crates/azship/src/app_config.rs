//! 🔧 App Configuration: TOML and env vars in, validated sink settings out.
//!
//! 📡 Two stages, on purpose:
//!   1. `load_config` → `AppConfig`: whatever the user wrote, deserialized by Figment.
//!   2. `AppConfig::resolve` → `SinkSettings`: checked, defaulted, baked. Every
//!      config mistake dies here, before a single record is accepted.
//!
//! 🦆 "The config loaded fine." Famous last words, now with a second stage.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;
use tracing::level_filters::LevelFilter;

use crate::backends::DestinationConfig;
use crate::compression::Compression;
use crate::object_key::{DEFAULT_OBJECT_KEY_FORMAT, ObjectKeyTemplate};
use crate::retry::RetryPolicy;

const ENV_PREFIX: &str = "AZSHIP_";

/// 📦 Everything the sink needs to know, exactly as the user wrote it.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🪣 Where batches go. `[destination.Azure]` or `[destination.InMemory]`.
    pub destination: DestinationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🗝️ What the uploaded objects look like and what they're called.
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default)]
    pub store_as: Compression,
    #[serde(default = "default_object_key_format")]
    pub object_key_format: String,
    /// Prefix substituted for `%{path}`. Usually ends with `/`, but we don't judge.
    #[serde(default)]
    pub path: String,
    /// strftime pattern for `%{time_slice}`.
    #[serde(default = "default_time_slice_format")]
    pub time_slice_format: String,
    /// `""` or `"UTC"`, `"Local"`, or an IANA name like `"Asia/Tokyo"`.
    #[serde(default)]
    pub time_zone: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            store_as: Compression::default(),
            object_key_format: default_object_key_format(),
            path: String::new(),
            time_slice_format: default_time_slice_format(),
            time_zone: String::new(),
        }
    }
}

/// ⏱️ When a batch is done waiting.
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    /// Size threshold. `"32KiB"`, `"1MB"`, or a plain byte count.
    #[serde(default = "default_limit_size")]
    pub limit_size: ByteSize,
    /// Retries per flush after the first attempt. Absent means retry forever.
    #[serde(default)]
    pub retry_limit: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            wait_secs: default_wait_secs(),
            limit_size: default_limit_size(),
            retry_limit: None,
        }
    }
}

/// 🏃 Process-level knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📬 Entries the intake holds before `submit` starts waiting.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 🔊 One level: `trace`, `debug`, `info`, `warn`, `error` or `off`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Overrides the OS hostname for `%{hostname}`.
    #[serde(default)]
    pub hostname: Option<String>,
    /// 🏷️ Label on every log line this sink emits. Two sinks, two labels.
    #[serde(default = "default_instance")]
    pub instance: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            log_level: default_log_level(),
            hostname: None,
            instance: default_instance(),
        }
    }
}

fn default_object_key_format() -> String {
    DEFAULT_OBJECT_KEY_FORMAT.to_string()
}

fn default_time_slice_format() -> String {
    "%Y%m%d%H-%M".to_string()
}

fn default_wait_secs() -> u64 {
    5
}

fn default_limit_size() -> ByteSize {
    ByteSize::kib(32)
}

fn default_queue_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_instance() -> String {
    "azship.0".to_string()
}

/// 🌍 Which clock `%{time_slice}` is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceTimeZone {
    Utc,
    Local,
    Named(Tz),
}

impl SliceTimeZone {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            "" => Ok(SliceTimeZone::Utc),
            n if n.eq_ignore_ascii_case("utc") => Ok(SliceTimeZone::Utc),
            n if n.eq_ignore_ascii_case("local") => Ok(SliceTimeZone::Local),
            n => n
                .parse::<Tz>()
                .map(SliceTimeZone::Named)
                .map_err(|e| anyhow::anyhow!("💀 unknown time_zone '{n}': {e}")),
        }
    }

    /// Formats `instant` in this zone. The pattern must already be validated.
    pub fn format(&self, instant: DateTime<Utc>, pattern: &str) -> String {
        match self {
            SliceTimeZone::Utc => instant.format(pattern).to_string(),
            SliceTimeZone::Local => instant.with_timezone(&chrono::Local).format(pattern).to_string(),
            SliceTimeZone::Named(tz) => instant.with_timezone(tz).format(pattern).to_string(),
        }
    }
}

/// ✅ Validated, defaulted, ready to run. Built only by [`AppConfig::resolve`].
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub destination: DestinationConfig,
    pub auto_create_container: bool,
    pub compression: Compression,
    pub key_template: ObjectKeyTemplate,
    pub time_slice_format: String,
    pub time_zone: SliceTimeZone,
    pub batch_wait: Duration,
    pub size_limit: usize,
    pub retry: RetryPolicy,
    pub queue_capacity: usize,
    pub log_level: LevelFilter,
    pub hostname: String,
    pub instance: String,
}

impl SinkSettings {
    /// The `%{time_slice}` value for one record.
    pub fn time_slice(&self, instant: DateTime<Utc>) -> String {
        self.time_zone.format(instant, &self.time_slice_format)
    }
}

impl AppConfig {
    /// 🔍 Checks every knob and bakes the static parts of the object key.
    pub fn resolve(&self) -> Result<SinkSettings> {
        if self.batch.wait_secs == 0 {
            anyhow::bail!("💀 batch.wait_secs must be at least 1. A batch that never waits is just a very expensive PUT per record.");
        }
        if self.runtime.queue_capacity == 0 {
            anyhow::bail!("💀 runtime.queue_capacity must be at least 1. A zero-slot queue is a wall.");
        }
        let size_limit = usize::try_from(self.batch.limit_size.as_u64()).context(format!(
            "💀 batch.limit_size {} does not fit in memory on this platform",
            self.batch.limit_size
        ))?;

        let pattern = &self.output.time_slice_format;
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            anyhow::bail!("💀 output.time_slice_format '{pattern}' is not a valid strftime pattern");
        }
        let time_zone = SliceTimeZone::parse(&self.output.time_zone)?;

        let log_level = self
            .runtime
            .log_level
            .parse::<LevelFilter>()
            .map_err(|e| anyhow::anyhow!("💀 runtime.log_level '{}': {e}", self.runtime.log_level))?;

        let hostname = match &self.runtime.hostname {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => gethostname::gethostname().to_string_lossy().into_owned(),
        };

        let compression = self.output.store_as;
        Ok(SinkSettings {
            destination: self.destination.clone(),
            auto_create_container: self.destination.auto_create_container(),
            compression,
            key_template: ObjectKeyTemplate::new(
                &self.output.object_key_format,
                &self.output.path,
                compression.file_extension(),
            ),
            time_slice_format: pattern.clone(),
            time_zone,
            batch_wait: Duration::from_secs(self.batch.wait_secs),
            size_limit,
            retry: RetryPolicy::new(self.batch.retry_limit),
            queue_capacity: self.runtime.queue_capacity,
            log_level,
            hostname,
            instance: self.runtime.instance.clone(),
        })
    }
}

#[cfg(test)]
impl SinkSettings {
    /// Defaults, an in-memory destination, and a hostname that never changes.
    pub(crate) fn in_memory() -> Self {
        let app_config = AppConfig {
            destination: DestinationConfig::InMemory(Default::default()),
            output: OutputConfig::default(),
            batch: BatchConfig::default(),
            runtime: RuntimeConfig {
                hostname: Some("test-host".into()),
                ..RuntimeConfig::default()
            },
        };
        app_config
            .resolve()
            .expect("💀 default settings should always resolve")
    }
}

/// 🚀 Load the config from an optional TOML file plus `AZSHIP_*` env vars.
///
/// 🔧 Nested keys in env vars use `__`: `AZSHIP_BATCH__WAIT_SECS=10`.
/// Env vars are merged last, so they win over the file. Handy for secrets:
/// keep `access_key` out of the TOML and in `AZSHIP_DESTINATION__AZURE__ACCESS_KEY`.
///
/// - `config_file_name = None` → env vars only.
/// - `config_file_name = Some(path)` → file, then env vars on top.
pub fn load_config(config_file_name: Option<&Path>) -> Result<AppConfig> {
    load_config_with_prefix(config_file_name, ENV_PREFIX)
}

fn load_config_with_prefix(config_file_name: Option<&Path>, env_prefix: &str) -> Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = match config_file_name {
        Some(file_name) => Figment::new().merge(Toml::file(file_name)),
        None => Figment::new(),
    };
    let config = config.merge(Env::prefixed(env_prefix).split("__"));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables ({env_prefix}*). \
             Check the section names: [destination.Azure], [output], [batch], [runtime].",
            path.display()
        ),
        None => format!(
            "💀 Failed to parse configuration from environment variables ({env_prefix}*). \
             No file was provided, so the destination has to come from the environment."
        ),
    };

    config.extract().context(context_msg)
}
