//! Configuration layer: typed settings with layered precedence (file → env → overrides).

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::{QualityPreset, QualityPresets, QualityTier};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tessera";
const ENV_PREFIX: &str = "TESSERA";
const DEFAULT_ENGINE_COMMAND: &str = "tessera-engine";
const DEFAULT_INIT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_TIMEOUT_GRACE_MS: u64 = 2_000;
const DEFAULT_MEMORY_QUERY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MEMORY_WARNING_PERCENT: f64 = 80.0;
const DEFAULT_DEBOUNCE_MS: u64 = 1_500;
const DEFAULT_PREVIEW_CACHE_CAPACITY: usize = 10;
const DEFAULT_BUSY_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_MAX_QUEUE_SIZE: usize = 20;

/// Where settings are read from, lowest precedence first: `config/default.*`,
/// `tessera.*`, `config_file`, `TESSERA__SECTION__KEY` environment variables,
/// then `overrides`.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub config_file: Option<PathBuf>,
    pub overrides: Overrides,
}

/// Programmatic overrides applied after every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Base log level (trace|debug|info|warn|error).
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
    pub engine_command: Option<String>,
    pub asset_base_url: Option<String>,
    pub debounce_ms: Option<u64>,
    pub max_queue_size: Option<usize>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub preview: PreviewSettings,
    pub queue: QueueSettings,
    pub quality: QualityPresets,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Verbosity of the engine's forwarded stderr (the `tessera_engine` target).
    /// `None` follows `level`.
    pub engine_level: Option<LevelFilter>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
            engine_level: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Executable started by the process transport.
    pub command: String,
    pub args: Vec<String>,
    pub asset_base_url: Option<String>,
    pub init_timeout: Duration,
    /// Slack added to a preset's timeout before the gateway gives up locally.
    pub timeout_grace: Duration,
    pub memory_query_timeout: Duration,
    pub memory_warning_percent: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            args: Vec::new(),
            asset_base_url: None,
            init_timeout: Duration::from_millis(DEFAULT_INIT_TIMEOUT_MS),
            timeout_grace: Duration::from_millis(DEFAULT_TIMEOUT_GRACE_MS),
            memory_query_timeout: Duration::from_millis(DEFAULT_MEMORY_QUERY_TIMEOUT_MS),
            memory_warning_percent: DEFAULT_MEMORY_WARNING_PERCENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub debounce: Duration,
    pub cache_capacity: usize,
    pub busy_poll_interval: Duration,
    pub auto_preview: bool,
    /// Parameter names that may carry a preview colour override.
    pub color_params: Vec<String>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            cache_capacity: DEFAULT_PREVIEW_CACHE_CAPACITY,
            busy_poll_interval: Duration::from_millis(DEFAULT_BUSY_POLL_INTERVAL_MS),
            auto_preview: true,
            color_params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_size: usize,
    pub busy_poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_QUEUE_SIZE,
            busy_poll_interval: Duration::from_millis(DEFAULT_BUSY_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub fn load(sources: &ConfigSources) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = sources.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&sources.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    engine: RawEngineSettings,
    preview: RawPreviewSettings,
    queue: RawQueueSettings,
    quality: BTreeMap<String, RawQualityPreset>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(command) = overrides.engine_command.as_ref() {
            self.engine.command = Some(command.clone());
        }
        if let Some(url) = overrides.asset_base_url.as_ref() {
            self.engine.asset_base_url = Some(url.clone());
        }
        if let Some(debounce) = overrides.debounce_ms {
            self.preview.debounce_ms = Some(debounce);
        }
        if let Some(max) = overrides.max_queue_size {
            self.queue.max_size = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            engine,
            preview,
            queue,
            quality,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            engine: build_engine_settings(engine)?,
            preview: build_preview_settings(preview)?,
            queue: build_queue_settings(queue)?,
            quality: build_quality_presets(quality)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    let engine_level = logging
        .engine_level
        .map(|level| {
            LevelFilter::from_str(level.as_str()).map_err(|err| {
                LoadError::invalid("logging.engine_level", format!("failed to parse: {err}"))
            })
        })
        .transpose()?;

    Ok(LoggingSettings {
        level,
        format,
        engine_level,
    })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let command = engine
        .command
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_ENGINE_COMMAND.to_string());
    if command.is_empty() {
        return Err(LoadError::invalid(
            "engine.command",
            "command must not be empty",
        ));
    }

    let asset_base_url = engine.asset_base_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let memory_warning_percent = engine
        .memory_warning_percent
        .unwrap_or(DEFAULT_MEMORY_WARNING_PERCENT);
    if !(memory_warning_percent > 0.0 && memory_warning_percent <= 100.0) {
        return Err(LoadError::invalid(
            "engine.memory_warning_percent",
            "must be within (0, 100]",
        ));
    }

    Ok(EngineSettings {
        command,
        args: engine.args.unwrap_or_default(),
        asset_base_url,
        init_timeout: positive_millis(
            engine.init_timeout_ms.unwrap_or(DEFAULT_INIT_TIMEOUT_MS),
            "engine.init_timeout_ms",
        )?,
        timeout_grace: Duration::from_millis(
            engine.timeout_grace_ms.unwrap_or(DEFAULT_TIMEOUT_GRACE_MS),
        ),
        memory_query_timeout: positive_millis(
            engine
                .memory_query_timeout_ms
                .unwrap_or(DEFAULT_MEMORY_QUERY_TIMEOUT_MS),
            "engine.memory_query_timeout_ms",
        )?,
        memory_warning_percent,
    })
}

fn build_preview_settings(preview: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let cache_capacity = preview
        .cache_capacity
        .unwrap_or(DEFAULT_PREVIEW_CACHE_CAPACITY);
    if cache_capacity == 0 {
        return Err(LoadError::invalid(
            "preview.cache_capacity",
            "must be greater than zero",
        ));
    }

    let color_params = preview
        .color_params
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    Ok(PreviewSettings {
        debounce: Duration::from_millis(preview.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
        cache_capacity,
        busy_poll_interval: positive_millis(
            preview
                .busy_poll_interval_ms
                .unwrap_or(DEFAULT_BUSY_POLL_INTERVAL_MS),
            "preview.busy_poll_interval_ms",
        )?,
        auto_preview: preview.auto_preview.unwrap_or(true),
        color_params,
    })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let max_size = queue.max_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE);
    if max_size == 0 {
        return Err(LoadError::invalid(
            "queue.max_size",
            "must be greater than zero",
        ));
    }

    Ok(QueueSettings {
        max_size,
        busy_poll_interval: positive_millis(
            queue
                .busy_poll_interval_ms
                .unwrap_or(DEFAULT_BUSY_POLL_INTERVAL_MS),
            "queue.busy_poll_interval_ms",
        )?,
    })
}

/// Merge configured tiers over the built-in table. Fields left out of a
/// `preview` or `full` section keep their built-in values; new tiers start
/// from the full preset.
fn build_quality_presets(
    raw: BTreeMap<String, RawQualityPreset>,
) -> Result<QualityPresets, LoadError> {
    let mut presets = QualityPresets::new();

    for (name, overrides) in raw {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(LoadError::invalid("quality", "tier name must not be empty"));
        }
        let tier = QualityTier::from_name(&name);
        let base = if presets.contains(&tier) {
            presets.get(&tier)
        } else {
            presets.full()
        };
        let preset = overrides.merge(base);
        validate_preset(&name, &preset)?;
        presets.insert(tier, preset);
    }

    Ok(presets)
}

fn validate_preset(name: &str, preset: &QualityPreset) -> Result<(), LoadError> {
    if preset.max_fn == Some(0) {
        return Err(LoadError::invalid(
            format!("quality.{name}.max_fn"),
            "must be greater than zero",
        ));
    }
    if !(preset.min_fa > 0.0) {
        return Err(LoadError::invalid(
            format!("quality.{name}.min_fa"),
            "must be greater than zero",
        ));
    }
    if !(preset.min_fs > 0.0) {
        return Err(LoadError::invalid(
            format!("quality.{name}.min_fs"),
            "must be greater than zero",
        ));
    }
    if preset.timeout_ms == 0 {
        return Err(LoadError::invalid(
            format!("quality.{name}.timeout_ms"),
            "must be greater than zero",
        ));
    }
    if preset.force_fn && preset.max_fn.is_none() {
        return Err(LoadError::invalid(
            format!("quality.{name}.force_fn"),
            "requires max_fn",
        ));
    }
    Ok(())
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    engine_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    command: Option<String>,
    args: Option<Vec<String>>,
    asset_base_url: Option<String>,
    init_timeout_ms: Option<u64>,
    timeout_grace_ms: Option<u64>,
    memory_query_timeout_ms: Option<u64>,
    memory_warning_percent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    debounce_ms: Option<u64>,
    cache_capacity: Option<usize>,
    busy_poll_interval_ms: Option<u64>,
    auto_preview: Option<bool>,
    color_params: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    max_size: Option<usize>,
    busy_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQualityPreset {
    max_fn: Option<u32>,
    min_fa: Option<f64>,
    min_fs: Option<f64>,
    force_fn: Option<bool>,
    timeout_ms: Option<u64>,
}

impl RawQualityPreset {
    fn merge(self, base: QualityPreset) -> QualityPreset {
        QualityPreset {
            max_fn: self.max_fn.or(base.max_fn),
            min_fa: self.min_fa.unwrap_or(base.min_fa),
            min_fs: self.min_fs.unwrap_or(base.min_fs),
            force_fn: self.force_fn.unwrap_or(base.force_fn),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests;
