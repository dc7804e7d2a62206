use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{MediaSource, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};
use crate::pipeline::{
    SessionConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_TARGET_FPS, DEFAULT_VALIDATION_DURATION,
};
use crate::reconnect::{ReconnectPolicy, DEFAULT_RECONNECT_BACKOFF};
use crate::sampling::SamplingMode;
use crate::suppress::DEFAULT_SUPPRESSION_WINDOW;
use crate::violation::DEFAULT_VIOLATION_LABELS;

const DEFAULT_SOURCE_URI: &str = "stub://camera/front";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    source: Option<SourceConfigFile>,
    sampling: Option<SamplingConfigFile>,
    session: Option<SessionConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingConfigFile {
    target_fps: Option<u32>,
    mode: Option<SamplingMode>,
    native_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    validation_secs: Option<u64>,
    suppression_secs: Option<f64>,
    confidence_threshold: Option<f32>,
    violation_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    backoff_ms: Option<u64>,
    /// 0 means unbounded, as with `PPE_RECONNECT_MAX_ATTEMPTS`.
    max_attempts: Option<u32>,
}

/// Settings for the `ppe_monitor` binary.
///
/// Loaded from the file named by `PPE_CONFIG` (JSON, or TOML for `.toml`
/// paths), then overridden from `PPE_*` environment variables, then validated.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceSettings,
    pub sampling: SamplingSettings,
    pub session: SessionSettings,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub target_fps: u32,
    pub mode: SamplingMode,
    pub native_fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub validation_secs: u64,
    pub suppression_secs: f64,
    pub confidence_threshold: f32,
    pub violation_labels: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file instead of `PPE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let sampling = file.sampling.unwrap_or_default();
        let session = file.session.unwrap_or_default();
        let reconnect = file.reconnect.unwrap_or_default();
        Self {
            source: SourceSettings {
                uri: source
                    .uri
                    .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
                width: source.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: source.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            },
            sampling: SamplingSettings {
                target_fps: sampling.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                mode: sampling.mode.unwrap_or_default(),
                native_fps: sampling.native_fps,
            },
            session: SessionSettings {
                validation_secs: session
                    .validation_secs
                    .unwrap_or(DEFAULT_VALIDATION_DURATION.as_secs()),
                suppression_secs: session
                    .suppression_secs
                    .unwrap_or(DEFAULT_SUPPRESSION_WINDOW.as_secs_f64()),
                confidence_threshold: session
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                violation_labels: session.violation_labels.unwrap_or_else(|| {
                    DEFAULT_VIOLATION_LABELS
                        .iter()
                        .map(|label| label.to_string())
                        .collect()
                }),
            },
            reconnect: ReconnectPolicy {
                backoff: reconnect
                    .backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF),
                max_attempts: reconnect.max_attempts.filter(|max| *max > 0),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("PPE_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Some(fps) = env_parse::<u32>("PPE_TARGET_FPS", "an integer frame rate")? {
            self.sampling.target_fps = fps;
        }
        if let Ok(mode) = std::env::var("PPE_SAMPLING_MODE") {
            if !mode.trim().is_empty() {
                self.sampling.mode = mode.parse()?;
            }
        }
        if let Some(secs) =
            env_parse::<u64>("PPE_VALIDATION_SECS", "an integer number of seconds")?
        {
            self.session.validation_secs = secs;
        }
        if let Some(secs) = env_parse::<f64>("PPE_SUPPRESSION_SECS", "a number of seconds")? {
            self.session.suppression_secs = secs;
        }
        if let Some(confidence) = env_parse::<f32>("PPE_CONFIDENCE", "a number in [0, 1]")? {
            self.session.confidence_threshold = confidence;
        }
        if let Ok(labels) = std::env::var("PPE_VIOLATION_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.session.violation_labels = parsed;
            }
        }
        if let Some(ms) =
            env_parse::<u64>("PPE_RECONNECT_BACKOFF_MS", "an integer number of milliseconds")?
        {
            self.reconnect.backoff = Duration::from_millis(ms);
        }
        if let Some(max) =
            env_parse::<u32>("PPE_RECONNECT_MAX_ATTEMPTS", "an integer attempt count")?
        {
            // Zero means no ceiling.
            self.reconnect.max_attempts = (max > 0).then_some(max);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        self.media_source()?;
        self.session_config(false)?.validate()?;
        Ok(())
    }

    pub fn media_source(&self) -> Result<MediaSource> {
        MediaSource::parse(&self.source.uri)
            .with_context(|| format!("invalid source '{}'", self.source.uri))
    }

    /// Session settings for `PipelineController::start`.
    pub fn session_config(&self, detection_enabled: bool) -> Result<SessionConfig> {
        let suppression_window = Duration::try_from_secs_f64(self.session.suppression_secs)
            .map_err(|_| {
                anyhow!(
                    "suppression window must be a non-negative number of seconds, got {}",
                    self.session.suppression_secs
                )
            })?;
        Ok(SessionConfig {
            target_fps: self.sampling.target_fps,
            sampling_mode: self.sampling.mode,
            native_fps: self.sampling.native_fps,
            validation_duration: Duration::from_secs(self.session.validation_secs),
            suppression_window,
            confidence_threshold: self.session.confidence_threshold,
            violation_labels: self.session.violation_labels.clone(),
            reconnect: self.reconnect.clone(),
            detection_enabled,
        })
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_parse<T: std::str::FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        _ => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
