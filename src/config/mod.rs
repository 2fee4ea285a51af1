//! Configuration system (layered: code > env > config file).

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;

use crate::audio::types::Voice;
use crate::error::VoiceError;
use crate::util::redact;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<VoiceConfig> = OnceLock::new();

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_BASE_URL: &str = "OPENAI_REALTIME_URL";
const ENV_MODEL: &str = "OPENAI_REALTIME_MODEL";
const ENV_VOICE: &str = "OPENAI_REALTIME_VOICE";
const ENV_TRANSCRIPTION_MODEL: &str = "OPENAI_TRANSCRIPTION_MODEL";

/// Values as they appear in a TOML config file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigValues {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    voice: Option<Voice>,
    transcription_model: Option<String>,
}

/// Layered configuration for realtime voice sessions.
///
/// Resolution order, highest first:
/// 1. Values set in code (`set_*`)
/// 2. Environment variables (`OPENAI_API_KEY`, `OPENAI_REALTIME_URL`,
///    `OPENAI_REALTIME_MODEL`, `OPENAI_REALTIME_VOICE`,
///    `OPENAI_TRANSCRIPTION_MODEL`), including a `.env` file
/// 3. A TOML config file
#[derive(Clone, Default)]
pub struct VoiceConfig {
    values: Arc<RwLock<ConfigValues>>,
}

impl fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.read();
        f.debug_struct("VoiceConfig")
            .field(
                "api_key",
                &values.api_key.as_deref().map(redact::fingerprint),
            )
            .field("base_url", &values.base_url)
            .field("model", &values.model)
            .field("voice", &values.voice)
            .field("transcription_model", &values.transcription_model)
            .finish()
    }
}

impl VoiceConfig {
    /// Create empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables (and `.env` if present).
    pub fn from_env() -> Self {
        let config = Self::new();
        config.apply_env();
        config
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, VoiceError> {
        let values: ConfigValues = toml::from_str(source)
            .map_err(|error| VoiceError::Configuration(format!("invalid config file: {error}")))?;
        Ok(Self {
            values: Arc::new(RwLock::new(values)),
        })
    }

    /// Read a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VoiceError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|error| {
            VoiceError::Configuration(format!("cannot read {}: {error}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Config file (when given) overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, VoiceError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static VoiceConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    fn apply_env(&self) {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let env = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut values = self.write();
        if let Some(key) = env(ENV_API_KEY) {
            values.api_key = Some(key);
        }
        if let Some(url) = env(ENV_BASE_URL) {
            values.base_url = Some(url);
        }
        if let Some(model) = env(ENV_MODEL) {
            values.model = Some(model);
        }
        if let Some(voice) = env(ENV_VOICE) {
            match Voice::from_str(&voice.to_ascii_lowercase()) {
                Ok(voice) => values.voice = Some(voice),
                Err(_) => tracing::warn!(voice = %voice, "ignoring unknown OPENAI_REALTIME_VOICE"),
            }
        }
        if let Some(model) = env(ENV_TRANSCRIPTION_MODEL) {
            values.transcription_model = Some(model);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ConfigValues> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConfigValues> {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_api_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.write().api_key = Some(key).filter(|key| !key.trim().is_empty());
    }

    pub fn api_key(&self) -> Option<String> {
        self.read().api_key.clone()
    }

    /// Check if a credential is configured.
    pub fn has_credentials(&self) -> bool {
        self.read().api_key.is_some()
    }

    pub fn set_base_url(&self, url: impl Into<String>) {
        self.write().base_url = Some(url.into());
    }

    pub fn base_url(&self) -> Option<String> {
        self.read().base_url.clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.write().model = Some(model.into());
    }

    pub fn model(&self) -> Option<String> {
        self.read().model.clone()
    }

    pub fn set_voice(&self, voice: Voice) {
        self.write().voice = Some(voice);
    }

    pub fn voice(&self) -> Option<Voice> {
        self.read().voice
    }

    pub fn set_transcription_model(&self, model: impl Into<String>) {
        self.write().transcription_model = Some(model.into());
    }

    pub fn transcription_model(&self) -> Option<String> {
        self.read().transcription_model.clone()
    }
}
