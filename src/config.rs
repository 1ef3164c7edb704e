/// Runtime configuration: the watch loop (RON file plus environment) and the
/// chat backend (environment only).
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default dialogue buffer address.
pub const DEFAULT_DIALOGUE_ADDRESS: u32 = 0x8129_8360;
/// Default speaker-name buffer address.
pub const DEFAULT_SPEAKER_ADDRESS: u32 = 0x8129_A3EA;
pub const MIN_READ_SIZE: usize = 32;
pub const MAX_READ_SIZE: usize = 8192;
/// Longest suppression window accepted, one hour.
pub const MAX_SUPPRESS_SECS: f64 = 3600.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("no addresses to watch")]
    NoAddresses,
    #[error("suppress_secs must be a finite number of seconds, got {0}")]
    InvalidSuppress(f64),
}

/// Settings for the poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub addresses: Vec<u32>,
    pub poll_interval_ms: u64,
    pub read_size: usize,
    pub suppress_secs: f64,
    /// Report every tick instead of only changed text.
    pub print_all: bool,
    pub speaker_address: Option<u32>,
    pub speaker_read_size: usize,
    pub enable_screenshot: bool,
    pub enable_gossip: bool,
    pub generation_timeout_secs: u64,
    /// Run generation on a worker thread so other addresses keep polling.
    pub background_generation: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            addresses: vec![DEFAULT_DIALOGUE_ADDRESS],
            poll_interval_ms: 100,
            read_size: 512,
            suppress_secs: 25.0,
            print_all: false,
            speaker_address: Some(DEFAULT_SPEAKER_ADDRESS),
            speaker_read_size: 32,
            enable_screenshot: false,
            enable_gossip: false,
            generation_timeout_secs: 30,
            background_generation: true,
        }
    }
}

impl WatchConfig {
    pub fn parse_ron(source: &str) -> Result<Self, ConfigError> {
        let config: WatchConfig = ron::from_str(source)?;
        config.validated()
    }

    pub fn load_from_ron(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Apply `GENERATION_SUPPRESS_SECONDS`, `ENABLE_GOSSIP` and
    /// `ENABLE_SCREENSHOT` from `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GENERATION_SUPPRESS_SECONDS") {
            self.suppress_secs = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .ok_or(ConfigError::InvalidEnv {
                    key: "GENERATION_SUPPRESS_SECONDS",
                    value,
                })?;
        }
        if let Some(value) = lookup("ENABLE_GOSSIP") {
            self.enable_gossip = value.trim() == "1";
        }
        if let Some(value) = lookup("ENABLE_SCREENSHOT") {
            self.enable_screenshot = value.trim() == "1";
        }
        Ok(self)
    }

    pub fn with_process_env(self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Clamp sizes and the suppression window; reject an empty address
    /// list and a non-finite window.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        if !self.suppress_secs.is_finite() {
            return Err(ConfigError::InvalidSuppress(self.suppress_secs));
        }
        self.suppress_secs = self.suppress_secs.clamp(0.0, MAX_SUPPRESS_SECS);
        self.read_size = self.read_size.clamp(MIN_READ_SIZE, MAX_READ_SIZE);
        self.speaker_read_size = self.speaker_read_size.clamp(1, MAX_READ_SIZE);
        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// At most [`MAX_SUPPRESS_SECS`]; zero when the value is not a number.
    pub fn suppress_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.suppress_secs.clamp(0.0, MAX_SUPPRESS_SECS))
            .unwrap_or(Duration::ZERO)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

/// Connection settings for the OpenAI-compatible chat backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub villagers_json: Option<PathBuf>,
    pub request_timeout: Duration,
}

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 220,
            villagers_json: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BackendConfig {
    /// Build from `lookup`. An OpenRouter key wins over an OpenAI key; with
    /// an OpenAI key, `OPENAI_BASE` replaces the base URL when set.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let openrouter = non_empty("OPENROUTER_API_KEY");
        let openai = non_empty("OPENAI_API_KEY");
        if let Some(base) = non_empty("BASE_URL") {
            config.base_url = base;
        }
        if openrouter.is_none() && openai.is_some() {
            if let Some(base) = non_empty("OPENAI_BASE") {
                config.base_url = base;
            }
        }
        config.api_key = openrouter.or(openai);

        if let Some(model) = non_empty("MODEL") {
            config.model = model;
        }
        if let Some(value) = non_empty("TEMPERATURE") {
            config.temperature = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    key: "TEMPERATURE",
                    value,
                })?;
        }
        config.villagers_json = non_empty("VILLAGERS_JSON").map(PathBuf::from);
        Ok(config)
    }

    pub fn from_process_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.addresses, vec![0x8129_8360]);
        assert_eq!(config.read_size, 512);
        assert_eq!(config.suppress_window(), Duration::from_secs(25));
        assert_eq!(config.speaker_address, Some(0x8129_A3EA));
        assert!(config.background_generation);
    }

    #[test]
    fn ron_overrides_and_clamps() {
        let config = WatchConfig::parse_ron(
            "(addresses: [0x81298360, 0x81298400], read_size: 9000, print_all: true)",
        )
        .unwrap();
        assert_eq!(config.addresses.len(), 2);
        assert_eq!(config.read_size, MAX_READ_SIZE);
        assert!(config.print_all);
        assert_eq!(config.poll_interval_ms, 100);

        let small = WatchConfig::parse_ron("(read_size: 4)").unwrap();
        assert_eq!(small.read_size, MIN_READ_SIZE);
    }

    #[test]
    fn ron_rejects_empty_addresses() {
        assert!(matches!(
            WatchConfig::parse_ron("(addresses: [])"),
            Err(ConfigError::NoAddresses)
        ));
        assert!(matches!(
            WatchConfig::parse_ron("(addresses: nope)"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn env_overrides() {
        let config = WatchConfig::default()
            .apply_env(env(&[
                ("GENERATION_SUPPRESS_SECONDS", "2.5"),
                ("ENABLE_GOSSIP", "1"),
                ("ENABLE_SCREENSHOT", "0"),
            ]))
            .unwrap();
        assert_eq!(config.suppress_window(), Duration::from_millis(2500));
        assert!(config.enable_gossip);
        assert!(!config.enable_screenshot);

        let bad = WatchConfig::default().apply_env(env(&[("GENERATION_SUPPRESS_SECONDS", "soon")]));
        assert!(matches!(bad, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn huge_suppression_is_clamped() {
        let config = WatchConfig::default()
            .apply_env(env(&[("GENERATION_SUPPRESS_SECONDS", "1e20")]))
            .unwrap();
        assert_eq!(config.suppress_window(), Duration::from_secs(3600));
        let config = config.validated().unwrap();
        assert_eq!(config.suppress_secs, MAX_SUPPRESS_SECS);

        let from_ron = WatchConfig::parse_ron("(suppress_secs: 1e20)").unwrap();
        assert_eq!(from_ron.suppress_window(), Duration::from_secs(3600));

        let negative = WatchConfig::parse_ron("(suppress_secs: -4.0)").unwrap();
        assert_eq!(negative.suppress_window(), Duration::ZERO);
    }

    #[test]
    fn non_finite_suppression_is_rejected() {
        let config = WatchConfig {
            suppress_secs: f64::INFINITY,
            ..WatchConfig::default()
        };
        assert_eq!(config.suppress_window(), Duration::from_secs(3600));
        assert!(matches!(
            config.validated(),
            Err(ConfigError::InvalidSuppress(_))
        ));

        let nan = WatchConfig {
            suppress_secs: f64::NAN,
            ..WatchConfig::default()
        };
        assert_eq!(nan.suppress_window(), Duration::ZERO);
        assert!(nan.validated().is_err());
    }

    #[test]
    fn backend_prefers_openrouter() {
        let config = BackendConfig::from_env_with(env(&[
            ("OPENROUTER_API_KEY", "or-key"),
            ("OPENAI_API_KEY", "oa-key"),
            ("OPENAI_BASE", "http://localhost:1234/v1"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("or-key"));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.completions_url(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn backend_openai_base() {
        let config = BackendConfig::from_env_with(env(&[
            ("OPENAI_API_KEY", "oa-key"),
            ("OPENAI_BASE", "http://localhost:1234/v1/"),
            ("MODEL", "gpt-4o"),
            ("TEMPERATURE", "0.2"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("oa-key"));
        assert_eq!(config.completions_url(), "http://localhost:1234/v1/chat/completions");
        assert_eq!(config.model, "gpt-4o");
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn backend_without_keys() {
        let config = BackendConfig::from_env_with(env(&[])).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.model, DEFAULT_MODEL);
    }
}
