use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Every service the suite knows about, in registry order.
pub const ALL_SERVICES: [&str; 9] = [
    "calendar", "gmail", "drive", "docs", "sheets", "slides", "tasks", "contacts", "forms",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Client secrets downloaded from the cloud console (installed-app format).
    #[serde(default = "default_client_secrets_file")]
    pub client_secrets_file: String,
    #[serde(default = "default_token_file")]
    pub token_file: String,
    /// Refresh this many seconds before the token actually expires.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: i64,
    #[serde(default = "default_oauth_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_client_secrets_file() -> String {
    "credentials.json".to_string()
}

fn default_token_file() -> String {
    "token.json".to_string()
}

fn default_refresh_skew_secs() -> i64 {
    60
}

fn default_oauth_timeout_secs() -> u64 {
    30
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_secrets_file: default_client_secrets_file(),
            token_file: default_token_file(),
            refresh_skew_secs: default_refresh_skew_secs(),
            timeout_secs: default_oauth_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_classifier_api_base")]
    pub api_base: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    /// Remote answers scored below this are treated as unresolved.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_classifier_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    20
}

fn default_min_confidence() -> f64 {
    0.3
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            api_base: default_classifier_api_base(),
            model: default_classifier_model(),
            timeout_secs: default_classifier_timeout_secs(),
            min_confidence: default_min_confidence(),
            fallback_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesConfig {
    #[serde(default = "default_enabled_services")]
    pub enabled: Vec<String>,
    #[serde(default = "default_services_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Per-service base URL overrides (service id -> URL).
    #[serde(default)]
    pub api_bases: HashMap<String, String>,
}

fn default_enabled_services() -> Vec<String> {
    ALL_SERVICES.iter().map(|s| s.to_string()).collect()
}

fn default_services_timeout_secs() -> u64 {
    30
}

fn default_max_results() -> u32 {
    10
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_services(),
            timeout_secs: default_services_timeout_secs(),
            max_results: default_max_results(),
            api_bases: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default = "default_exit_commands")]
    pub exit_commands: Vec<String>,
    /// How many listed-item references to remember.
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,
}

fn default_exit_commands() -> Vec<String> {
    vec!["quit".to_string(), "exit".to_string(), "q".to_string()]
}

fn default_max_handles() -> usize {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exit_commands: default_exit_commands(),
            max_handles: default_max_handles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Classifier API key from config, then `WORKDESK_CLASSIFIER_API_KEY`, then `OPENAI_API_KEY`.
    pub fn classifier_api_key(&self) -> Option<String> {
        let key = self.classifier.api_key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        for env_key in ["WORKDESK_CLASSIFIER_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(val) = std::env::var(env_key) {
                if !val.trim().is_empty() {
                    return Some(val.trim().to_string());
                }
            }
        }
        None
    }

    pub fn api_base_for(&self, service_id: &str) -> Option<&str> {
        self.services
            .api_bases
            .get(service_id)
            .map(|s| s.trim_end_matches('/'))
            .filter(|s| !s.is_empty())
    }

    pub fn is_service_enabled(&self, service_id: &str) -> bool {
        self.services.enabled.iter().any(|s| s == service_id)
    }

    /// Copy with secrets replaced, for display.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        if !copy.classifier.api_key.is_empty() {
            let tail: String = copy
                .classifier
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            copy.classifier.api_key = format!("****{}", tail);
        }
        copy
    }
}
