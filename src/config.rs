use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::InfillError;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8012";

pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "<|fim_prefix|>{inputPrefix}<|fim_suffix|>{inputSuffix}<|fim_middle|>";

/// Config file looked up in the working directory when `INFILL_CONFIG` is unset.
const DEFAULT_CONFIG_FILE: &str = "infill.toml";

/// Settings for an OpenAI-compatible server. The remote client exists only when
/// `base_url` is set.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Base URL including the version segment, e.g. `http://localhost:8080/v1`.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl OpenAiConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the llama.cpp server; `/infill` is appended.
    pub endpoint: String,
    /// Bearer token sent with every native request.
    pub api_key: Option<String>,
    /// Max characters of prefix kept for the OpenAI prompt (tail).
    pub n_prefix: usize,
    /// Max characters of suffix kept for the OpenAI prompt (head).
    pub n_suffix: usize,
    pub n_predict: u32,
    pub t_max_prompt_ms: u32,
    pub t_max_predict_ms: u32,
    /// Route completions through the OpenAI-compatible client instead of `/infill`.
    pub use_openai_endpoint: bool,
    /// Launch the server inside a terminal surface instead of a tracked process.
    pub use_terminal: bool,
    pub launch_cmd: String,
    pub openai_prompt_template: String,
    pub openai: OpenAiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            n_prefix: 256,
            n_suffix: 64,
            n_predict: 128,
            t_max_prompt_ms: 500,
            t_max_predict_ms: 1000,
            use_openai_endpoint: false,
            use_terminal: true,
            launch_cmd: String::new(),
            openai_prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl Config {
    /// Load from the TOML file (if any), then apply environment overrides.
    pub fn load() -> Self {
        let mut config = match config_file_path() {
            Some(path) => match Self::from_file(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded config file");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring config file: {e}");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());

        if config.use_openai_endpoint && !config.openai.is_configured() {
            tracing::warn!(
                "use_openai_endpoint is set but OPENAI_BASE_URL is not set, completions unavailable"
            );
        }
        config
    }

    pub fn from_file(path: &Path) -> Result<Self, InfillError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, InfillError> {
        toml::from_str(text).map_err(|e| InfillError::Config(e.to_string()))
    }

    /// Apply overrides from a variable lookup. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INFILL_ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = lookup("INFILL_API_KEY") {
            self.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = parsed(&lookup, "INFILL_N_PREFIX") {
            self.n_prefix = v;
        }
        if let Some(v) = parsed(&lookup, "INFILL_N_SUFFIX") {
            self.n_suffix = v;
        }
        if let Some(v) = parsed(&lookup, "INFILL_N_PREDICT") {
            self.n_predict = v;
        }
        if let Some(v) = parsed(&lookup, "INFILL_T_MAX_PROMPT_MS") {
            self.t_max_prompt_ms = v;
        }
        if let Some(v) = parsed(&lookup, "INFILL_T_MAX_PREDICT_MS") {
            self.t_max_predict_ms = v;
        }
        if let Some(v) = parsed(&lookup, "INFILL_USE_OPENAI") {
            self.use_openai_endpoint = v;
        }
        if let Some(v) = parsed(&lookup, "INFILL_USE_TERMINAL") {
            self.use_terminal = v;
        }
        if let Some(v) = lookup("INFILL_LAUNCH_CMD") {
            self.launch_cmd = v;
        }
        if let Some(v) = lookup("INFILL_OPENAI_PROMPT_TEMPLATE") {
            self.openai_prompt_template = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = Some(v).filter(|u| !u.is_empty());
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup("INFILL_OPENAI_MODEL") {
            self.openai.model = v;
        }
    }

    /// Full URL of the native infill route.
    pub fn infill_url(&self) -> String {
        format!("{}/infill", self.endpoint.trim_end_matches('/'))
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("INFILL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
