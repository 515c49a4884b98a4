//! Daemon configuration.
//!
//! Settings live in the same kind of JSON cell as the rest of the state, so
//! the model itself can adjust sampling parameters through a tool and the
//! change sticks. An optional `config.toml` in the data directory is read
//! at boot and wins over whatever the cell holds; API keys are resolved
//! from the environment first and are never written back to disk by the
//! daemon.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::error::AgentError;
use crate::core::llm::ProviderKind;
use crate::core::store::kv::KvCell;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: String,
    /// Cheaper fallback used when a turn carries no image and few tools.
    pub economy_model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            economy_model: "gpt-3.5-turbo".to_string(),
            system_prompt: "You are a browser assistant. You can read the user's tabs, \
                            navigate, search, and capture the screen with the tools you \
                            are given. Keep answers short and concrete."
                .to_string(),
            max_tokens: 300,
            temperature: 0.7,
            top_p: 1.0,
        }
    }
}

impl LlmSettings {
    /// Ranges the providers accept. Out-of-range values from tools or the
    /// API are pulled back instead of rejected.
    pub fn clamped(mut self) -> Self {
        self.max_tokens = self.max_tokens.clamp(1, 4096);
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Capture the screen automatically with each user message.
    pub auto_capture: bool,
    /// Run the tool selector before each user turn.
    pub auto_tool_selection: bool,
    /// Allow downgrading to the economy model for cheap turns.
    pub auto_select_model: bool,
    /// Send images at high detail instead of letting the provider choose.
    pub detail_analyze_image: bool,
    /// Keep only the newest image in the outbound history.
    pub use_latest_image: bool,
    /// JPEG quality for screen captures, 0-100.
    pub capture_quality: u8,
    /// How many trailing turns of history a provider sees.
    pub forget_chat_after: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            auto_capture: false,
            auto_tool_selection: false,
            auto_select_model: false,
            detail_analyze_image: true,
            use_latest_image: true,
            capture_quality: 25,
            forget_chat_after: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoints {
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub openai_api_key: String,
    pub gemini_api_key: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            openai_api_key: String::new(),
            gemini_api_key: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub runtime: RuntimeSettings,
    pub providers: ProviderEndpoints,
}

impl Settings {
    pub fn base_url_for(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::OpenAi => &self.providers.openai_base_url,
            ProviderKind::Gemini => &self.providers.gemini_base_url,
        }
    }

    /// Environment wins over the config file. Empty strings count as unset.
    pub fn api_key_for(&self, kind: ProviderKind) -> Option<String> {
        let (env_names, configured): (&[&str], &str) = match kind {
            ProviderKind::OpenAi => (
                &["TABWISP_OPENAI_KEY", "OPENAI_API_KEY"],
                self.providers.openai_api_key.as_str(),
            ),
            ProviderKind::Gemini => (
                &["TABWISP_GEMINI_KEY", "GEMINI_API_KEY"],
                self.providers.gemini_api_key.as_str(),
            ),
        };
        let from_env = env_names
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.is_empty());
        resolve_key(from_env, configured)
    }
}

fn resolve_key(from_env: Option<String>, configured: &str) -> Option<String> {
    from_env.or_else(|| (!configured.is_empty()).then(|| configured.to_string()))
}

/// `$TABWISP_DATA_DIR`, or `~/.tabwisp`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TABWISP_DATA_DIR")
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tabwisp")
}

/// Reads `config.toml` from the data directory. Absent file is fine;
/// unreadable or invalid TOML is a fatal configuration error.
pub fn load_config_file(dir: &Path) -> Result<Option<Settings>, AgentError> {
    let path = dir.join(CONFIG_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AgentError::Configuration(format!(
                "cannot read {}: {err}",
                path.display()
            )));
        }
    };
    let settings: Settings = toml::from_str(&raw).map_err(|err| {
        AgentError::Configuration(format!("invalid {}: {err}", path.display()))
    })?;
    Ok(Some(settings))
}

pub struct SettingsStore {
    cell: KvCell<Settings>,
}

impl SettingsStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            cell: KvCell::open(dir, "settings", Settings::default()),
        }
    }

    pub fn in_memory(initial: Settings) -> Self {
        Self {
            cell: KvCell::in_memory("settings", initial),
        }
    }

    pub fn get(&self) -> Settings {
        self.cell.get()
    }

    /// Boot-time override from the config file.
    pub async fn overwrite(&self, settings: Settings) {
        self.cell.set(|_| settings).await;
    }

    pub async fn update<F>(&self, apply: F) -> Settings
    where
        F: FnOnce(Settings) -> Settings,
    {
        self.cell.set(apply).await
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.cell.subscribe()
    }
}
