use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub web_search: WebSearchSettings,
    #[serde(default)]
    pub session: SessionSettings,
    /// Capability servers the core connects to for tools/resources/prompts
    #[serde(default)]
    pub capability_servers: Vec<CapabilityServerConfig>,
}

/// Settings for the language-model gateway
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySettings {
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL override, mainly for tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable containing the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            temperature: None,
            system_prompt: None,
            stop_sequences: None,
        }
    }
}

/// Settings for the built-in web-search tool entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchSettings {
    #[serde(default = "default_max_uses")]
    pub max_uses: u32,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for WebSearchSettings {
    fn default() -> Self {
        Self {
            max_uses: default_max_uses(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

/// Settings for the conversation turn loop
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Maximum tool-use rounds per run. Unset means the loop terminates only
    /// when the model stops requesting tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

/// Configuration for spawning one capability server subprocess
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CapabilityServerConfig {
    /// Unique name for this server connection
    pub name: String,
    /// Command to spawn
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the subprocess
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Whether this server is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_max_uses() -> u32 {
    5
}

fn default_allowed_domains() -> Vec<String> {
    vec!["google.com".to_string()]
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_file("fulcrum.toml")
    }

    /// Load settings from a TOML file (missing file yields defaults)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.capability_servers {
            if !seen.insert(server.name.as_str()) {
                anyhow::bail!("Duplicate capability server name: {}", server.name);
            }
            if server.enabled && server.command.trim().is_empty() {
                anyhow::bail!("Capability server '{}' has an empty command", server.name);
            }
        }
        if self.gateway.model.trim().is_empty() {
            anyhow::bail!("Gateway model must not be empty");
        }
        Ok(())
    }
}
