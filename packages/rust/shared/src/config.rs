//! Application configuration for the dossier pipeline.
//!
//! User config lives at `~/.dossier/dossier.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the env vars
//! that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DossierError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "dossier.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dossier";

// ---------------------------------------------------------------------------
// Config structs (matching dossier.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Completion service (OpenRouter or any OpenAI-compatible endpoint).
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Web search provider.
    #[serde(default)]
    pub tavily: TavilyConfig,

    /// Persistent company store.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Workflow termination and answer selection.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Search results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> u32 {
    5
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used by every capability unit.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Base URL of the chat completions API.
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_openrouter_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4.1-nano".into()
}
fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[tavily]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyConfig {
    /// Name of the env var holding the Tavily API key.
    #[serde(default = "default_tavily_key_env")]
    pub api_key_env: String,

    /// Base URL of the Tavily API.
    #[serde(default = "default_tavily_url")]
    pub base_url: String,
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_tavily_key_env(),
            base_url: default_tavily_url(),
        }
    }
}

fn default_tavily_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_tavily_url() -> String {
    "https://api.tavily.com".into()
}

/// Which libSQL backend the storage adapter opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local database file at `storage.path`.
    #[default]
    Local,
    /// In-process database, discarded on shutdown.
    Memory,
    /// Remote libSQL server at `storage.url`.
    Remote,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file for the `local` backend. A leading `~/` is expanded.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Server URL for the `remote` backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the remote auth token.
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            url: None,
            auth_token_env: default_auth_token_env(),
        }
    }
}

fn default_db_path() -> String {
    "~/.dossier/dossier.db".into()
}
fn default_auth_token_env() -> String {
    "LIBSQL_AUTH_TOKEN".into()
}

impl StorageConfig {
    /// The database path with a leading `~/` expanded to the home directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| DossierError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.path)),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Phrase whose appearance in a message stops the run.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    /// Only honor the sentinel when this stage emits it. Unset means any stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel_stage: Option<String>,

    /// Stage whose last text message is the final answer.
    #[serde(default = "default_synthesis_stage")]
    pub synthesis_stage: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            sentinel_stage: None,
            synthesis_stage: default_synthesis_stage(),
        }
    }
}

fn default_sentinel() -> String {
    "Goodbye".into()
}
fn default_synthesis_stage() -> String {
    "synthesizer".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.dossier/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DossierError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.dossier/dossier.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DossierError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DossierError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DossierError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DossierError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DossierError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named `var_name`.
pub fn resolve_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DossierError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the completion and search API key env vars are set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    for var_name in [&config.openrouter.api_key_env, &config.tavily.api_key_env] {
        resolve_secret(var_name).map_err(|_| {
            DossierError::config(format!(
                "API key not found. Set the {var_name} environment variable."
            ))
        })?;
    }
    Ok(())
}
