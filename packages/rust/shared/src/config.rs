//! Application configuration for PageLens.
//!
//! User config lives at `~/.pagelens/pagelens.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PageLensError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagelens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagelens";

// ---------------------------------------------------------------------------
// Config structs (matching pagelens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Page fetching.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Per-URL pipeline limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Task database path. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Domain template used when a task does not name one.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// URLs processed concurrently within one task.
    #[serde(default = "default_url_concurrency")]
    pub url_concurrency: usize,

    /// Tasks processed concurrently by the worker pool.
    #[serde(default = "default_task_concurrency")]
    pub task_concurrency: usize,

    /// Character budget for cleaned page text sent to the model.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            domain: default_domain(),
            url_concurrency: default_url_concurrency(),
            task_concurrency: default_task_concurrency(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_db_path() -> String {
    "~/.pagelens/tasks.db".into()
}
fn default_domain() -> String {
    "general".into()
}
fn default_url_concurrency() -> usize {
    3
}
fn default_task_concurrency() -> usize {
    2
}
fn default_max_content_chars() -> usize {
    12_000
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for extraction, analysis, comparison and QnA.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// OpenAI-compatible API base.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound for a single completion request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout for the plain HTTP attempt.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for the browser-rendering attempt.
    #[serde(default = "default_browser_timeout_secs")]
    pub browser_timeout_secs: u64,

    /// Base URL of the rendering service. No browser fallback when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer_url: Option<String>,

    /// Below this much visible text a page is treated as a client-rendered shell.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// Allow loopback and private-network targets.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            browser_timeout_secs: default_browser_timeout_secs(),
            renderer_url: None,
            min_text_chars: default_min_text_chars(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_browser_timeout_secs() -> u64 {
    45
}
fn default_min_text_chars() -> usize {
    200
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for one URL's fetch, normalize, extract and analyze sequence.
    #[serde(default = "default_url_timeout_secs")]
    pub url_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            url_timeout_secs: default_url_timeout_secs(),
        }
    }
}

fn default_url_timeout_secs() -> u64 {
    180
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime orchestration settings, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub url_concurrency: usize,
    pub task_concurrency: usize,
    pub url_timeout: Duration,
    pub fetch_timeout: Duration,
    pub max_content_chars: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url_concurrency: config.defaults.url_concurrency.max(1),
            task_concurrency: config.defaults.task_concurrency.max(1),
            url_timeout: Duration::from_secs(config.pipeline.url_timeout_secs),
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_content_chars: config.defaults.max_content_chars,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagelens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PageLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagelens/pagelens.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| PageLensError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PageLensError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PageLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PageLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PageLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty, returning it.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PageLensError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(!toml_str.contains("renderer_url"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.url_concurrency, 3);
        assert_eq!(parsed.defaults.task_concurrency, 2);
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
domain = "ecommerce"

[fetch]
renderer_url = "http://localhost:3000"
allow_private_hosts = true
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.domain, "ecommerce");
        assert_eq!(config.defaults.max_content_chars, 12_000);
        assert_eq!(config.fetch.renderer_url.as_deref(), Some("http://localhost:3000"));
        assert!(config.fetch.allow_private_hosts);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.pipeline.url_timeout_secs, 180);
    }

    #[test]
    fn run_config_from_app_config() {
        let mut app = AppConfig::default();
        app.defaults.url_concurrency = 0;
        let run = RunConfig::from(&app);
        assert_eq!(run.url_concurrency, 1);
        assert_eq!(run.task_concurrency, 2);
        assert_eq!(run.url_timeout, Duration::from_secs(180));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "PAGELENS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home("/tmp/tasks.db"), PathBuf::from("/tmp/tasks.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x.db"), home.join("x.db"));
        }
    }
}
