//! Application configuration for the expense tracker.
//!
//! User config lives at `~/.expensetracker/expensetracker.toml`; missing
//! keys fall back to defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExpenseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "expensetracker.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".expensetracker";

/// Run journal database file name inside the config directory.
const JOURNAL_FILE_NAME: &str = "runs.db";

// ---------------------------------------------------------------------------
// Config structs (matching expensetracker.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model inference settings.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Warehouse target settings.
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

/// Which inference backend the stages talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic local generator; no network, no key.
    Mock,
    /// OpenAI-compatible chat completions via OpenRouter.
    OpenRouter,
}

/// `[inference]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used by every stage.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Mock
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[warehouse]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Directory holding one sub-directory per project.
    #[serde(default = "default_warehouse_root")]
    pub root: String,

    /// Name of the env var selecting the target project.
    #[serde(default = "default_project_env")]
    pub project_env: String,

    /// Project used when the env var is unset or empty.
    #[serde(default = "default_project")]
    pub default_project: String,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: default_warehouse_root(),
            project_env: default_project_env(),
            default_project: default_project(),
            dataset: default_dataset(),
            table: default_table(),
        }
    }
}

fn default_warehouse_root() -> String {
    "~/.expensetracker/warehouse".into()
}
fn default_project_env() -> String {
    "EXPENSE_PROJECT_ID".into()
}
fn default_project() -> String {
    "local-expenses".into()
}
fn default_dataset() -> String {
    "finance_data".into()
}
fn default_table() -> String {
    "expenses".into()
}

impl WarehouseConfig {
    /// Resolve the target project from the process environment.
    pub fn resolve_project(&self) -> String {
        self.resolve_project_with(|name| std::env::var(name).ok())
    }

    /// Resolve the target project using `lookup` in place of the environment.
    pub fn resolve_project_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        match lookup(&self.project_env) {
            Some(project) if !project.trim().is_empty() => project.trim().to_string(),
            _ => self.default_project.clone(),
        }
    }

    /// The warehouse root with a leading `~` expanded.
    pub fn root_path(&self) -> Result<PathBuf> {
        expand_home(&self.root)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/").or(if path == "~" { Some("") } else { None }) {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ExpenseError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.expensetracker/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ExpenseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.expensetracker/expensetracker.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Get the path to the run journal database.
pub fn journal_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(JOURNAL_FILE_NAME))
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
    let content = std::fs::read_to_string(path).map_err(|e| ExpenseError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ExpenseError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ExpenseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ExpenseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ExpenseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the inference API key env var is set when the provider needs one.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if config.inference.provider == ProviderKind::Mock {
        return Ok(());
    }
    let var_name = &config.inference.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(ExpenseError::Authentication(format!(
            "inference API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("EXPENSE_PROJECT_ID"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains(r#"provider = "mock""#));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[inference]
provider = "openrouter"
model = "openai/gpt-4o-mini"

[warehouse]
dataset = "team_finance"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.inference.provider, ProviderKind::OpenRouter);
        assert_eq!(config.inference.model, "openai/gpt-4o-mini");
        assert_eq!(config.inference.timeout_secs, 60);
        assert_eq!(config.warehouse.dataset, "team_finance");
        assert_eq!(config.warehouse.table, "expenses");
    }

    #[test]
    fn project_comes_from_env_var_when_set() {
        let warehouse = WarehouseConfig::default();
        let project = warehouse.resolve_project_with(|name| {
            (name == "EXPENSE_PROJECT_ID").then(|| "acme-finance".to_string())
        });
        assert_eq!(project, "acme-finance");
    }

    #[test]
    fn project_falls_back_to_default() {
        let warehouse = WarehouseConfig::default();
        assert_eq!(warehouse.resolve_project_with(|_| None), "local-expenses");
        assert_eq!(
            warehouse.resolve_project_with(|_| Some("   ".into())),
            "local-expenses"
        );
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/wh").unwrap(), PathBuf::from("/tmp/wh"));
        assert_eq!(expand_home("rel/wh").unwrap(), PathBuf::from("rel/wh"));
    }

    #[test]
    fn mock_provider_needs_no_key() {
        let mut config = AppConfig::default();
        config.inference.api_key_env = "EXPENSE_TEST_NONEXISTENT_KEY_12345".into();
        assert!(validate_api_key(&config).is_ok());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        config.inference.provider = ProviderKind::OpenRouter;
        // Use a unique env var name to avoid interfering with other tests
        config.inference.api_key_env = "EXPENSE_TEST_NONEXISTENT_KEY_12345".into();
        let err = validate_api_key(&config).unwrap_err();
        assert!(matches!(err, ExpenseError::Authentication(_)));
        assert!(err.to_string().contains("API key not found"));
    }
}
