use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::DEFAULT_CHANGELOG_COLLECTION;
use crate::guard::DEFAULT_TEST_MARKER;

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "docshift.toml";

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Configuration stored in docshift.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocshiftConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub migrations: MigrationSettings,
    #[serde(default)]
    pub guard: GuardSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            database: default_database(),
        }
    }
}

fn default_store_url() -> String {
    "${DOCSHIFT_STORE_URL}".to_string()
}

fn default_database() -> String {
    "app".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_changelog_collection")]
    pub changelog_collection: String,
    #[serde(default = "default_units_dir")]
    pub dir: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            changelog_collection: default_changelog_collection(),
            dir: default_units_dir(),
        }
    }
}

fn default_changelog_collection() -> String {
    DEFAULT_CHANGELOG_COLLECTION.to_string()
}

fn default_units_dir() -> String {
    "src/units".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default = "default_test_marker")]
    pub test_marker: String,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            test_marker: default_test_marker(),
        }
    }
}

fn default_test_marker() -> String {
    DEFAULT_TEST_MARKER.to_string()
}

/// Project context for docshift operations
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Directory holding docshift.toml, or the starting directory when there is none
    pub project_root: PathBuf,
    /// Path to the config file, when one was found
    pub config_path: Option<PathBuf>,
    /// Directory new unit files are written to
    pub units_dir: PathBuf,
    pub config: DocshiftConfig,
}

impl ProjectContext {
    /// Find and load project context from current directory or ancestors
    pub fn find() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Walk up from `start` looking for docshift.toml. Defaults apply when none exists.
    pub fn find_from(start: &Path) -> Result<Self> {
        let mut current = start.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Self::load(&candidate);
            }
            if !current.pop() {
                break;
            }
        }

        let config = DocshiftConfig::default();
        Ok(Self {
            units_dir: start.join(&config.migrations.dir),
            project_root: start.to_path_buf(),
            config_path: None,
            config,
        })
    }

    /// Load an explicit config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: DocshiftConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let project_root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            units_dir: project_root.join(&config.migrations.dir),
            project_root,
            config_path: Some(path.to_path_buf()),
            config,
        })
    }

    /// The store URL, expanding `${VAR}` references
    pub fn store_url(&self) -> Result<String> {
        expand_env(&self.config.store.url)
    }

    pub fn database(&self) -> Result<String> {
        expand_env(&self.config.store.database)
    }
}

/// Replace every `${VAR}` with the variable's value. Unset variables are an error.
pub fn expand_env(raw: &str) -> Result<String> {
    let mut expanded = String::with_capacity(raw.len());
    let mut last = 0;
    for captures in ENV_VAR.captures_iter(raw) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = std::env::var(name.as_str())
            .with_context(|| format!("Environment variable {} not set", name.as_str()))?;
        expanded.push_str(&raw[last..whole.start()]);
        expanded.push_str(&value);
        last = whole.end();
    }
    expanded.push_str(&raw[last..]);
    Ok(expanded)
}
