//! Server configuration.
//!
//! Values come from, lowest precedence first: built-in defaults, an optional
//! TOML file (`--config <path>` or `<W>/.claude/todo-mcp.toml`), then CLI
//! flags and `TODO_MCP_*` environment variables applied by the binary.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::STATE_DIR;

/// File name of the per-project configuration file.
pub const CONFIG_FILE: &str = "todo-mcp.toml";

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    30
}

fn default_idle_threshold_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

fn default_indexer_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_auto_archive() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Manager factory tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Consecutive creation failures before the breaker opens.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long an open breaker short-circuits creation.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Idle time after which a cached manager set is evicted.
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,

    /// Period of the eviction sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on opening a search index.
    #[serde(default = "default_indexer_timeout_secs")]
    pub indexer_timeout_secs: u64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            idle_threshold_secs: default_idle_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            indexer_timeout_secs: default_indexer_timeout_secs(),
        }
    }
}

impl FactoryConfig {
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub fn indexer_timeout(&self) -> Duration {
        Duration::from_secs(self.indexer_timeout_secs)
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_secs(mut self, secs: u64) -> Self {
        self.backoff_secs = secs;
        self
    }

    #[must_use]
    pub fn with_idle_threshold_secs(mut self, secs: u64) -> Self {
        self.idle_threshold_secs = secs;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn with_indexer_timeout_secs(mut self, secs: u64) -> Self {
        self.indexer_timeout_secs = secs;
        self
    }

    /// Validates the factory settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any attempt count or interval is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("factory.max_attempts must be at least 1".to_string());
        }
        let intervals = [
            ("backoff_secs", self.backoff_secs),
            ("idle_threshold_secs", self.idle_threshold_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("indexer_timeout_secs", self.indexer_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(format!("factory.{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Working directory used when a request carries none.
    #[serde(default = "default_working_dir")]
    pub default_working_dir: PathBuf,

    /// Overrides `<W>/.claude/templates` for every working directory.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,

    /// Archive todos as soon as they are completed.
    #[serde(default = "default_auto_archive")]
    pub auto_archive: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deadline applied to every tool call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub factory: FactoryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_working_dir: default_working_dir(),
            template_dir: None,
            auto_archive: default_auto_archive(),
            log_level: default_log_level(),
            request_timeout_secs: default_request_timeout_secs(),
            factory: FactoryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the project configuration file under `working_dir`.
    #[must_use]
    pub fn config_path(working_dir: &Path) -> PathBuf {
        working_dir.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load `explicit` if given, else the project file under `working_dir`
    /// when it exists, else defaults rooted at `working_dir`.
    ///
    /// # Errors
    ///
    /// Fails when a config file exists but is invalid.
    pub fn load_or_default(explicit: Option<&Path>, working_dir: &Path) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let project = Self::config_path(working_dir);
        if project.is_file() {
            let mut config = Self::load(&project)?;
            if config.default_working_dir.as_os_str().is_empty() {
                config.default_working_dir = working_dir.to_path_buf();
            }
            return Ok(config);
        }
        Ok(Self::new(working_dir))
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_working_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_auto_archive(mut self, enabled: bool) -> Self {
        self.auto_archive = enabled;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_factory(mut self, factory: FactoryConfig) -> Self {
        self.factory = factory;
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The default working directory does not exist
    /// - The template override is set but is not a directory
    /// - The request timeout or any factory interval is zero
    pub fn validate(&self) -> Result<(), String> {
        if !self.default_working_dir.is_dir() {
            return Err(format!(
                "Default working directory does not exist: {}",
                self.default_working_dir.display()
            ));
        }
        if let Some(dir) = &self.template_dir {
            if !dir.is_dir() {
                return Err(format!("Template directory is not readable: {}", dir.display()));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }
        self.factory.validate()
    }
}
