use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::errors::{unify_path, SearchError, SearchResult};

const LOCAL_CONFIG: &str = ".filescout.yaml";
const GLOBAL_CONFIG: &str = "filescout/config.yaml";

/// Configuration for one search.
///
/// # Configuration Locations
///
/// Loaded from these locations, later ones taking precedence:
/// 1. Global `$CONFIG_DIR/filescout/config.yaml`
/// 2. Local `.filescout.yaml` in the current directory
/// 3. Custom config file specified via `--config`
///
/// # Configuration Format
///
/// ```yaml
/// # Text to look for (plain substring, no regex)
/// query: "invoice"
///
/// # Directory to search
/// root_path: "/home/me/documents"
///
/// # Also look inside files smaller than 1,000,000 bytes
/// search_contents: true
///
/// case_sensitive: false
///
/// # Worker threads (default: CPU cores)
/// thread_count: 8
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
/// ```
///
/// Command-line arguments take precedence over file values, see
/// [`SearchConfig::merge_with_cli`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Text to search for
    #[serde(default)]
    pub query: String,

    /// Root directory to start search from
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// Whether file contents are searched when the name does not match
    #[serde(default)]
    pub search_contents: bool,

    /// Whether the comparison respects case
    #[serde(default)]
    pub case_sensitive: bool,

    /// Number of worker threads
    /// Defaults to number of CPU cores if not specified
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// The validated, immutable parameters of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Canonical absolute root directory
    pub root_path: PathBuf,
    /// Non-empty query, exactly as supplied
    pub query: String,
    pub search_contents: bool,
    pub case_sensitive: bool,
}

fn default_root_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: String::new(),
            root_path: default_root_path(),
            search_contents: false,
            case_sensitive: false,
            thread_count: default_thread_count(),
            log_level: default_log_level(),
        }
    }
}

impl SearchConfig {
    /// Creates a configuration with default options
    pub fn new(root_path: impl Into<PathBuf>, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            dirs::config_dir().map(|p| p.join(GLOBAL_CONFIG)),
            Some(PathBuf::from(LOCAL_CONFIG)),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli_config: SearchConfig) -> Self {
        if !cli_config.query.is_empty() {
            self.query = cli_config.query;
        }
        if cli_config.root_path != default_root_path() {
            self.root_path = cli_config.root_path;
        }
        if cli_config.search_contents {
            self.search_contents = true;
        }
        if cli_config.case_sensitive {
            self.case_sensitive = true;
        }
        if cli_config.thread_count != default_thread_count() {
            self.thread_count = cli_config.thread_count;
        }
        if cli_config.log_level != default_log_level() {
            self.log_level = cli_config.log_level;
        }
        self
    }

    /// Validates the configuration and freezes it into a request.
    pub fn request(&self) -> SearchResult<SearchRequest> {
        if self.query.is_empty() {
            return Err(SearchError::invalid_request("search query must not be empty"));
        }
        if !self.root_path.exists() {
            return Err(SearchError::invalid_request(format!(
                "root path does not exist: {}",
                self.root_path.display()
            )));
        }
        if !self.root_path.is_dir() {
            return Err(SearchError::invalid_request(format!(
                "root path is not a directory: {}",
                self.root_path.display()
            )));
        }

        Ok(SearchRequest {
            root_path: unify_path(&self.root_path),
            query: self.query.clone(),
            search_contents: self.search_contents,
            case_sensitive: self.case_sensitive,
        })
    }
}
