//! Hop configuration
//!
//! Loads the TOML configuration file, applies defaults, resolves the data
//! directory and validates the result.
//!
//! # Example
//!
//! ```toml
//! [data]
//! dir = "./data"
//!
//! [acme]
//! client = "lego"
//! email = "ops@example.com"
//! renew_before_days = 30
//! check_interval_hours = 24
//! ```
//!
//! # Data Directory Layout
//!
//! ```text
//! data/
//! ├── hop-ssl.json          # Certificate and DNS provider records
//! ├── lego/                 # External ACME client working directory
//! │   └── certificates/
//! └── nginx/
//!     └── ssl/              # Managed certificate and key files
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Failed to resolve data directory {path}: {source}")]
    ResolveDataDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create data directory {path}: {source}")]
    CreateDataDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct HopConfig {
    #[serde(default)]
    #[validate(nested)]
    pub data: DataConfig,

    #[serde(default)]
    #[validate(nested)]
    pub acme: AcmeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DataConfig {
    /// Root of all persisted state. Relative paths are resolved against the
    /// directory holding the configuration file.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

/// External ACME client and renewal settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// ACME client binary, looked up on PATH unless absolute
    #[serde(default = "default_client")]
    #[validate(length(min = 1))]
    pub client: String,

    /// Default contact email used by the renewal scheduler
    #[serde(default)]
    #[validate(email)]
    pub email: Option<String>,

    /// Certificates expiring within this many days are renewed
    #[serde(default = "default_renew_before_days")]
    #[validate(range(min = 1, max = 89))]
    pub renew_before_days: u32,

    /// Hours between renewal sweeps
    #[serde(default = "default_check_interval_hours")]
    #[validate(range(min = 1))]
    pub check_interval_hours: u64,

    /// Upper bound on a single ACME client invocation
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 30))]
    pub timeout_secs: u64,

    /// Run the renewal scheduler alongside `hop-ssl run`
    #[serde(default = "default_auto_renew")]
    pub auto_renew: bool,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            client: default_client(),
            email: None,
            renew_before_days: default_renew_before_days(),
            check_interval_hours: default_check_interval_hours(),
            timeout_secs: default_timeout_secs(),
            auto_renew: default_auto_renew(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_client() -> String {
    "lego".to_string()
}

fn default_renew_before_days() -> u32 {
    30
}

fn default_check_interval_hours() -> u64 {
    24
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_auto_renew() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Filesystem locations derived from the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Managed certificate/key directory read by the nginx layer
    pub ssl_dir: PathBuf,
    /// ACME client working directory (`--path`)
    pub work_dir: PathBuf,
    /// Record store file
    pub store_file: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            ssl_dir: data_dir.join("nginx").join("ssl"),
            work_dir: data_dir.join("lego"),
            store_file: data_dir.join("hop-ssl.json"),
            data_dir,
        }
    }
}

impl HopConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing sections fall back to defaults. The data directory is resolved
    /// relative to the file's directory, made absolute and created if absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml(&content)?;
        config.prepare_data_dir(path.parent())?;

        info!(
            config_path = %path.display(),
            data_dir = %config.data.dir.display(),
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Pin the data directory to an absolute path and create it
    ///
    /// A relative directory is joined onto `base`, then onto the current
    /// directory.
    pub fn prepare_data_dir(&mut self, base: Option<&Path>) -> Result<(), ConfigError> {
        let mut dir = self.data.dir.clone();
        if let Some(base) = base.filter(|_| dir.is_relative()) {
            dir = base.join(dir);
        }

        let dir = std::path::absolute(&dir)
            .map_err(|source| ConfigError::ResolveDataDir { path: dir.clone(), source })?;
        fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDataDir {
            path: dir.clone(),
            source,
        })?;

        self.data.dir = dir;
        Ok(())
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// Does not touch the filesystem; relative data directories are kept as-is.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;

        debug!(
            client = %config.acme.client,
            renew_before_days = config.acme.renew_before_days,
            check_interval_hours = config.acme.check_interval_hours,
            "Parsed configuration"
        );

        Ok(config)
    }

    /// Filesystem layout rooted at the configured data directory
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data.dir)
    }
}

/// Render the commented default configuration file
pub fn generate_default() -> String {
    r#"# Hop certificate manager configuration

[data]
# Data directory (relative paths are resolved against this file's directory).
# Holds the record store, the ACME client working directory and the managed
# certificates under nginx/ssl/.
dir = "./data"

[acme]
# External ACME client binary (looked up on PATH unless absolute)
client = "lego"
# Contact email used for scheduled renewals
# email = "ops@example.com"
# Renew certificates that expire within this many days
renew_before_days = 30
# Hours between renewal checks
check_interval_hours = 24
# Upper bound on a single ACME client run, in seconds
timeout_secs = 900
# Run the renewal scheduler with `hop-ssl run`
auto_renew = true

[logging]
# trace, debug, info, warn, error (RUST_LOG overrides)
level = "info"
# text or json
format = "text"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HopConfig::from_toml("").unwrap();
        assert_eq!(config.acme.client, "lego");
        assert_eq!(config.acme.renew_before_days, 30);
        assert_eq!(config.acme.check_interval_hours, 24);
        assert!(config.acme.email.is_none());
        assert!(config.acme.auto_renew);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_generated_default_parses() {
        let config = HopConfig::from_toml(&generate_default()).unwrap();
        assert_eq!(config.data.dir, PathBuf::from("./data"));
        assert_eq!(config.acme.timeout_secs, 900);
    }

    #[test]
    fn test_invalid_email_rejected() {
        let result = HopConfig::from_toml(
            r#"
            [acme]
            email = "not-an-email"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_renew_window_out_of_range() {
        let result = HopConfig::from_toml(
            r#"
            [acme]
            renew_before_days = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_prepare_data_dir_is_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = HopConfig::default();
        config.data.dir = PathBuf::from("nested/state");

        config.prepare_data_dir(Some(temp_dir.path())).unwrap();

        assert!(config.data.dir.is_absolute());
        assert_eq!(config.data.dir, temp_dir.path().join("nested/state"));
        assert!(config.data.dir.is_dir());

        // Already absolute directories are kept
        let before = config.data.dir.clone();
        config.prepare_data_dir(Some(Path::new("/elsewhere"))).unwrap();
        assert_eq!(config.data.dir, before);
    }

    #[test]
    fn test_prepare_data_dir_without_base() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = HopConfig::default();
        config.data.dir = temp_dir.path().join("state");

        config.prepare_data_dir(None).unwrap();
        assert_eq!(config.data.dir, temp_dir.path().join("state"));
        assert!(config.data.dir.is_dir());
    }

    #[test]
    fn test_load_resolves_relative_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("hop.toml");
        fs::write(
            &config_path,
            r#"
            [data]
            dir = "state"

            [acme]
            email = "ops@example.com"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        let config = HopConfig::load(&config_path).unwrap();
        assert!(config.data.dir.is_absolute());
        assert_eq!(config.data.dir, temp_dir.path().join("state"));
        assert!(config.data.dir.is_dir());
        assert_eq!(config.acme.email.as_deref(), Some("ops@example.com"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_missing_file() {
        let result = HopConfig::load("/nonexistent/hop.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_layout() {
        let layout = DataLayout::new("/srv/hop");
        assert_eq!(layout.ssl_dir, PathBuf::from("/srv/hop/nginx/ssl"));
        assert_eq!(layout.work_dir, PathBuf::from("/srv/hop/lego"));
        assert_eq!(layout.store_file, PathBuf::from("/srv/hop/hop-ssl.json"));
    }
}
