/*!
 * Configuration support for the dental-desert pipeline
 *
 * Provides runtime configuration options for area scoping, synthetic
 * geometry, QA reporting and the live postcode lookup.
 */

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_COARSE_NAMESPACE, DEFAULT_FINE_NAMESPACE, DEFAULT_IN_SCOPE_PREFIX,
    DEFAULT_LIVE_ENDPOINT,
};

/// Global configuration for the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesertConfig {
    /// Leading character of in-scope area codes ("E" for England)
    #[serde(default = "default_in_scope_prefix")]
    pub in_scope_prefix: String,

    /// Namespace prefix of fine-area keys
    #[serde(default = "default_fine_namespace")]
    pub fine_namespace: String,

    /// Namespace prefix of coarse-area keys
    #[serde(default = "default_coarse_namespace")]
    pub coarse_namespace: String,

    /// Population denominator scale for per-area rates
    #[serde(default = "default_rate_per")]
    pub rate_per: f64,

    /// Radius of synthetic fallback boundaries in kilometres
    #[serde(default = "default_synthetic_radius_km")]
    pub synthetic_radius_km: f64,

    /// Number of edge vertices of synthetic fallback boundaries
    #[serde(default = "default_synthetic_vertices")]
    pub synthetic_vertices: usize,

    /// Length of the QA top-N lists
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Whether unresolved postcodes fall through to the live lookup
    #[serde(default)]
    pub enable_live_lookup: bool,

    /// Per-request timeout for the live lookup
    #[serde(default = "default_live_lookup_timeout_secs")]
    pub live_lookup_timeout_secs: u64,

    /// Base URL of the live single-postcode endpoint
    #[serde(default = "default_live_lookup_endpoint")]
    pub live_lookup_endpoint: String,

    /// Whether to show progress bars during long operations
    #[serde(default = "default_enable_progress_bar")]
    pub enable_progress_bar: bool,

    /// Whether pairwise QA distances are computed in parallel
    #[serde(default = "default_parallel_distances")]
    pub parallel_distances: bool,

    /// Error on missing or malformed inputs instead of treating them as empty
    #[serde(default)]
    pub strict_inputs: bool,
}

impl Default for DesertConfig {
    fn default() -> Self {
        Self {
            in_scope_prefix: default_in_scope_prefix(),
            fine_namespace: default_fine_namespace(),
            coarse_namespace: default_coarse_namespace(),
            rate_per: default_rate_per(),
            synthetic_radius_km: default_synthetic_radius_km(),
            synthetic_vertices: default_synthetic_vertices(),
            top_n: default_top_n(),
            enable_live_lookup: false,
            live_lookup_timeout_secs: default_live_lookup_timeout_secs(),
            live_lookup_endpoint: default_live_lookup_endpoint(),
            enable_progress_bar: default_enable_progress_bar(),
            parallel_distances: default_parallel_distances(),
            strict_inputs: false,
        }
    }
}

// Default value functions for serde
fn default_in_scope_prefix() -> String {
    DEFAULT_IN_SCOPE_PREFIX.to_string()
}

fn default_fine_namespace() -> String {
    DEFAULT_FINE_NAMESPACE.to_string()
}

fn default_coarse_namespace() -> String {
    DEFAULT_COARSE_NAMESPACE.to_string()
}

fn default_rate_per() -> f64 {
    crate::constants::RATE_PER
}

fn default_synthetic_radius_km() -> f64 {
    4.0
}

fn default_synthetic_vertices() -> usize {
    18
}

fn default_top_n() -> usize {
    10
}

fn default_live_lookup_timeout_secs() -> u64 {
    4
}

fn default_live_lookup_endpoint() -> String {
    DEFAULT_LIVE_ENDPOINT.to_string()
}

fn default_enable_progress_bar() -> bool {
    true
}

fn default_parallel_distances() -> bool {
    true
}

impl DesertConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Every field can be overridden with a `DENTAL_` prefixed variable,
    /// e.g. `DENTAL_IN_SCOPE_PREFIX=W` or `DENTAL_ENABLE_LIVE_LOOKUP=true`.
    /// Unparseable values leave the defaults in place.
    pub fn from_env() -> Self {
        Self::layered(None).unwrap_or_else(|e| {
            log::warn!("Ignoring environment configuration: {}", e);
            Self::default()
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::DesertError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional TOML file under `DENTAL_*` environment variables
    pub fn layered(file: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("DENTAL").try_parsing(true))
            .build()
            .map_err(|e| crate::DesertError::Configuration {
                message: format!("Failed to assemble configuration: {}", e),
                suggestion: None,
            })?;
        let config: Self = settings.try_deserialize()
            .map_err(|e| crate::DesertError::Configuration {
                message: format!("Invalid configuration value: {}", e),
                suggestion: Some("Check DENTAL_* environment variables and the config file".to_string()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::DesertError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.in_scope_prefix.chars().count() != 1 {
            return Err(crate::DesertError::Configuration {
                message: format!("in_scope_prefix must be a single character, got '{}'", self.in_scope_prefix),
                suggestion: Some("Use a country letter such as \"E\" or \"W\"".to_string()),
            });
        }
        if self.synthetic_vertices < 3 {
            return Err(crate::DesertError::Configuration {
                message: format!("synthetic_vertices must be at least 3, got {}", self.synthetic_vertices),
                suggestion: None,
            });
        }
        if !(self.synthetic_radius_km > 0.0) || !(self.rate_per > 0.0) {
            return Err(crate::DesertError::Configuration {
                message: "synthetic_radius_km and rate_per must be positive".to_string(),
                suggestion: None,
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/dental-deserts/config.toml` on Unix-like systems
    /// or `%APPDATA%\dental-deserts\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dental-deserts")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists), overridden by environment variables
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                match Self::layered(Some(config_path.as_path())) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring {}: {}", config_path.display(), e),
                }
            }
        }

        Self::from_env()
    }

    /// Configuration for runs without network access
    pub fn offline() -> Self {
        Self {
            enable_live_lookup: false,
            enable_progress_bar: false,
            ..Self::default()
        }
    }

    /// Configuration that resolves cache misses through the live lookup
    pub fn online() -> Self {
        Self {
            enable_live_lookup: true,
            ..Self::default()
        }
    }
}

// Global configuration support
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<DesertConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: DesertConfig) {
    if let Ok(mut guard) = GLOBAL_CONFIG.write() {
        *guard = Some(config);
    }
}

/// Get the global configuration (or the loaded default if not set)
pub fn global_config() -> DesertConfig {
    GLOBAL_CONFIG.read()
        .ok()
        .and_then(|guard| guard.as_ref().cloned())
        .unwrap_or_else(DesertConfig::load)
}

/// Clear the global configuration
pub fn clear_global_config() {
    if let Ok(mut guard) = GLOBAL_CONFIG.write() {
        *guard = None;
    }
}

/// Builder for customizing configuration
#[derive(Default)]
pub struct ConfigBuilder {
    config: DesertConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: DesertConfig::default(),
        }
    }

    /// Set the in-scope country prefix
    pub fn in_scope_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.in_scope_prefix = prefix.into();
        self
    }

    /// Set the synthetic boundary radius
    pub fn synthetic_radius_km(mut self, radius: f64) -> Self {
        self.config.synthetic_radius_km = radius;
        self
    }

    /// Set the number of synthetic boundary vertices
    pub fn synthetic_vertices(mut self, vertices: usize) -> Self {
        self.config.synthetic_vertices = vertices;
        self
    }

    /// Set the QA top-N length
    pub fn top_n(mut self, n: usize) -> Self {
        self.config.top_n = n;
        self
    }

    /// Enable or disable the live lookup
    pub fn live_lookup(mut self, enabled: bool) -> Self {
        self.config.enable_live_lookup = enabled;
        self
    }

    /// Set the live lookup timeout
    pub fn live_lookup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.live_lookup_timeout_secs = secs;
        self
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    /// Set parallel distance computation
    pub fn parallel_distances(mut self, enabled: bool) -> Self {
        self.config.parallel_distances = enabled;
        self
    }

    /// Set strict input handling
    pub fn strict_inputs(mut self, strict: bool) -> Self {
        self.config.strict_inputs = strict;
        self
    }

    /// Build the configuration
    pub fn build(self) -> DesertConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DesertConfig::default();
        assert_eq!(config.in_scope_prefix, "E");
        assert_eq!(config.fine_namespace, "LSOA::");
        assert_eq!(config.coarse_namespace, "MSOA::");
        assert_eq!(config.synthetic_vertices, 18);
        assert_eq!(config.live_lookup_timeout_secs, 4);
        assert!(!config.enable_live_lookup);
        assert!(!config.strict_inputs);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .in_scope_prefix("W")
            .progress_bar(false)
            .live_lookup(true)
            .top_n(5)
            .strict_inputs(true)
            .build();

        assert_eq!(config.in_scope_prefix, "W");
        assert!(!config.enable_progress_bar);
        assert!(config.enable_live_lookup);
        assert_eq!(config.top_n, 5);
        assert!(config.strict_inputs);
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let config = ConfigBuilder::new().in_scope_prefix("EN").build();
        assert!(config.validate().is_err());
        let config = ConfigBuilder::new().synthetic_vertices(2).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_fills_defaults() {
        let config: DesertConfig = toml::from_str("in_scope_prefix = \"W\"\ntop_n = 3\n").unwrap();
        assert_eq!(config.in_scope_prefix, "W");
        assert_eq!(config.top_n, 3);
        assert_eq!(config.coarse_namespace, "MSOA::");
        assert_eq!(config.synthetic_radius_km, 4.0);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ConfigBuilder::new().top_n(7).build();
        config.save(&path).unwrap();
        let loaded = DesertConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
