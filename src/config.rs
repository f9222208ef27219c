//! YAML Configuration File Support for ACFP
//!
//! All stage configurations (spectral front-end, fingerprinting, index and
//! matcher) plus logging live in a single YAML document that is loaded and
//! validated at startup. Every section is optional and falls back to the
//! reference defaults.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! # ACFP Configuration
//! version: "1.0"
//! name: "corpus"
//!
//! spectral:
//!   sample_rate: 5512
//!   window_size: 2048
//!   hop_size: 64
//!   min_frequency: 318.0
//!   max_frequency: 2000.0
//!   log_bins: 32
//!   log_base: "fixed"
//!   window: "hann"
//!
//! fingerprint:
//!   version: 1
//!   fingerprint_length: 128
//!   top_wavelets: 200
//!   insertion_stride:
//!     type: incremental_static
//!     increment: 5115
//!     first: 0
//!   query_stride:
//!     type: incremental_random
//!     min: 256
//!     max: 512
//!     first: 0
//!
//! index:
//!   backend: "redb"
//!   path: "/var/lib/acfp/index.redb"
//!   compression: "zstd"
//!   lsh:
//!     tables: 25
//!     keys_per_table: 4
//!
//! matcher:
//!   threshold_tables: 0
//!   max_results: 10
//!   distance: "hamming"
//!
//! logging:
//!   level: "info"
//!   json: false
//! ```

use std::fs;
use std::path::Path;

use index::{BackendConfig, CompressionCodec, CompressionConfig, IndexConfig, LshConfig};
use matcher::MatchConfig;
use perceptual::FingerprintConfig;
use serde::{Deserialize, Serialize};
use spectral::{LogBase, SpectralConfig, StrideConfig, WindowFunction};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration structure for ACFP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AcfpConfig {
    /// Configuration format version
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub spectral: SpectralYamlConfig,

    #[serde(default)]
    pub fingerprint: FingerprintYamlConfig,

    #[serde(default)]
    pub index: IndexYamlConfig,

    /// Default query parameters; individual queries may override them.
    #[serde(default)]
    pub matcher: MatchConfig,

    #[serde(default)]
    pub logging: LoggingYamlConfig,
}

impl AcfpConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: AcfpConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Point the index at a redb file, replacing the configured backend.
    pub fn with_redb_path(mut self, path: impl Into<String>) -> Self {
        self.index.backend = "redb".to_string();
        self.index.path = Some(path.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.spectral.validate()?;
        self.fingerprint_config()
            .validate()
            .map_err(|e| section_error("fingerprint", e))?;
        self.fingerprint
            .query_stride
            .validate()
            .map_err(|e| section_error("fingerprint.query_stride", e))?;
        self.index.validate()?;
        self.index_config()
            .validate()
            .map_err(|e| section_error("index", e))?;
        self.matcher
            .validate()
            .map_err(|e| section_error("matcher", e))?;
        if self.matcher.threshold_tables > self.index.lsh.tables {
            return Err(ConfigLoadError::Validation(format!(
                "matcher.threshold_tables ({}) exceeds index.lsh.tables ({})",
                self.matcher.threshold_tables, self.index.lsh.tables
            )));
        }
        self.logging.validate()?;

        Ok(())
    }

    pub fn spectral_config(&self) -> SpectralConfig {
        self.spectral.to_spectral_config()
    }

    /// Fingerprint pipeline configuration, using the insertion stride.
    pub fn fingerprint_config(&self) -> FingerprintConfig {
        FingerprintConfig {
            version: self.fingerprint.version,
            spectral: self.spectral_config(),
            fingerprint_length: self.fingerprint.fingerprint_length,
            top_wavelets: self.fingerprint.top_wavelets,
            stride: self.fingerprint.insertion_stride.clone(),
            use_parallel: self.fingerprint.use_parallel,
        }
    }

    pub fn query_stride(&self) -> StrideConfig {
        self.fingerprint.query_stride.clone()
    }

    pub fn index_config(&self) -> IndexConfig {
        self.index.to_index_config()
    }
}

impl Default for AcfpConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            spectral: SpectralYamlConfig::default(),
            fingerprint: FingerprintYamlConfig::default(),
            index: IndexYamlConfig::default(),
            matcher: MatchConfig::default(),
            logging: LoggingYamlConfig::default(),
        }
    }
}

fn section_error(section: &str, err: impl std::fmt::Display) -> ConfigLoadError {
    ConfigLoadError::Validation(format!("{section}: {err}"))
}

/// Spectral front-end YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralYamlConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_hop_size")]
    pub hop_size: usize,

    #[serde(default = "default_min_frequency")]
    pub min_frequency: f64,

    #[serde(default = "default_max_frequency")]
    pub max_frequency: f64,

    #[serde(default = "default_log_bins")]
    pub log_bins: usize,

    /// "fixed" or "dynamic"
    #[serde(default = "default_log_base")]
    pub log_base: String,

    /// Base used when `log_base` is "fixed"
    #[serde(default = "default_log_base_value")]
    pub log_base_value: f64,

    /// "hann", "hamming" or "rectangular"
    #[serde(default = "default_window")]
    pub window: String,

    #[serde(default = "true_value")]
    pub normalize: bool,

    #[serde(default)]
    pub use_parallel: bool,
}

impl SpectralYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_bases = ["fixed", "dynamic"];
        if !valid_bases.contains(&self.log_base.as_str()) {
            return Err(ConfigLoadError::Validation(format!(
                "spectral.log_base must be one of: {valid_bases:?}"
            )));
        }
        let valid_windows = ["hann", "hamming", "rectangular"];
        if !valid_windows.contains(&self.window.as_str()) {
            return Err(ConfigLoadError::Validation(format!(
                "spectral.window must be one of: {valid_windows:?}"
            )));
        }
        self.to_spectral_config()
            .validate()
            .map_err(|e| section_error("spectral", e))
    }

    fn to_spectral_config(&self) -> SpectralConfig {
        let log_base = match self.log_base.as_str() {
            "dynamic" => LogBase::Dynamic,
            _ => LogBase::Fixed {
                base: self.log_base_value,
            },
        };
        let window = match self.window.as_str() {
            "hamming" => WindowFunction::Hamming,
            "rectangular" => WindowFunction::Rectangular,
            _ => WindowFunction::Hann,
        };
        SpectralConfig {
            sample_rate: self.sample_rate,
            window_size: self.window_size,
            hop_size: self.hop_size,
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
            log_bins: self.log_bins,
            log_base,
            window,
            normalize: self.normalize,
            use_parallel: self.use_parallel,
        }
    }
}

impl Default for SpectralYamlConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            window_size: default_window_size(),
            hop_size: default_hop_size(),
            min_frequency: default_min_frequency(),
            max_frequency: default_max_frequency(),
            log_bins: default_log_bins(),
            log_base: default_log_base(),
            log_base_value: default_log_base_value(),
            window: default_window(),
            normalize: true,
            use_parallel: false,
        }
    }
}

/// Fingerprinting YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintYamlConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_fingerprint_length")]
    pub fingerprint_length: usize,

    #[serde(default = "default_top_wavelets")]
    pub top_wavelets: usize,

    /// Stride between images when indexing a track
    #[serde(default = "StrideConfig::insertion_default")]
    pub insertion_stride: StrideConfig,

    /// Stride between probe images when querying
    #[serde(default = "StrideConfig::query_default")]
    pub query_stride: StrideConfig,

    #[serde(default)]
    pub use_parallel: bool,
}

impl Default for FingerprintYamlConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            fingerprint_length: default_fingerprint_length(),
            top_wavelets: default_top_wavelets(),
            insertion_stride: StrideConfig::insertion_default(),
            query_stride: StrideConfig::query_default(),
            use_parallel: false,
        }
    }
}

/// Index YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexYamlConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Database file, required when backend is "redb"
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_compression")]
    pub compression: String,

    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    #[serde(default)]
    pub lsh: LshConfig,
}

impl IndexYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["in_memory", "redb"];
        if !valid_backends.contains(&self.backend.as_str()) {
            return Err(ConfigLoadError::Validation(format!(
                "index.backend must be one of: {valid_backends:?}"
            )));
        }

        if self.backend == "redb" && self.path.is_none() {
            return Err(ConfigLoadError::Validation(
                "index.path is required when backend is 'redb'".to_string(),
            ));
        }

        let valid_compression = ["zstd", "none"];
        if !valid_compression.contains(&self.compression.as_str()) {
            return Err(ConfigLoadError::Validation(format!(
                "index.compression must be one of: {valid_compression:?}"
            )));
        }

        Ok(())
    }

    fn to_index_config(&self) -> IndexConfig {
        let backend = match (self.backend.as_str(), &self.path) {
            ("redb", Some(path)) => BackendConfig::redb(path.clone()),
            _ => BackendConfig::in_memory(),
        };
        let codec = match self.compression.as_str() {
            "none" => CompressionCodec::None,
            _ => CompressionCodec::Zstd,
        };
        IndexConfig::new()
            .with_backend(backend)
            .with_compression(CompressionConfig::new(codec, self.compression_level))
            .with_lsh(self.lsh)
    }
}

impl Default for IndexYamlConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            compression: default_compression(),
            compression_level: default_compression_level(),
            lsh: LshConfig::default(),
        }
    }
}

/// Logging YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingYamlConfig {
    /// Default filter level; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl LoggingYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigLoadError::Validation(format!(
                "logging.level must be one of: {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

impl Default for LoggingYamlConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Helper functions for serde defaults
fn default_version() -> u32 {
    1
}
fn true_value() -> bool {
    true
}
fn default_sample_rate() -> u32 {
    5512
}
fn default_window_size() -> usize {
    2048
}
fn default_hop_size() -> usize {
    64
}
fn default_min_frequency() -> f64 {
    318.0
}
fn default_max_frequency() -> f64 {
    2000.0
}
fn default_log_bins() -> usize {
    32
}
fn default_log_base() -> String {
    "fixed".to_string()
}
fn default_log_base_value() -> f64 {
    2.0
}
fn default_window() -> String {
    "hann".to_string()
}
fn default_fingerprint_length() -> usize {
    128
}
fn default_top_wavelets() -> usize {
    200
}
fn default_backend() -> String {
    "in_memory".to_string()
}
fn default_compression() -> String {
    "zstd".to_string()
}
fn default_compression_level() -> i32 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matcher::DistanceKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "test config"
fingerprint:
  top_wavelets: 150
matcher:
  threshold_tables: 2
  distance: "jaccard"
"#;

        let config = AcfpConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.name, Some("test config".to_string()));
        assert_eq!(config.fingerprint.top_wavelets, 150);
        assert_eq!(config.fingerprint.fingerprint_length, 128);
        assert_eq!(config.matcher.threshold_tables, 2);
        assert_eq!(config.matcher.distance, DistanceKind::Jaccard);
        assert_eq!(config.matcher.max_results, 10);
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
version: "1"
spectral:
  log_base: "dynamic"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = AcfpConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.spectral_config().log_base, LogBase::Dynamic);
    }

    #[test]
    fn test_default_config() {
        let config = AcfpConfig::default();
        assert!(config.validate().is_ok());

        let fp = config.fingerprint_config();
        assert_eq!(fp, FingerprintConfig::default());
        assert_eq!(fp.fingerprint_bits(), 8192);
        assert_eq!(config.query_stride(), StrideConfig::query_default());

        let index = config.index_config();
        assert_eq!(index.backend, BackendConfig::InMemory);
        assert_eq!(index.lsh, LshConfig::default());
    }

    #[test]
    fn test_unsupported_version() {
        let result = AcfpConfig::from_yaml("version: \"2.0\"\n");
        assert!(matches!(
            result,
            Err(ConfigLoadError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn test_spectral_validation() {
        let yaml = r#"
version: "1.0"
spectral:
  window: "blackman"
"#;
        let result = AcfpConfig::from_yaml(yaml);
        assert!(result.unwrap_err().to_string().contains("spectral.window"));

        let yaml = r#"
version: "1.0"
spectral:
  max_frequency: 4000.0
"#;
        let result = AcfpConfig::from_yaml(yaml);
        assert!(result.unwrap_err().to_string().contains("Nyquist"));
    }

    #[test]
    fn test_redb_requires_path() {
        let yaml = r#"
version: "1.0"
index:
  backend: "redb"
"#;
        let result = AcfpConfig::from_yaml(yaml);
        assert!(result.unwrap_err().to_string().contains("index.path"));

        let config = AcfpConfig::default().with_redb_path("/tmp/acfp.redb");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.index_config().backend,
            BackendConfig::redb("/tmp/acfp.redb")
        );
    }

    #[test]
    fn test_threshold_bounded_by_tables() {
        let yaml = r#"
version: "1.0"
index:
  lsh:
    tables: 20
matcher:
  threshold_tables: 21
"#;
        let result = AcfpConfig::from_yaml(yaml);
        assert!(result.unwrap_err().to_string().contains("threshold_tables"));
    }

    #[test]
    fn test_stride_yaml() {
        let yaml = r#"
version: "1.0"
fingerprint:
  insertion_stride:
    type: static
    stride: -4096
    first: 0
  query_stride:
    type: incremental_random
    min: 512
    max: 256
    first: 0
"#;
        let result = AcfpConfig::from_yaml(yaml);
        assert!(result.unwrap_err().to_string().contains("query_stride"));
    }
}
