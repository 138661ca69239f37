use crate::error::{PodrelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bytes per megabyte used for every size comparison.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Runtime parameters for the episode splitter.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Files larger than this (in MB) are split.
    pub size_threshold_mb: f64,
    /// Silence detection parameters.
    pub silence: SilenceConfig,
    /// Maximum distance between an ideal cut and the silence chosen for it.
    pub max_drift: Duration,
    /// Parts at or below this many bytes are treated as corrupt.
    pub min_segment_bytes: u64,
    /// Recursion limit for the bisection fallback.
    pub max_bisect_depth: u32,
    /// Word used in part file names, e.g. `episode_(parte_2).mp3`.
    pub part_label: String,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Config::default().split_config()
    }
}

/// Parameters for the silence scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceConfig {
    /// Energy level (dBFS) below which audio counts as silent.
    pub noise_db: f64,
    /// Minimum length of a silent span.
    pub min_duration: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            noise_db: -30.0,
            min_duration: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub size_threshold_mb: f64,
    pub noise_db: f64,
    pub min_silence_secs: f64,
    pub max_drift_secs: f64,
    pub min_segment_bytes: u64,
    pub max_bisect_depth: u32,
    pub part_label: String,
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_threshold_mb: 50.0,
            noise_db: -30.0,
            min_silence_secs: 0.5,
            max_drift_secs: 10.0,
            min_segment_bytes: (0.1 * BYTES_PER_MB) as u64,
            max_bisect_depth: 4,
            part_label: "parte".to_string(),
            concurrency: 2,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    PodrelayError::Config(format!("{}: {e}", config_path.display()))
                })?;
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from environment-style lookups. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PODRELAY_THRESHOLD_MB").and_then(|v| v.parse().ok()) {
            self.size_threshold_mb = v;
        }
        if let Some(v) = lookup("PODRELAY_MAX_DRIFT").and_then(|v| v.parse().ok()) {
            self.max_drift_secs = v;
        }
        if let Some(v) = lookup("PODRELAY_NOISE_DB").and_then(|v| v.parse().ok()) {
            self.noise_db = v;
        }
        if let Some(v) = lookup("PODRELAY_MIN_SILENCE").and_then(|v| v.parse().ok()) {
            self.min_silence_secs = v;
        }
        if let Some(v) = lookup("PODRELAY_MIN_SEGMENT_BYTES").and_then(|v| v.parse().ok()) {
            self.min_segment_bytes = v;
        }
        if let Some(v) = lookup("PODRELAY_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.concurrency = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.size_threshold_mb.is_finite() && self.size_threshold_mb > 0.0) {
            return Err(PodrelayError::Config(format!(
                "Size threshold must be a positive number of MB, got {}",
                self.size_threshold_mb
            )));
        }

        if !(self.max_drift_secs.is_finite() && self.max_drift_secs >= 0.0) {
            return Err(PodrelayError::Config(format!(
                "Maximum drift must be zero or more seconds, got {}",
                self.max_drift_secs
            )));
        }

        if !(self.min_silence_secs.is_finite() && self.min_silence_secs > 0.0) {
            return Err(PodrelayError::Config(format!(
                "Minimum silence must be a positive number of seconds, got {}",
                self.min_silence_secs
            )));
        }

        if !self.noise_db.is_finite() || self.noise_db > 0.0 {
            return Err(PodrelayError::Config(format!(
                "Noise level is in dBFS and must not be positive, got {}",
                self.noise_db
            )));
        }

        if self.part_label.trim().is_empty() {
            return Err(PodrelayError::Config(
                "Part label must not be empty".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(PodrelayError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the runtime splitter configuration. Call [`Config::validate`] first.
    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            size_threshold_mb: self.size_threshold_mb,
            silence: SilenceConfig {
                noise_db: self.noise_db,
                min_duration: Duration::from_secs_f64(self.min_silence_secs.max(0.0)),
            },
            max_drift: Duration::from_secs_f64(self.max_drift_secs.max(0.0)),
            min_segment_bytes: self.min_segment_bytes,
            max_bisect_depth: self.max_bisect_depth,
            part_label: self.part_label.clone(),
        }
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("podrelay").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.size_threshold_mb, 50.0);
        assert_eq!(config.max_drift_secs, 10.0);
        assert_eq!(config.noise_db, -30.0);
        assert_eq!(config.part_label, "parte");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_split_config_conversion() {
        let split = Config::default().split_config();
        assert_eq!(split.max_drift, Duration::from_secs(10));
        assert_eq!(split.silence.min_duration, Duration::from_millis(500));
        assert_eq!(split.silence, SilenceConfig::default());
        assert_eq!(split.min_segment_bytes, 104_857);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PODRELAY_THRESHOLD_MB", "20"),
            ("PODRELAY_MAX_DRIFT", "4.5"),
            ("PODRELAY_CONCURRENCY", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.size_threshold_mb, 20.0);
        assert_eq!(config.max_drift_secs, 4.5);
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.size_threshold_mb = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_drift_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.noise_db = 6.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("size_threshold_mb = 45.0").unwrap();
        assert_eq!(config.size_threshold_mb, 45.0);
        assert_eq!(config.max_drift_secs, 10.0);
    }
}
