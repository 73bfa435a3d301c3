// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for pixsort

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Classifier backend settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Renaming and ingestion rules
    #[serde(default)]
    pub rules: RuleConfig,

    /// Output archive settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    /// Backend name (currently only "ollama")
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Class names the model may answer with. Empty accepts any answer.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    /// What to do when one file cannot be classified
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Format written to temporary storage for each upload
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_name")]
    pub file_name: String,
    /// Deflate level; `None` uses the zip crate default
    #[serde(default)]
    pub compression_level: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    /// Idle sessions older than this are dropped with their storage
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

/// Policy applied when the classifier fails on a single file
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the whole batch on the first failure
    Abort,
    /// Keep the file under its upload name, record it and continue
    #[default]
    Skip,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown failure policy '{}' (expected abort or skip)", other)),
        }
    }
}

/// How uploads are written to temporary storage
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Re-encode every upload as JPEG (`.jpg`)
    #[default]
    Jpeg,
    /// Keep the uploaded bytes and extension
    Original,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "original" => Ok(Self::Original),
            other => Err(format!("unknown output format '{}' (expected jpeg or original)", other)),
        }
    }
}

/// Highest accepted `classifier.retries`
pub const MAX_RETRIES: u32 = 10;

// Default value functions
fn default_backend() -> String { "ollama".to_string() }
fn default_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "moondream".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 2 }
fn default_extensions() -> Vec<String> {
    vec!["jpg", "jpeg", "png"].into_iter().map(String::from).collect()
}
fn default_archive_name() -> String { "classified_images.zip".to_string() }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }
fn default_max_upload_mb() -> usize { 256 }
fn default_session_ttl() -> u64 { 3600 }

fn default_prompt() -> String {
    "Classify this image. Answer with exactly one of these class names and nothing else: {labels}"
        .to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_url(),
            model: default_model(),
            labels: Vec::new(),
            prompt: default_prompt(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::default(),
            output_format: OutputFormat::default(),
            allowed_extensions: default_extensions(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            file_name: default_archive_name(),
            compression_level: None,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            max_upload_mb: default_max_upload_mb(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::PixsortError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would make every run fail
    pub fn validate(&self) -> crate::Result<()> {
        if self.rules.allowed_extensions.is_empty() {
            return Err(crate::PixsortError::Config(
                "rules.allowed_extensions must not be empty".to_string(),
            ));
        }
        if self.archive.file_name.trim().is_empty() {
            return Err(crate::PixsortError::Config(
                "archive.file_name must not be empty".to_string(),
            ));
        }
        if let Some(level) = self.archive.compression_level {
            if !(0..=9).contains(&level) {
                return Err(crate::PixsortError::Config(format!(
                    "archive.compression_level must be between 0 and 9, got {}",
                    level
                )));
            }
        }
        if self.classifier.retries > MAX_RETRIES {
            return Err(crate::PixsortError::Config(format!(
                "classifier.retries must be at most {}, got {}",
                MAX_RETRIES, self.classifier.retries
            )));
        }
        if self.classifier.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(crate::PixsortError::Config(
                "classifier.labels must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.archive.file_name, "classified_images.zip");
        assert_eq!(config.rules.on_failure, FailurePolicy::Skip);
        assert_eq!(config.rules.output_format, OutputFormat::Jpeg);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "classifier": { "labels": ["cat_images", "dog_images"] },
                 "rules": { "on_failure": "abort" } }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.classifier.labels.len(), 2);
        assert_eq!(config.classifier.model, "moondream");
        assert_eq!(config.rules.on_failure, FailurePolicy::Abort);
        assert_eq!(config.web.port, 8080);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.rules.output_format = OutputFormat::Original;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.rules.output_format, OutputFormat::Original);
    }

    #[test]
    fn test_rejects_bad_compression_level() {
        let mut config = AppConfig::default();
        config.archive.compression_level = Some(12);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_too_many_retries() {
        let mut config = AppConfig::default();
        config.classifier.retries = MAX_RETRIES;
        assert!(config.validate().is_ok());
        config.classifier.retries = u32::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("ABORT".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert!("ignore".parse::<FailurePolicy>().is_err());
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
    }
}
