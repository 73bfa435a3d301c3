// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image classifier backends

pub mod ollama;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::ClassifierConfig;
use crate::{PixsortError, Result};

/// Trait for image classifiers
///
/// A classifier maps one image file to a label such as `cat_images`.
/// Implementations are treated as opaque: the caller only relies on the
/// returned string.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Name of this backend
    fn name(&self) -> &'static str;

    /// Predict the label of the image at `path`
    async fn classify(&self, path: &Path) -> Result<String>;

    /// Check that the backend is reachable and ready
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the classifier selected in the configuration
pub fn from_config(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match config.backend.to_ascii_lowercase().as_str() {
        "ollama" => Ok(Arc::new(ollama::OllamaClassifier::new(config)?)),
        other => Err(PixsortError::Config(format!(
            "Unknown classifier backend '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backend() {
        let config = ClassifierConfig {
            backend: "onnx".to_string(),
            ..ClassifierConfig::default()
        };
        assert!(matches!(from_config(&config), Err(PixsortError::Config(_))));
    }

    #[test]
    fn test_ollama_backend() {
        let classifier = from_config(&ClassifierConfig::default()).unwrap();
        assert_eq!(classifier.name(), "ollama");
    }
}
