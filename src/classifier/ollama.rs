// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classifier backed by a local Ollama vision model

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::Classifier;
use crate::config::ClassifierConfig;
use crate::{PixsortError, Result};

/// Longest side sent to the model
const MAX_DIMENSION: u32 = 1024;

/// Upper bound for one retry wait
const MAX_BACKOFF_SECS: u64 = 30;

/// Classifier that asks an Ollama vision model to pick one of the configured labels
pub struct OllamaClassifier {
    client: Client,
    base_url: String,
    model: String,
    prompt: String,
    labels: Vec<String>,
    retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    images: Vec<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Accept both the server root and a full endpoint URL
        let base_url = config.url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        let label_list = if config.labels.is_empty() {
            "any short lowercase name such as cat_images".to_string()
        } else {
            config.labels.join(", ")
        };
        let prompt = config.prompt.replace("{labels}", &label_list);

        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            prompt,
            labels: config.labels.clone(),
            retries: config.retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// List models installed on the Ollama server
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if the configured model is installed
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| {
            m.starts_with(&self.model) || m == &format!("{}:latest", self.model)
        }))
    }

    /// Resize large images and re-encode them as JPEG for the model
    fn prepare_image(path: &Path) -> Result<Vec<u8>> {
        let img = image::open(path)?;

        let img = if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
            img.resize(MAX_DIMENSION, MAX_DIMENSION, image::imageops::FilterType::Triangle)
        } else {
            img
        };

        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        image::DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut cursor, image::ImageFormat::Jpeg)?;

        Ok(buffer)
    }

    async fn encode_image(path: &Path) -> Result<String> {
        let owned: PathBuf = path.to_path_buf();
        let data = tokio::task::spawn_blocking(move || Self::prepare_image(&owned))
            .await
            .map_err(|e| PixsortError::Classification {
                file: display_name(path),
                reason: format!("image preparation panicked: {}", e),
            })??;
        Ok(general_purpose::STANDARD.encode(&data))
    }

    async fn generate_with_image(&self, image_base64: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            stream: false,
            images: vec![image_base64.to_string()],
        };

        debug!("Sending vision request to Ollama: model={}", self.model);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PixsortError::OllamaUnavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response)
    }

    async fn generate_with_retry(&self, image_base64: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!("Retrying Ollama request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.generate_with_image(image_base64).await {
                Ok(response) => return Ok(response),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PixsortError::OllamaUnavailable("Unknown error".to_string())
        }))
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn classify(&self, path: &Path) -> Result<String> {
        let image_data = Self::encode_image(path).await?;
        let raw = self.generate_with_retry(&image_data).await?;

        match_label(&raw, &self.labels).ok_or_else(|| PixsortError::Classification {
            file: display_name(path),
            reason: format!("model answer {:?} matches no known label", raw.trim()),
        })
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                PixsortError::OllamaUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }
}

/// 1s, 2s, 4s, ... capped at `MAX_BACKOFF_SECS`
fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Clean a free-form model answer into a label-like token
pub fn clean_response(raw: &str) -> String {
    let mut clean = raw.trim().replace(['\n', '\r'], " ");

    // Drop chatty prefixes such as "Answer: cat"
    if let Some(idx) = clean.find(':') {
        if idx < 30 {
            clean = clean[idx + 1..].trim().to_string();
        }
    }

    clean = clean.trim_matches(|c| c == '"' || c == '\'' || c == '.' || c == '`').to_string();

    clean = clean
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == ' ')
        .collect::<String>();

    clean = clean.trim().replace([' ', '-'], "_").to_lowercase();

    while clean.contains("__") {
        clean = clean.replace("__", "_");
    }

    clean.trim_matches('_').to_string()
}

/// Map a model answer onto one of `labels`
///
/// Exact matches win over containment; among containment matches the
/// longest label wins. With no labels configured the cleaned answer is
/// returned as is.
pub fn match_label(raw: &str, labels: &[String]) -> Option<String> {
    let answer = clean_response(raw);
    if answer.is_empty() {
        return None;
    }
    if labels.is_empty() {
        return Some(answer);
    }

    let normalized: Vec<(String, &String)> = labels.iter()
        .map(|l| (clean_response(l), l))
        .collect();

    if let Some((_, label)) = normalized.iter().find(|(n, _)| *n == answer) {
        return Some((*label).clone());
    }

    normalized.iter()
        .filter(|(n, _)| {
            !n.is_empty()
                && (answer.contains(n.as_str()) || n.starts_with(&format!("{}_", answer)))
        })
        .max_by_key(|(n, _)| n.len())
        .map(|(_, label)| (*label).clone())
}
