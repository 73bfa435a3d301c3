// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for pixsort

use thiserror::Error;

/// Result type alias for pixsort operations
pub type Result<T> = std::result::Result<T, PixsortError>;

/// pixsort error types
#[derive(Error, Debug)]
pub enum PixsortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Ollama not available: {0}")]
    OllamaUnavailable(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// An uploaded file could not be decoded as an image
    #[error("Unreadable input '{file}': {reason}")]
    UnreadableInput { file: String, reason: String },

    /// The classifier failed or returned an unusable label
    #[error("Classification failed for '{file}': {reason}")]
    Classification { file: String, reason: String },

    /// Building the output archive failed
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("No files to process")]
    EmptyBatch,

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Upload error: {0}")]
    Upload(String),
}

impl From<zip::result::ZipError> for PixsortError {
    fn from(e: zip::result::ZipError) -> Self {
        PixsortError::Archive(e.to_string())
    }
}

impl From<walkdir::Error> for PixsortError {
    fn from(e: walkdir::Error) -> Self {
        PixsortError::Archive(format!("Failed to walk directory: {}", e))
    }
}
