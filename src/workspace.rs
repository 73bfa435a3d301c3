// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Run-scoped temporary storage for uploaded images
//!
//! A [`Workspace`] owns a temporary directory. The directory and every file
//! in it are deleted when the workspace is dropped, so a run that fails or
//! is cancelled still releases its storage.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::config::{OutputFormat, RuleConfig};
use crate::renamer::collect_images;
use crate::{PixsortError, Result};

/// Settings applied to each incoming file
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub output_format: OutputFormat,
    pub allowed_extensions: Vec<String>,
}

impl IngestOptions {
    pub fn from_rules(rules: &RuleConfig) -> Self {
        Self {
            output_format: rules.output_format,
            allowed_extensions: rules.allowed_extensions.clone(),
        }
    }

    fn allows(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_rules(&RuleConfig::default())
    }
}

/// A validated upload, ready to be written to a workspace
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    /// Sanitized file name, with the extension it will be stored under
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Reduce an uploaded file name to a safe single path component
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");

    let clean: String = base
        .trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let clean = clean.trim_start_matches('.');

    let stem_empty = Path::new(clean)
        .file_stem()
        .map(|s| s.is_empty())
        .unwrap_or(true);

    if clean.is_empty() || stem_empty {
        match Path::new(clean).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("upload.{}", ext),
            None => "upload".to_string(),
        }
    } else {
        clean.to_string()
    }
}

/// Validate and decode one upload
///
/// Fails with [`PixsortError::UnreadableInput`] when the extension is not
/// allowed or the bytes do not decode as an image.
pub fn prepare_upload(name: &str, bytes: &[u8], opts: &IngestOptions) -> Result<PreparedUpload> {
    let file_name = sanitize_file_name(name);
    let unreadable = |reason: String| PixsortError::UnreadableInput {
        file: name.to_string(),
        reason,
    };

    let path = Path::new(&file_name);
    let ext = path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !opts.allows(&ext) {
        return Err(unreadable(format!(
            "unsupported file type '{}' (allowed: {})",
            ext,
            opts.allowed_extensions.join(", ")
        )));
    }

    let img = image::load_from_memory(bytes).map_err(|e| unreadable(e.to_string()))?;

    match opts.output_format {
        OutputFormat::Original => Ok(PreparedUpload {
            file_name,
            bytes: bytes.to_vec(),
        }),
        OutputFormat::Jpeg => {
            let stem = path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());

            let bytes = if matches!(image::guess_format(bytes), Ok(image::ImageFormat::Jpeg)) {
                bytes.to_vec()
            } else {
                // JPEG has no alpha channel
                let mut buffer = Vec::new();
                image::DynamicImage::ImageRgb8(img.to_rgb8())
                    .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
                    .map_err(|e| unreadable(format!("failed to re-encode as JPEG: {}", e)))?;
                buffer
            };

            Ok(PreparedUpload {
                file_name: format!("{}.jpg", stem),
                bytes,
            })
        }
    }
}

/// Temporary directory holding one batch
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh, empty workspace
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("pixsort-").tempdir()?;
        debug!("Created workspace {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write an upload, adding `-1`, `-2`, ... to the stem on name clashes
    pub fn store(&self, upload: PreparedUpload) -> Result<PathBuf> {
        let target = self.unique_path(&upload.file_name);
        std::fs::write(&target, &upload.bytes)?;
        debug!("Stored upload {:?}", target);
        Ok(target)
    }

    /// Validate a file from disk and store it
    pub fn ingest_path(&self, path: &Path, opts: &IngestOptions) -> Result<PathBuf> {
        let bytes = std::fs::read(path)?;
        let name = path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let prepared = prepare_upload(&name, &bytes, opts)?;
        self.store(prepared)
    }

    /// Image files in deterministic (sorted) order
    pub fn image_files(&self) -> Result<Vec<PathBuf>> {
        collect_images(self.root())
    }

    /// Number of stored images
    pub fn len(&self) -> Result<usize> {
        Ok(self.image_files()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete the directory now, reporting any error
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed workspace {:?}", path);
        Ok(())
    }

    fn unique_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.root().join(file_name);
        if !candidate.exists() {
            return candidate;
        }

        let path = Path::new(file_name);
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

        (1..)
            .map(|n| self.root().join(format!("{}-{}{}", stem, n, ext)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}
