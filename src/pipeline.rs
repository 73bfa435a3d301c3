// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! One batch run: rename every image in a workspace, then archive it

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{build_archive, Archive};
use crate::classifier::Classifier;
use crate::config::{AppConfig, FailurePolicy};
use crate::progress::ProgressSink;
use crate::renamer::{BatchRenamer, BatchReport};
use crate::workspace::Workspace;
use crate::{PixsortError, Result};

/// Per-run settings taken from the configuration
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub on_failure: FailurePolicy,
    pub archive_name: String,
    pub compression_level: Option<i64>,
}

impl RunOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            on_failure: config.rules.on_failure,
            archive_name: config.archive.file_name.clone(),
            compression_level: config.archive.compression_level,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub archive: Archive,
    pub report: BatchReport,
}

/// Classifier plus run settings, shared by every run
pub struct Pipeline {
    classifier: Arc<dyn Classifier>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(classifier: Arc<dyn Classifier>, options: RunOptions) -> Self {
        Self { classifier, options }
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Rename and archive the contents of `workspace`
    ///
    /// The workspace is consumed: its directory is removed when this
    /// returns, whether the run succeeded, failed or was cancelled.
    pub async fn run(
        &self,
        workspace: Workspace,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let files = workspace.image_files()?;
        let renamer = BatchRenamer::new(self.options.on_failure);
        info!(
            "Processing {} images with {} classifier (on failure: {:?})",
            files.len(),
            self.classifier.name(),
            renamer.policy()
        );

        let report = renamer
            .rename_all(&files, self.classifier.as_ref(), progress, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(PixsortError::Cancelled);
        }

        let root = workspace.root().to_path_buf();
        let name = self.options.archive_name.clone();
        let level = self.options.compression_level;
        let archive = tokio::task::spawn_blocking(move || build_archive(&root, &name, level))
            .await
            .map_err(|e| PixsortError::Archive(format!("Archive task failed: {}", e)))??;

        if archive.entry_count != report.total {
            warn!(
                "Archive has {} entries for {} input files",
                archive.entry_count, report.total
            );
        }

        if let Err(e) = workspace.close() {
            warn!("Failed to remove workspace: {}", e);
        }

        info!("{} ({} archived, {} bytes)", report.summary(), archive.entry_count, archive.len());
        Ok(RunOutcome { archive, report })
    }
}
