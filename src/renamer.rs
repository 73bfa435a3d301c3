// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch renaming of images by predicted class

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::FailurePolicy;
use crate::progress::ProgressSink;
use crate::{PixsortError, Result};

/// A file that was classified and renamed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedFile {
    pub index: usize,
    pub original_name: String,
    pub new_name: String,
    pub label: String,
}

/// A file that kept its name because classification failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub index: usize,
    pub file: String,
    pub reason: String,
    /// Set when the original name was taken by a renamed file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_as: Option<String>,
}

/// Outcome of one renaming pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub renamed: Vec<RenamedFile>,
    pub failed: Vec<FailedFile>,
}

impl BatchReport {
    /// Files handled so far, renamed or not
    pub fn processed(&self) -> usize {
        self.renamed.len() + self.failed.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    /// One-line summary naming any failed files
    pub fn summary(&self) -> String {
        if self.failed.is_empty() {
            format!("Processed {}/{} files", self.processed(), self.total)
        } else {
            let names: Vec<&str> = self.failed.iter().map(|f| f.file.as_str()).collect();
            format!(
                "Processed {}/{} files; {} kept their original name: {}",
                self.processed(),
                self.total,
                self.failed.len(),
                names.join(", ")
            )
        }
    }
}

/// Class tag of a label: the part before the first `_`
pub fn class_tag(label: &str) -> &str {
    let label = label.trim();
    label.split('_').next().unwrap_or(label)
}

/// `{tag}_{index}{.ext}`, keeping the extension of `path`
pub fn target_file_name(tag: &str, index: usize, path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", tag, index, ext.to_string_lossy()),
        None => format!("{}_{}", tag, index),
    }
}

/// Regular, non-hidden files directly inside `dir`, sorted by name
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn usable_tag(label: &str) -> std::result::Result<&str, String> {
    let tag = class_tag(label);
    if tag.is_empty() {
        return Err(format!("label {:?} has an empty class name", label));
    }
    if tag == "." || tag == ".." || tag.contains(['/', '\\']) || tag.contains('\0') {
        return Err(format!("label {:?} is not usable as a file name", label));
    }
    Ok(tag)
}

/// A classified file waiting for its final name
struct PlannedRename {
    index: usize,
    path: PathBuf,
    label: String,
    tag: String,
}

/// Renames each file after its predicted class
pub struct BatchRenamer {
    policy: FailurePolicy,
}

impl BatchRenamer {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Classify and rename `files` in order
    ///
    /// File `i` becomes `{tag}_{i}{ext}` in its own directory. Progress is
    /// reported after every classification, including failed ones. The
    /// cancellation token is checked before each file. Nothing is renamed
    /// until every file has been classified.
    pub async fn rename_all(
        &self,
        files: &[PathBuf],
        classifier: &dyn Classifier,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let total = files.len();
        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };
        let mut planned = Vec::with_capacity(total);
        let mut failed_paths = Vec::new();

        for (index, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Batch cancelled after {}/{} files", index, total);
                return Err(PixsortError::Cancelled);
            }

            match classify_one(path, classifier).await {
                Ok((label, tag)) => {
                    debug!("{} is {} ({})", file_label(path), tag, label);
                    planned.push(PlannedRename {
                        index,
                        path: path.clone(),
                        label,
                        tag,
                    });
                }
                Err(PixsortError::Classification { file, reason }) => match self.policy {
                    FailurePolicy::Abort => {
                        warn!("Aborting batch: {} failed: {}", file, reason);
                        return Err(PixsortError::Classification { file, reason });
                    }
                    FailurePolicy::Skip => {
                        warn!("Keeping {} unrenamed: {}", file, reason);
                        report.failed.push(FailedFile {
                            index,
                            file,
                            reason,
                            stored_as: None,
                        });
                        failed_paths.push(path.clone());
                    }
                },
                Err(e) => return Err(e),
            }

            progress.report(index + 1, total);
        }

        apply_renames(planned, &failed_paths, &mut report)?;

        info!("{}", report.summary());
        Ok(report)
    }
}

/// Classify one file and check its tag is usable as a file name
///
/// Classifier errors and unusable labels come back as `Classification`
/// so the failure policy applies.
async fn classify_one(path: &Path, classifier: &dyn Classifier) -> Result<(String, String)> {
    let failure = |reason: String| PixsortError::Classification {
        file: file_label(path),
        reason,
    };

    let label = match classifier.classify(path).await {
        Ok(label) => label,
        Err(PixsortError::Classification { reason, .. }) => return Err(failure(reason)),
        Err(e) => return Err(failure(e.to_string())),
    };

    let tag = usable_tag(&label).map_err(&failure)?.to_string();
    Ok((label, tag))
}

/// Move every planned file to its final name without overwriting anything
///
/// Planned files are first moved to hidden staging names so a target may
/// reuse the name of another input. Failed files that sit on a target name
/// are moved aside to `{stem}-{n}{ext}`.
fn apply_renames(planned: Vec<PlannedRename>, failed_paths: &[PathBuf], report: &mut BatchReport) -> Result<()> {
    let mut staged = Vec::with_capacity(planned.len());
    for plan in planned {
        let parent = plan.path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let staging = parent.join(format!(".pixsort-pending-{}", plan.index));
        if staging.exists() {
            return Err(already_exists(&staging));
        }
        std::fs::rename(&plan.path, &staging)?;

        let target = parent.join(target_file_name(&plan.tag, plan.index, &plan.path));
        staged.push((plan, staging, target));
    }

    let targets: HashSet<PathBuf> = staged.iter().map(|(_, _, target)| target.clone()).collect();

    for (failed, path) in report.failed.iter_mut().zip(failed_paths) {
        if targets.contains(path) {
            let moved = free_name(path, &targets);
            std::fs::rename(path, &moved)?;
            debug!("Moved unrenamed {} aside to {:?}", failed.file, moved);
            failed.stored_as = Some(file_label(&moved));
        }
    }

    for (plan, staging, target) in staged {
        if target.exists() {
            return Err(already_exists(&target));
        }
        std::fs::rename(&staging, &target)?;

        report.renamed.push(RenamedFile {
            index: plan.index,
            original_name: file_label(&plan.path),
            new_name: file_label(&target),
            label: plan.label,
        });
    }

    Ok(())
}

/// First `{stem}-{n}{ext}` next to `path` that is neither on disk nor reserved
fn free_name(path: &Path, reserved: &HashSet<PathBuf>) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{}-{}{}", stem, n, ext));
        if !candidate.exists() && !reserved.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn already_exists(path: &Path) -> PixsortError {
    PixsortError::FileSystem(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("{} already exists", path.display()),
    ))
}
