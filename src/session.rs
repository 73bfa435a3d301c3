// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-session request state for the web UI
//!
//! Each browser session moves through
//! `Idle -> Uploaded -> Processing -> Ready -> (download) -> Idle`.
//! Failed or cancelled runs return to `Idle` with `last_error` set.
//! While an upload is written to disk the session is `Uploading`; the
//! store lock is not held during that time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::Archive;
use crate::pipeline::RunOutcome;
use crate::progress::ProgressState;
use crate::renamer::BatchReport;
use crate::workspace::{PreparedUpload, Workspace};
use crate::{PixsortError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Uploading,
    Uploaded,
    Processing,
    Ready,
}

enum SessionState {
    Idle,
    Uploading,
    Uploaded { workspace: Workspace, pending: usize },
    Processing(CancellationToken),
    Ready(Arc<Archive>),
}

/// An upload that was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedUpload {
    pub file: String,
    pub reason: String,
}

/// Result of one upload request
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedUpload>,
    /// Files waiting in the session after this upload
    pub pending: usize,
}

/// Status as reported to the client
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub phase: SessionPhase,
    pub progress: ProgressState,
    pub pending_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
    /// One-line outcome of the last run, naming files that kept their name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct Session {
    id: Uuid,
    state: SessionState,
    progress: watch::Sender<ProgressState>,
    report: Option<BatchReport>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        let (progress, _) = watch::channel(ProgressState::default());
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            progress,
            report: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Uploading => SessionPhase::Uploading,
            SessionState::Uploaded { .. } => SessionPhase::Uploaded,
            SessionState::Processing(_) => SessionPhase::Processing,
            SessionState::Ready(_) => SessionPhase::Ready,
        }
    }

    /// Live progress of the current run
    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.progress.subscribe()
    }

    pub fn progress_sender(&self) -> watch::Sender<ProgressState> {
        self.progress.clone()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Take the pending workspace out so uploads can be written without the store lock
    ///
    /// Returns `None` when the session is idle; the caller creates a fresh
    /// workspace. The session stays `Uploading` until `finish_upload` or
    /// `abandon_upload`.
    pub fn begin_upload(&mut self) -> Result<Option<Workspace>> {
        match std::mem::replace(&mut self.state, SessionState::Uploading) {
            SessionState::Idle => {
                self.touch();
                Ok(None)
            }
            SessionState::Uploaded { workspace, .. } => {
                self.touch();
                Ok(Some(workspace))
            }
            other => {
                let phase = other.phase_name();
                self.state = other;
                Err(PixsortError::InvalidState(format!(
                    "cannot upload while {}",
                    phase
                )))
            }
        }
    }

    /// Commit a workspace filled by [`ingest_uploads`]
    ///
    /// A workspace with no files leaves the session idle.
    pub fn finish_upload(&mut self, workspace: Workspace, summary: IngestSummary) -> Result<IngestSummary> {
        if !matches!(self.state, SessionState::Uploading) {
            return Err(PixsortError::InvalidState(format!(
                "no upload in progress while {}",
                self.state.phase_name()
            )));
        }

        self.state = if summary.pending > 0 {
            self.last_error = None;
            SessionState::Uploaded { workspace, pending: summary.pending }
        } else {
            SessionState::Idle
        };
        self.touch();
        debug!("Session {}: {} accepted, {} rejected", self.id, summary.accepted.len(), summary.rejected.len());
        Ok(summary)
    }

    /// Drop an upload that could not be stored; pending files are lost
    pub fn abandon_upload(&mut self, reason: &str) {
        if matches!(self.state, SessionState::Uploading) {
            warn!("Session {}: upload failed: {}", self.id, reason);
            self.state = SessionState::Idle;
            self.last_error = Some(format!("Upload failed: {}; no files were kept", reason));
            self.touch();
        }
    }

    /// Move the pending batch out for processing
    pub fn begin_processing(&mut self) -> Result<(Workspace, CancellationToken)> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => Err(PixsortError::EmptyBatch),
            SessionState::Uploaded { workspace, pending } => {
                let cancel = CancellationToken::new();
                self.progress.send_replace(ProgressState::new(pending));
                self.state = SessionState::Processing(cancel.clone());
                self.report = None;
                self.last_error = None;
                self.touch();
                info!("Session {}: processing {} files", self.id, pending);
                Ok((workspace, cancel))
            }
            other => {
                let phase = other.phase_name();
                self.state = other;
                Err(PixsortError::InvalidState(format!("cannot start processing while {}", phase)))
            }
        }
    }

    /// Record the outcome of the run started by `begin_processing`
    pub fn complete(&mut self, outcome: Result<RunOutcome>) {
        if !matches!(self.state, SessionState::Processing(_)) {
            warn!("Session {}: ignoring outcome outside processing", self.id);
            return;
        }

        match outcome {
            Ok(RunOutcome { archive, report }) => {
                info!("Session {}: {}", self.id, report.summary());
                self.report = Some(report);
                self.state = SessionState::Ready(Arc::new(archive));
            }
            Err(e) => {
                warn!("Session {}: run failed: {}", self.id, e);
                self.last_error = Some(match e {
                    PixsortError::Cancelled => "Batch cancelled; no files were kept".to_string(),
                    other => format!("{}; no files were kept", other),
                });
                self.state = SessionState::Idle;
            }
        }

        self.touch();
        self.progress.send_modify(|p| p.finished = true);
    }

    /// Ask the running batch to stop before its next file
    pub fn cancel(&mut self) -> Result<()> {
        match &self.state {
            SessionState::Processing(token) => {
                token.cancel();
                self.touch();
                Ok(())
            }
            other => Err(PixsortError::InvalidState(format!(
                "nothing to cancel while {}",
                other.phase_name()
            ))),
        }
    }

    /// Hand out the finished archive and return to idle
    pub fn take_download(&mut self) -> Result<Arc<Archive>> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Ready(archive) => {
                self.progress.send_replace(ProgressState::default());
                self.touch();
                Ok(archive)
            }
            other => {
                let phase = other.phase_name();
                self.state = other;
                Err(PixsortError::InvalidState(format!("no archive ready while {}", phase)))
            }
        }
    }

    /// Drop pending uploads or an undownloaded archive
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            SessionState::Processing(_) => {
                return Err(PixsortError::InvalidState(
                    "cannot reset while processing; cancel first".to_string(),
                ));
            }
            SessionState::Uploading => {
                return Err(PixsortError::InvalidState("cannot reset while uploading".to_string()));
            }
            _ => {}
        }
        self.state = SessionState::Idle;
        self.report = None;
        self.last_error = None;
        self.progress.send_replace(ProgressState::default());
        self.touch();
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        let (pending_files, archive_name) = match &self.state {
            SessionState::Uploaded { pending, .. } => (*pending, None),
            SessionState::Ready(archive) => (0, Some(archive.file_name.clone())),
            _ => (0, None),
        };

        SessionStatus {
            id: self.id,
            phase: self.phase(),
            progress: *self.progress.borrow(),
            pending_files,
            report: self.report.clone(),
            summary: self.report.as_ref().map(BatchReport::summary),
            last_error: self.last_error.clone(),
            archive_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Idle for longer than `ttl` and not running
    pub fn is_expired(&self, ttl: ChronoDuration, now: DateTime<Utc>) -> bool {
        !matches!(self.phase(), SessionPhase::Processing | SessionPhase::Uploading)
            && now - self.updated_at > ttl
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Store validated uploads in `workspace`
///
/// Blocking; run it off the async executor. Files that fail validation or
/// cannot be written are listed as rejected and the rest still go in.
pub fn ingest_uploads(
    workspace: &Workspace,
    uploads: Vec<(String, Result<PreparedUpload>)>,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    for (name, upload) in uploads {
        match upload.and_then(|u| workspace.store(u)) {
            Ok(path) => {
                let stored = path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                summary.accepted.push(stored);
            }
            Err(PixsortError::UnreadableInput { file, reason }) => {
                warn!("Rejected upload {}: {}", file, reason);
                summary.rejected.push(RejectedUpload { file, reason });
            }
            Err(e) => {
                warn!("Failed to store upload {}: {}", name, e);
                summary.rejected.push(RejectedUpload { file: name, reason: e.to_string() });
            }
        }
    }

    summary.pending = workspace.len()?;
    Ok(summary)
}

impl SessionState {
    fn phase_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Uploading => "uploading",
            SessionState::Uploaded { .. } => "uploaded",
            SessionState::Processing(_) => "processing",
            SessionState::Ready(_) => "ready",
        }
    }
}

/// All live sessions, keyed by ID
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id();
        self.sessions.write().await.insert(id, session);
        info!("Created session {}", id);
        id
    }

    /// Run `f` against one session under the write lock
    pub async fn with_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| PixsortError::SessionNotFound(id.to_string()))?;
        f(session)
    }

    pub async fn status(&self, id: Uuid) -> Result<SessionStatus> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(Session::status)
            .ok_or_else(|| PixsortError::SessionNotFound(id.to_string()))
    }

    pub async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<ProgressState>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(Session::subscribe)
            .ok_or_else(|| PixsortError::SessionNotFound(id.to_string()))
    }

    /// Drop expired sessions along with their storage; returns how many
    pub async fn remove_expired(&self, ttl: ChronoDuration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(ttl, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Expired {} idle sessions", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
