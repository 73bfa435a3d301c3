// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! pixsort: classify a batch of images, rename them by predicted class
//! and hand the result back as a ZIP archive.
//!
//! The pipeline is `workspace` (upload storage) -> `renamer` (calls a
//! `classifier` per file) -> `archive`. The `session` and `web` modules
//! wrap one pipeline run per browser session.

pub mod archive;
pub mod classifier;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod renamer;
pub mod session;
pub mod web;
pub mod workspace;

pub use config::AppConfig;
pub use error::{PixsortError, Result};
