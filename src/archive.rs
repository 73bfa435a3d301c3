// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory ZIP archives of a directory tree

use std::io::{Cursor, Read, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::{PixsortError, Result};

/// A finished archive, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Suggested download name
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub entry_count: usize,
}

impl Archive {
    pub const MIME_TYPE: &'static str = "application/zip";

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}

/// Entry name for `path` relative to `root`, always `/`-separated
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root)
        .map_err(|e| PixsortError::Archive(format!("{:?} is outside {:?}: {}", path, root, e)))?;

    let parts: Vec<String> = relative.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}

/// Zip every file under `root`
///
/// Entries are named relative to `root` and written in sorted order with
/// deflate compression. An empty directory yields a valid archive with no
/// entries.
pub fn build_archive(root: &Path, file_name: &str, compression_level: Option<i64>) -> Result<Archive> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            entries.push((entry_name(root, entry.path())?, entry.into_path()));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(compression_level);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, path) in &entries {
        let data = std::fs::read(path)
            .map_err(|e| PixsortError::Archive(format!("Failed to read {}: {}", name, e)))?;
        writer.start_file(name.as_str(), options)?;
        writer.write_all(&data)
            .map_err(|e| PixsortError::Archive(format!("Failed to write {}: {}", name, e)))?;
        debug!("Archived {} ({} bytes)", name, data.len());
    }
    let bytes = writer.finish()?.into_inner();

    Ok(Archive {
        file_name: file_name.to_string(),
        bytes,
        entry_count: entries.len(),
    })
}

/// Entry names of an archive in stored order
pub fn list_entries(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    (0..archive.len())
        .map(|i| -> Result<String> { Ok(archive.by_index(i)?.name().to_string()) })
        .collect()
}

/// Decompress all entries as `(name, content)` pairs in stored order
pub fn read_entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        out.push((file.name().to_string(), data));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        dir
    }

    #[test]
    fn test_empty_directory() {
        let dir = tree(&[]);
        let archive = build_archive(dir.path(), "classified_images.zip", None).unwrap();
        assert_eq!(archive.entry_count, 0);
        assert!(archive.is_empty());
        assert!(list_entries(&archive.bytes).unwrap().is_empty());
    }

    #[test]
    fn test_entries_are_relative_and_sorted() {
        let dir = tree(&[("dog_1.jpg", "d"), ("cat_0.jpg", "c"), ("nested/x.jpg", "x")]);
        let archive = build_archive(dir.path(), "out.zip", Some(6)).unwrap();

        let names = list_entries(&archive.bytes).unwrap();
        assert_eq!(names, vec!["cat_0.jpg", "dog_1.jpg", "nested/x.jpg"]);
        let root_name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(names.iter().all(|n| !n.starts_with('/') && !n.contains(&root_name)));
    }

    #[test]
    fn test_round_trip_contents() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let dir = tree(&[("dog_1.jpg", "small")]);
        std::fs::write(dir.path().join("cat_0.jpg"), &payload).unwrap();
        let archive = build_archive(dir.path(), "out.zip", None).unwrap();

        let entries = read_entries(&archive.bytes).unwrap();
        assert_eq!(entries[0], ("cat_0.jpg".to_string(), payload));
        assert_eq!(entries[1], ("dog_1.jpg".to_string(), b"small".to_vec()));
    }

    #[test]
    fn test_archiving_twice_gives_same_entries() {
        let dir = tree(&[("a_0.jpg", "one"), ("b_1.jpg", "two")]);
        let first = build_archive(dir.path(), "out.zip", None).unwrap();
        let second = build_archive(dir.path(), "out.zip", None).unwrap();

        assert_eq!(read_entries(&first.bytes).unwrap(), read_entries(&second.bytes).unwrap());
    }

    #[test]
    fn test_missing_root_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(matches!(
            build_archive(&missing, "out.zip", None),
            Err(PixsortError::Archive(_))
        ));
    }
}
