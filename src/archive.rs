use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{Result, ViewerError};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif"];
pub const ARCHIVE_EXTENSIONS: &[&str] = &["cbz", "zip"];

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

pub fn is_image_name(name: &str) -> bool {
    extension_of(name)
        .map(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

pub fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ARCHIVE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Entries and documents
// ---------------------------------------------------------------------------

/// Where a page's bytes live inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// Central-directory index inside the ZIP file.
    ZipIndex(usize),
    /// The document file itself (single-image documents).
    WholeFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub ordinal: usize,
    pub name: String,
    pub locator: Locator,
}

impl Entry {
    /// Lower-cased extension, used as the decoder's format hint.
    pub fn extension(&self) -> String {
        extension_of(&self.name).unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Document {
    pub path: PathBuf,
    pub entries: Vec<Entry>,
    pub is_single_image: bool,
}

impl Document {
    /// Open an archive or a single image. Archives go through [`resolve`]; an
    /// image becomes a one-page document.
    pub fn open(path: &Path) -> Result<Document> {
        let path = absolute(path)?;

        if is_archive_path(&path) {
            let entries = resolve(&path)?;
            return Ok(Document { path, entries, is_single_image: false });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_image_name(&name) {
            return Err(ViewerError::invalid_source(&path, "unsupported file type"));
        }
        ensure_readable(&path)?;

        Ok(Document {
            path,
            entries: vec![Entry { ordinal: 0, name, locator: Locator::WholeFile }],
            is_single_image: true,
        })
    }

    pub fn total_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, ordinal: usize) -> Option<&Entry> {
        self.entries.get(ordinal)
    }

    /// File name without extension, as shown in the nav bar.
    pub fn title(&self) -> String {
        title_of(&self.path)
    }
}

pub fn title_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ViewerError::invalid_source(path, e))
}

fn ensure_readable(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| ViewerError::invalid_source(path, e))?;
    if !meta.is_file() {
        return Err(ViewerError::invalid_source(path, "not a regular file"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Archive index
// ---------------------------------------------------------------------------

/// List the image entries of a ZIP archive in natural name order.
pub fn resolve(path: &Path) -> Result<Vec<Entry>> {
    ensure_readable(path)?;
    let file = File::open(path).map_err(|e| ViewerError::invalid_source(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(path, e))?;

    let mut found: Vec<(usize, String)> = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(|e| corrupt(path, e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_owned();
        if is_image_name(&name) {
            found.push((i, name));
        }
    }

    if found.is_empty() {
        return Err(ViewerError::EmptyDocument { path: path.to_path_buf() });
    }

    // Stable: equal names keep central-directory order.
    found.sort_by(|a, b| natord::compare_ignore_case(&a.1, &b.1));

    log::info!("Indexed {} pages in {:?}", found.len(), path);

    Ok(found
        .into_iter()
        .enumerate()
        .map(|(ordinal, (index, name))| Entry {
            ordinal,
            name,
            locator: Locator::ZipIndex(index),
        })
        .collect())
}

fn corrupt(path: &Path, err: ZipError) -> ViewerError {
    ViewerError::CorruptArchive { path: path.to_path_buf(), detail: err.to_string() }
}
