//! Readers for labeled face collections: manifest files and directory trees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RecognitionError, Result};
use crate::face::{FaceImage, LabeledFace};
use crate::trainer::CancellationToken;

/// Where training faces come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingSource {
    /// Text file with one `<subjectID> <imagePath>` entry per line.
    ManifestFile(PathBuf),
    /// Directory with one sub-directory per subject, named by subject id.
    Directory(PathBuf),
}

/// One line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub subject_id: u32,
    pub image_path: PathBuf,
}

/// Field order of a manifest line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestLayout {
    /// `<subjectID> <imagePath>`, used for training sets.
    IdFirst,
    /// `<imagePath> <subjectID>`, used for evaluation sets.
    PathFirst,
}

/// Parses a training manifest (`<subjectID> <imagePath>` per line).
/// Blank lines and `#` comments are skipped; relative image paths are
/// resolved against `base_dir`.
///
/// # Errors
/// `InvalidParameter` naming the first malformed line (1-based).
pub fn parse_manifest(text: &str, base_dir: &Path) -> Result<Vec<ManifestEntry>> {
    parse_with_layout(text, base_dir, ManifestLayout::IdFirst)
}

/// Parses an evaluation manifest (`<imagePath> <subjectID>` per line). The id
/// is the last field, so image paths may contain spaces.
pub fn parse_test_manifest(text: &str, base_dir: &Path) -> Result<Vec<ManifestEntry>> {
    parse_with_layout(text, base_dir, ManifestLayout::PathFirst)
}

fn parse_with_layout(
    text: &str,
    base_dir: &Path,
    layout: ManifestLayout,
) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |why: &str| {
            RecognitionError::InvalidParameter(format!(
                "manifest line {}: {} in {:?}",
                line_no + 1,
                why,
                line
            ))
        };
        let (id, path) = match layout {
            ManifestLayout::IdFirst => line
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("expected `<subjectID> <imagePath>`"))?,
            ManifestLayout::PathFirst => line
                .rsplit_once(char::is_whitespace)
                .map(|(path, id)| (id, path))
                .ok_or_else(|| malformed("expected `<imagePath> <subjectID>`"))?,
        };
        let subject_id: u32 = id.parse().map_err(|_| malformed("subject id is not a non-negative integer"))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(malformed("missing image path"));
        }
        let path = Path::new(path);
        let image_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        entries.push(ManifestEntry {
            subject_id,
            image_path,
        });
    }
    Ok(entries)
}

/// Reads and parses a manifest file with the given field order.
pub fn read_manifest_with_layout(path: &Path, layout: ManifestLayout) -> Result<Vec<ManifestEntry>> {
    let text = fs::read_to_string(path).map_err(|e| not_found_or_io(e, path))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_with_layout(&text, base_dir, layout)
}

/// Reads and parses a training manifest file.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    read_manifest_with_layout(path, ManifestLayout::IdFirst)
}

/// Decodes every image listed in a training manifest.
pub fn load_manifest(path: &Path, token: &CancellationToken) -> Result<Vec<LabeledFace>> {
    let entries = read_manifest(path)?;
    info!("Loading {} faces listed in {}", entries.len(), path.display());
    load_entries(&entries, token)
}

/// Decodes every image listed in an evaluation manifest.
pub fn load_test_manifest(path: &Path, token: &CancellationToken) -> Result<Vec<LabeledFace>> {
    let entries = read_manifest_with_layout(path, ManifestLayout::PathFirst)?;
    info!("Loading {} test faces listed in {}", entries.len(), path.display());
    load_entries(&entries, token)
}

/// Decodes every `*.{extension}` file in the numerically named sub-directories
/// of `root`. Sub-directories are visited in ascending subject order and files
/// in name order, so the result is reproducible.
pub fn load_directory(
    root: &Path,
    extension: &str,
    token: &CancellationToken,
) -> Result<Vec<LabeledFace>> {
    if !root.is_dir() {
        return Err(RecognitionError::FileNotFound(root.to_path_buf()));
    }
    let mut subjects: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str().and_then(|n| n.parse::<u32>().ok()) {
            Some(0) => warn!("Ignoring {}: subject id 0 is reserved", entry.path().display()),
            Some(id) => subjects.push((id, entry.path())),
            None => debug!("Ignoring non-subject directory {}", entry.path().display()),
        }
    }
    subjects.sort();

    let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
    let mut entries = Vec::new();
    for (subject_id, dir) in subjects {
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map_or(false, |e| e.to_ascii_lowercase() == wanted)
            })
            .collect();
        files.sort();
        entries.extend(files.into_iter().map(|image_path| ManifestEntry {
            subject_id,
            image_path,
        }));
    }
    info!(
        "Loading {} .{} faces from {}",
        entries.len(),
        wanted,
        root.display()
    );
    load_entries(&entries, token)
}

/// Loads faces from either kind of source.
pub fn load_source(
    source: &TrainingSource,
    extension: &str,
    token: &CancellationToken,
) -> Result<Vec<LabeledFace>> {
    match source {
        TrainingSource::ManifestFile(path) => load_manifest(path, token),
        TrainingSource::Directory(path) => load_directory(path, extension, token),
    }
}

fn load_entries(entries: &[ManifestEntry], token: &CancellationToken) -> Result<Vec<LabeledFace>> {
    entries
        .par_iter()
        .map(|entry| -> Result<LabeledFace> {
            token.check()?;
            let image = FaceImage::open(&entry.image_path)?;
            Ok(LabeledFace::new(entry.subject_id, image))
        })
        .collect()
}

fn not_found_or_io(e: io::Error, path: &Path) -> RecognitionError {
    match e.kind() {
        io::ErrorKind::NotFound => RecognitionError::FileNotFound(path.to_path_buf()),
        _ => RecognitionError::Io(e),
    }
}
