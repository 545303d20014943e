//! Saving and loading eigenface models.
//!
//! Models are written as a flat [`ModelRecord`]. The encoding follows the
//! file extension: `.bin`/`.bincode` use bincode, anything else uses JSON.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::distance::DistanceType;
use crate::error::{RecognitionError, Result};
use crate::face::{FaceImage, ImageDimensions};
use crate::model::{EigenfaceModel, ModelConfig};

/// Version written into every record; loading rejects any other value.
pub const FORMAT_VERSION: u32 = 1;

/// On-disk encoding of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Self-describing JSON.
    Json,
    /// Compact bincode.
    Bincode,
}

impl ModelFormat {
    /// Picks the format from the extension of `path`, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("bin") | Some("bincode") => ModelFormat::Bincode,
            _ => ModelFormat::Json,
        }
    }
}

/// Serialized form of an [`EigenfaceModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub format_version: u32,
    pub train_faces_no: usize,
    pub eigen_vectors_no: usize,
    pub distance_type: DistanceType,
    pub recognition_threshold: f64,
    pub image_width: u32,
    pub image_height: u32,
    /// Row-major pixels.
    pub average_face: Vec<f64>,
    /// One flat pixel vector per eigenface, in descending variance order.
    pub principal_directions: Vec<Vec<f64>>,
    pub variances: Vec<f64>,
    /// One row per training face.
    pub projected_training_vectors: Vec<Vec<f64>>,
    pub subject_ids: Vec<u32>,
}

impl From<&EigenfaceModel> for ModelRecord {
    fn from(model: &EigenfaceModel) -> Self {
        let config = model.config();
        ModelRecord {
            format_version: FORMAT_VERSION,
            train_faces_no: model.train_faces_no(),
            eigen_vectors_no: model.eigen_vectors_no(),
            distance_type: config.distance_type,
            recognition_threshold: config.recognition_threshold,
            image_width: config.dimensions.width,
            image_height: config.dimensions.height,
            average_face: model.average_face().flatten().to_vec(),
            principal_directions: model
                .principal_directions()
                .axis_iter(Axis(1))
                .map(|c| c.to_vec())
                .collect(),
            variances: model.variances().to_vec(),
            projected_training_vectors: model
                .projected_training_vectors()
                .axis_iter(Axis(0))
                .map(|r| r.to_vec())
                .collect(),
            subject_ids: model.subject_ids().to_vec(),
        }
    }
}

impl ModelRecord {
    /// Rebuilds the model, checking declared counts against the stored data.
    ///
    /// # Errors
    /// `CorruptModel` for any inconsistency.
    pub fn into_model(self) -> Result<EigenfaceModel> {
        let corrupt = |msg: String| -> Result<EigenfaceModel> { Err(RecognitionError::CorruptModel(msg)) };

        if self.format_version != FORMAT_VERSION {
            return corrupt(format!(
                "unsupported format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            ));
        }
        let dimensions = ImageDimensions::new(self.image_width, self.image_height);
        let n_pixels = dimensions.pixel_count();
        let (n, k) = (self.train_faces_no, self.eigen_vectors_no);

        if self.average_face.len() != n_pixels {
            return corrupt(format!(
                "average face has {} pixels, {} image needs {}",
                self.average_face.len(),
                dimensions,
                n_pixels
            ));
        }
        if self.principal_directions.len() != k
            || self.principal_directions.iter().any(|d| d.len() != n_pixels)
        {
            return corrupt(format!(
                "expected {} principal directions of {} pixels each",
                k, n_pixels
            ));
        }
        if self.variances.len() != k {
            return corrupt(format!("expected {} variances, found {}", k, self.variances.len()));
        }
        if self.projected_training_vectors.len() != n
            || self.projected_training_vectors.iter().any(|r| r.len() != k)
        {
            return corrupt(format!(
                "expected {} projected training vectors of length {}",
                n, k
            ));
        }
        if self.subject_ids.len() != n {
            return corrupt(format!(
                "expected {} subject ids, found {}",
                n,
                self.subject_ids.len()
            ));
        }

        let principal_directions =
            Array2::from_shape_fn((n_pixels, k), |(p, c)| self.principal_directions[c][p]);
        let projected =
            Array2::from_shape_fn((n, k), |(r, c)| self.projected_training_vectors[r][c]);
        let config = ModelConfig {
            distance_type: self.distance_type,
            recognition_threshold: self.recognition_threshold,
            dimensions,
        };

        FaceImage::from_flat(dimensions, Array1::from(self.average_face))
            .and_then(|average_face| {
                EigenfaceModel::from_parts(
                    config,
                    average_face,
                    principal_directions,
                    Array1::from(self.variances),
                    projected,
                    self.subject_ids,
                )
            })
            .map_err(|e| match e {
                RecognitionError::CorruptModel(msg) => RecognitionError::CorruptModel(msg),
                other => RecognitionError::CorruptModel(other.to_string()),
            })
    }
}

/// Saves `model` to `path` in the format implied by its extension.
pub fn save<P: AsRef<Path>>(model: &EigenfaceModel, path: P) -> Result<()> {
    let path = path.as_ref();
    save_with_format(model, path, ModelFormat::from_path(path))
}

/// Saves `model` to `path` in an explicit format.
///
/// The model is written to a temporary file next to `path` and renamed over
/// it, so an existing model is only replaced once the new one is complete.
pub fn save_with_format(model: &EigenfaceModel, path: &Path, format: ModelFormat) -> Result<()> {
    let record = ModelRecord::from(model);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        match format {
            ModelFormat::Json => serde_json::to_writer(&mut writer, &record)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
            ModelFormat::Bincode => {
                bincode::serde::encode_into_std_write(
                    &record,
                    &mut writer,
                    bincode::config::standard(),
                )
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            }
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    info!(
        "Saved eigenface model ({} faces, {} components) to {} as {:?}",
        record.train_faces_no,
        record.eigen_vectors_no,
        path.display(),
        format
    );
    Ok(())
}

/// Loads a model from `path` in the format implied by its extension.
///
/// # Errors
/// `FileNotFound` if `path` does not exist, `CorruptModel` if it cannot be
/// decoded or describes an inconsistent model.
pub fn load<P: AsRef<Path>>(path: P) -> Result<EigenfaceModel> {
    let path = path.as_ref();
    load_with_format(path, ModelFormat::from_path(path))
}

/// Loads a model from `path` in an explicit format.
pub fn load_with_format(path: &Path, format: ModelFormat) -> Result<EigenfaceModel> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RecognitionError::FileNotFound(path.to_path_buf()),
        _ => RecognitionError::Io(e),
    })?;
    let mut reader = BufReader::new(file);
    let record: ModelRecord = match format {
        ModelFormat::Json => serde_json::from_reader(&mut reader).map_err(|e| {
            RecognitionError::CorruptModel(format!("failed to decode JSON model: {}", e))
        })?,
        ModelFormat::Bincode => {
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| {
                    RecognitionError::CorruptModel(format!("failed to decode bincode model: {}", e))
                })?
        }
    };
    debug!(
        "Decoded model record v{} with {} faces and {} components from {}",
        record.format_version,
        record.train_faces_no,
        record.eigen_vectors_no,
        path.display()
    );
    record.into_model()
}
