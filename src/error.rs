use std::path::PathBuf;

use thiserror::Error;

use crate::face::ImageDimensions;

/// Errors produced by training, projection, matching and persistence.
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient training data: {0}")]
    InsufficientTrainingData(String),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        expected: ImageDimensions,
        found: ImageDimensions,
    },

    #[error("Feature vector length mismatch: model has {expected} components, query has {found}")]
    FeatureLengthMismatch { expected: usize, found: usize },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Corrupt model: {0}")]
    CorruptModel(String),

    #[error("No model available: train or load a model first")]
    NotReady,

    #[error("Training cancelled")]
    Cancelled,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Linear algebra error: {0}")]
    Linalg(String),
}

pub type Result<T> = std::result::Result<T, RecognitionError>;
