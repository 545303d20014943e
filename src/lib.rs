// Eigenface face recognition

#![doc = include_str!("../README.md")]

pub mod distance;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod face;
pub mod linalg_backends;
pub mod matcher;
pub mod model;
pub mod persistence;
pub mod projector;
pub mod recognizer;
pub mod source;
pub mod trainer;

pub use distance::{DistanceMetric, DistanceType};
pub use error::{RecognitionError, Result};
pub use evaluation::{EvaluationItem, EvaluationOutcome, EvaluationReport};
pub use face::{FaceImage, ImageDimensions, LabeledFace};
pub use matcher::{classify, classify_image, Candidate, RecognitionResult, UNKNOWN_SUBJECT};
pub use model::{EigenfaceModel, ModelConfig};
pub use persistence::{ModelFormat, ModelRecord};
pub use projector::{project, project_batch, project_with_residual, Projection};
pub use recognizer::{FaceRecognizer, RecognizerConfig};
pub use source::TrainingSource;
pub use trainer::{CancellationToken, EigenfaceTrainer, TrainerConfig};
