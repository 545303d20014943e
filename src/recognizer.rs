//! The public face-recognition façade.
//!
//! A [`FaceRecognizer`] starts without a model. `train` or `load_model`
//! builds a complete [`EigenfaceModel`] off to the side and then publishes it
//! with a single pointer swap, so concurrent readers see either the old model
//! or the new one. A failed or cancelled update leaves the old model in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceType;
use crate::error::{RecognitionError, Result};
use crate::evaluation::{self, EvaluationReport};
use crate::export::{export_average_face, export_eigenfaces};
use crate::face::FaceImage;
use crate::matcher::{classify_image, RecognitionResult};
use crate::model::{validate_threshold, EigenfaceModel};
use crate::persistence;
use crate::source::{self, TrainingSource};
use crate::trainer::{CancellationToken, EigenfaceTrainer, TrainerConfig};

/// File name of the average-face debug image.
pub const AVERAGE_FACE_FILE: &str = "average_face.pgm";
/// File name of the eigenface mosaic debug image.
pub const EIGENFACES_FILE: &str = "eigenfaces.pgm";

/// Settings fixed when a [`FaceRecognizer`] is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Minimum confidence in `[0, 1]` for reporting an identity.
    pub recognition_threshold: f64,
    /// Metric for models trained by this recognizer.
    pub distance_type: DistanceType,
    /// Extension (without the dot) of images picked up from a directory source.
    pub image_extension: String,
    /// Used by `save_model`/`load_model` when no path is given.
    pub default_model_path: PathBuf,
    /// Eigenfaces to keep; `None` keeps all `train_faces_no - 1`.
    pub requested_eigen_vectors_no: Option<usize>,
    /// Where debug images go when training with `export_debug_images`.
    pub export_dir: PathBuf,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        RecognizerConfig {
            recognition_threshold: 0.5,
            distance_type: DistanceType::default(),
            image_extension: "pgm".to_string(),
            default_model_path: PathBuf::from("training_data.json"),
            requested_eigen_vectors_no: None,
            export_dir: PathBuf::from("."),
        }
    }
}

impl RecognizerConfig {
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.recognition_threshold)?;
        if self.image_extension.trim_start_matches('.').is_empty() {
            return Err(RecognitionError::InvalidParameter(
                "image extension must not be empty".to_string(),
            ));
        }
        if self.default_model_path.as_os_str().is_empty() {
            return Err(RecognitionError::InvalidParameter(
                "default model path must not be empty".to_string(),
            ));
        }
        if self.requested_eigen_vectors_no == Some(0) {
            return Err(RecognitionError::InvalidParameter(
                "requested number of eigenfaces must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            requested_eigen_vectors_no: self.requested_eigen_vectors_no,
            distance_type: self.distance_type,
            recognition_threshold: self.recognition_threshold,
        }
    }
}

/// Trains, stores and queries eigenface models.
///
/// All methods take `&self`; the recognizer can be shared across threads.
/// Models built by `train` use this recognizer's threshold and metric. A model
/// loaded from disk keeps the threshold and metric it was saved with.
#[derive(Debug)]
pub struct FaceRecognizer {
    config: RecognizerConfig,
    model: RwLock<Option<Arc<EigenfaceModel>>>,
    // Serializes train/load so two updates never race to publish.
    writer: Mutex<()>,
}

impl FaceRecognizer {
    /// Validates `config` and returns a recognizer with no model.
    ///
    /// # Errors
    /// `InvalidParameter` for a threshold outside `[0, 1]`, an empty image
    /// extension or model path, or a requested eigenface count of 0.
    pub fn initialize(config: RecognizerConfig) -> Result<Self> {
        config.validate()?;
        debug!("Initialized face recognizer with {:?}", config);
        Ok(FaceRecognizer {
            config,
            model: RwLock::new(None),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    /// The currently published model, if any.
    pub fn model(&self) -> Option<Arc<EigenfaceModel>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.model().is_some()
    }

    /// Loads faces from `source`, trains a model and publishes it.
    ///
    /// With `export_debug_images` the average face and the eigenface mosaic
    /// of the published model are written into the configured export
    /// directory. A failed export is logged and does not undo the training.
    pub fn train(&self, source: &TrainingSource, export_debug_images: bool) -> Result<()> {
        self.train_with_cancellation(source, export_debug_images, &CancellationToken::new())
    }

    /// [`train`](Self::train) that stops with `Cancelled` once `token` is cancelled.
    pub fn train_with_cancellation(
        &self,
        source: &TrainingSource,
        export_debug_images: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let start_time = Instant::now();

        let faces = source::load_source(source, &self.config.image_extension, token)?;
        let trainer = EigenfaceTrainer::new(self.config.trainer_config());
        let model = trainer.train_with_cancellation(&faces, token)?;
        token.check()?;

        info!(
            "Trained model from {:?} in {:?}: {} faces, {} eigenfaces",
            source,
            start_time.elapsed(),
            model.train_faces_no(),
            model.eigen_vectors_no()
        );
        let model = self.publish(model);

        if export_debug_images {
            if let Err(e) = self.export_debug_images(&model) {
                warn!(
                    "Could not write debug images to {}: {}",
                    self.config.export_dir.display(),
                    e
                );
            }
        }
        Ok(())
    }

    fn export_debug_images(&self, model: &EigenfaceModel) -> Result<()> {
        export_average_face(model, &self.config.export_dir.join(AVERAGE_FACE_FILE))?;
        export_eigenfaces(model, &self.config.export_dir.join(EIGENFACES_FILE))
    }

    /// Saves the current model to `path`, or to the default model path.
    ///
    /// # Errors
    /// `NotReady` without a model.
    pub fn save_model(&self, path: Option<&Path>) -> Result<()> {
        let model = self.require_model()?;
        persistence::save(&model, path.unwrap_or(self.config.default_model_path.as_path()))
    }

    /// Loads a model from `path`, or from the default model path, and publishes it.
    pub fn load_model(&self, path: Option<&Path>) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let model = persistence::load(path.unwrap_or(self.config.default_model_path.as_path()))?;
        self.publish(model);
        Ok(())
    }

    /// Classifies each image against the current model, in input order.
    ///
    /// # Errors
    /// `NotReady` without a model; otherwise the first failing image's error
    /// (e.g. `DimensionMismatch`) aborts the batch.
    pub fn classify_batch(
        &self,
        images: &[FaceImage],
        results_no: usize,
    ) -> Result<Vec<RecognitionResult>> {
        let model = self.require_model()?;
        if results_no == 0 {
            return Err(RecognitionError::InvalidParameter(
                "number of results must be at least 1".to_string(),
            ));
        }
        let start_time = Instant::now();
        let results = images
            .par_iter()
            .map(|image| classify_image(image, &model, results_no))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Classified {} images in {:?}",
            images.len(),
            start_time.elapsed()
        );
        Ok(results)
    }

    /// Classifies every face listed in a test manifest (`<imagePath> <subjectID>`
    /// per line) and reports accuracy.
    pub fn evaluate(&self, test_manifest_path: &Path) -> Result<EvaluationReport> {
        let model = self.require_model()?;
        let test_set = source::load_test_manifest(test_manifest_path, &CancellationToken::new())?;
        Ok(evaluation::evaluate(&test_set, &model))
    }

    fn require_model(&self) -> Result<Arc<EigenfaceModel>> {
        self.model().ok_or(RecognitionError::NotReady)
    }

    fn publish(&self, model: EigenfaceModel) -> Arc<EigenfaceModel> {
        let model = Arc::new(model);
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&model));
        model
    }
}
