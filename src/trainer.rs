//! Eigenface training via the Gram matrix ("snapshot") method.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceType;
use crate::error::{RecognitionError, Result};
use crate::face::{common_dimensions, mean_vector, FaceImage, LabeledFace};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use crate::model::{validate_threshold, EigenfaceModel, ModelConfig};
use crate::projector::project_centered;

/// Lifted directions shorter than this are treated as empty (zero-variance) axes.
const NORMALIZATION_THRESHOLD: f64 = 1e-9;
/// Eigenvalues at or below this fraction of the largest one are rounding noise.
const RANK_TOLERANCE: f64 = 1e-10;

/// Cooperative cancellation flag shared between a training run and its caller.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RecognitionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Parameters of a training run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of eigenfaces to keep. `None` keeps as many as the data
    /// supports (`train_faces_no - 1`); larger requests are clamped to that.
    pub requested_eigen_vectors_no: Option<usize>,
    /// Metric stored in the model and used when matching.
    pub distance_type: DistanceType,
    /// Rejection threshold stored in the model.
    pub recognition_threshold: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            requested_eigen_vectors_no: None,
            distance_type: DistanceType::default(),
            recognition_threshold: 0.5,
        }
    }
}

/// Builds [`EigenfaceModel`]s from labeled training faces.
#[derive(Debug, Clone)]
pub struct EigenfaceTrainer {
    config: TrainerConfig,
}

impl EigenfaceTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Trains a model on `training_set`. See [`train_with_cancellation`](Self::train_with_cancellation).
    pub fn train(&self, training_set: &[LabeledFace]) -> Result<EigenfaceModel> {
        self.train_with_cancellation(training_set, &CancellationToken::new())
    }

    /// Trains a model, checking `token` between per-image steps.
    ///
    /// The N x N Gram matrix `G = A A^T / (N - 1)` of the mean-centered images
    /// `A` is decomposed instead of the D x D pixel covariance. Each Gram
    /// eigenvector `u` is lifted to pixel space as `A^T u` and normalized;
    /// its eigenvalue is the variance of the training data along that direction.
    ///
    /// # Errors
    /// - `InsufficientTrainingData` for fewer than 2 faces, or when all faces
    ///   are identical so no direction carries variance.
    /// - `DimensionMismatch` if the faces differ in size.
    /// - `InvalidParameter` for a zero component request, a threshold outside
    ///   `[0, 1]`, or a face labeled with the reserved subject id 0.
    /// - `Cancelled` if `token` fires; nothing partial is returned.
    pub fn train_with_cancellation(
        &self,
        training_set: &[LabeledFace],
        token: &CancellationToken,
    ) -> Result<EigenfaceModel> {
        let n_faces = training_set.len();
        if n_faces < 2 {
            return Err(RecognitionError::InsufficientTrainingData(format!(
                "at least 2 training faces are required, got {}",
                n_faces
            )));
        }
        if self.config.requested_eigen_vectors_no == Some(0) {
            return Err(RecognitionError::InvalidParameter(
                "requested number of eigenfaces must be greater than 0".to_string(),
            ));
        }
        validate_threshold(self.config.recognition_threshold)?;
        if let Some(position) = training_set.iter().position(|f| f.subject_id == 0) {
            return Err(RecognitionError::InvalidParameter(format!(
                "training face {} uses the reserved subject id 0",
                position
            )));
        }
        let dimensions = common_dimensions(training_set.iter().map(|f| &f.image))?;
        let n_pixels = dimensions.pixel_count();

        info!(
            "Training eigenface model on {} faces of {} ({} pixels), distance {:?}",
            n_faces, dimensions, n_pixels, self.config.distance_type
        );
        let overall_start_time = Instant::now();

        // --- 1. Data matrix, one flattened face per row ---
        let mut data_matrix = Array2::<f64>::zeros((n_faces, n_pixels));
        data_matrix
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(training_set.par_iter())
            .try_for_each(|(mut row, face)| -> Result<()> {
                token.check()?;
                row.assign(&face.image.flatten());
                Ok(())
            })?;

        // --- 2. Mean face and centering ---
        let mean = mean_vector(&data_matrix)?;
        data_matrix -= &mean;
        let centered = data_matrix;

        // --- 3. Gram matrix ---
        let gram_start_time = Instant::now();
        let gram = gram_matrix(&centered, token)?;
        debug!(
            "Built {}x{} Gram matrix in {:?}",
            n_faces,
            n_faces,
            gram_start_time.elapsed()
        );

        // --- 4. Eigendecomposition, sorted by descending eigenvalue ---
        let eigh_start_time = Instant::now();
        let eig = LinAlgBackendProvider::new().eigh_upper(&gram)?;
        let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
        // Stable sort: equal eigenvalues keep their original index order.
        order.sort_by(|&a, &b| {
            eig.eigenvalues[b]
                .partial_cmp(&eig.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!("Decomposed Gram matrix in {:?}", eigh_start_time.elapsed());

        // --- 5. Lift to pixel space and select ---
        let max_components = n_faces - 1;
        let target_components = self
            .config
            .requested_eigen_vectors_no
            .map_or(max_components, |requested| {
                if requested > max_components {
                    warn!(
                        "Requested {} eigenfaces but {} faces support at most {}; clamping.",
                        requested, n_faces, max_components
                    );
                }
                requested.min(max_components)
            });

        let lifted: Vec<Option<Array1<f64>>> = order
            .par_iter()
            .map(|&idx| -> Result<Option<Array1<f64>>> {
                token.check()?;
                Ok(lift_eigenvector(&centered, eig.eigenvectors.column(idx)))
            })
            .collect::<Result<Vec<_>>>()?;

        let largest_eigenvalue = order.first().map_or(0.0, |&idx| eig.eigenvalues[idx]);
        let rank_floor = largest_eigenvalue.max(0.0) * RANK_TOLERANCE;
        let mut directions: Vec<Array1<f64>> = Vec::with_capacity(target_components);
        let mut variances: Vec<f64> = Vec::with_capacity(target_components);
        for (&idx, axis) in order.iter().zip(lifted) {
            if directions.len() == target_components {
                break;
            }
            match axis {
                Some(axis) if eig.eigenvalues[idx] > rank_floor => {
                    variances.push(eig.eigenvalues[idx].max(0.0));
                    directions.push(axis);
                }
                _ => debug!(
                    "Skipping Gram eigenvector {} (eigenvalue {:.3e}): no variance along it.",
                    idx, eig.eigenvalues[idx]
                ),
            }
        }
        if directions.is_empty() {
            return Err(RecognitionError::InsufficientTrainingData(
                "training faces are identical; no direction carries variance".to_string(),
            ));
        }
        if directions.len() < target_components {
            warn!(
                "Only {} of {} requested eigenfaces carry variance.",
                directions.len(),
                target_components
            );
        }
        let views: Vec<ArrayView1<f64>> = directions.iter().map(|v| v.view()).collect();
        let principal_directions = ndarray::stack(Axis(1), &views)
            .map_err(|e| RecognitionError::Linalg(format!("failed to assemble eigenfaces: {}", e)))?;

        // --- 6. Project the training faces ---
        let k = principal_directions.ncols();
        let mut projected = Array2::<f64>::zeros((n_faces, k));
        projected
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(centered.axis_iter(Axis(0)).into_par_iter())
            .try_for_each(|(mut out_row, centered_row)| -> Result<()> {
                token.check()?;
                out_row.assign(&project_centered(centered_row, &principal_directions));
                Ok(())
            })?;
        token.check()?;

        let model = EigenfaceModel::from_parts(
            ModelConfig {
                distance_type: self.config.distance_type,
                recognition_threshold: self.config.recognition_threshold,
                dimensions,
            },
            FaceImage::from_flat(dimensions, mean)?,
            principal_directions,
            Array1::from(variances),
            projected,
            training_set.iter().map(|f| f.subject_id).collect(),
        )?;

        info!(
            "Trained eigenface model with {} components in {:?}",
            model.eigen_vectors_no(),
            overall_start_time.elapsed()
        );
        Ok(model)
    }
}

/// `A A^T / (N - 1)` for a centered `N x D` matrix, computed row by row in parallel.
fn gram_matrix(centered: &Array2<f64>, token: &CancellationToken) -> Result<Array2<f64>> {
    let n = centered.nrows();
    let denom = (n - 1) as f64;
    let mut gram = Array2::<f64>::zeros((n, n));
    gram.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(i, mut row)| -> Result<()> {
            token.check()?;
            let face_i = centered.row(i);
            for j in 0..n {
                row[j] = face_i.dot(&centered.row(j)) / denom;
            }
            Ok(())
        })?;
    Ok(gram)
}

/// `A^T u` normalized to unit length, or `None` if it vanishes.
fn lift_eigenvector(centered: &Array2<f64>, u: ArrayView1<f64>) -> Option<Array1<f64>> {
    let mut axis = centered.t().dot(&u);
    let norm = axis.dot(&axis).sqrt();
    if norm > NORMALIZATION_THRESHOLD {
        axis.mapv_inplace(|x| x / norm);
        Some(axis)
    } else {
        None
    }
}
