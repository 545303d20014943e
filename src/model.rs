//! The immutable eigenface model.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceType;
use crate::error::{RecognitionError, Result};
use crate::face::{FaceImage, ImageDimensions};

/// Matching parameters stored with a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Metric used to compare projected faces.
    pub distance_type: DistanceType,
    /// Minimum top confidence, in `[0, 1]`, for a subject to be reported instead of "unknown".
    pub recognition_threshold: f64,
    /// Dimensions every training and query image must have.
    pub dimensions: ImageDimensions,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.recognition_threshold)?;
        if self.dimensions.pixel_count() == 0 {
            return Err(RecognitionError::InvalidParameter(format!(
                "image dimensions {} have no pixels",
                self.dimensions
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(RecognitionError::InvalidParameter(format!(
            "recognition threshold must lie in [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

/// Variances may increase by at most this much between consecutive components
/// before a model is considered inconsistent (absorbs re-encoding noise).
const VARIANCE_ORDER_SLACK: f64 = 1e-9;

/// An eigenface subspace model together with its enrolled gallery.
///
/// Built wholesale by [`crate::trainer`] or [`crate::persistence::load`] and
/// never mutated afterwards, so it can be shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct EigenfaceModel {
    config: ModelConfig,
    average_face: FaceImage,
    /// Shape: (pixel_count, eigen_vectors_no); columns are unit eigenfaces.
    principal_directions: Array2<f64>,
    /// Shape: (eigen_vectors_no), non-increasing.
    variances: Array1<f64>,
    /// Shape: (train_faces_no, eigen_vectors_no)
    projected_training_vectors: Array2<f64>,
    subject_ids: Vec<u32>,
    /// Largest pairwise training distance under `config.distance_type`.
    distance_scale: f64,
}

impl EigenfaceModel {
    /// Assembles a model, checking every structural invariant.
    ///
    /// # Errors
    /// `InvalidParameter` for a bad config, `CorruptModel` when shapes,
    /// counts or values are inconsistent.
    pub fn from_parts(
        config: ModelConfig,
        average_face: FaceImage,
        principal_directions: Array2<f64>,
        variances: Array1<f64>,
        projected_training_vectors: Array2<f64>,
        subject_ids: Vec<u32>,
    ) -> Result<Self> {
        config.validate()?;
        let corrupt = |msg: String| -> Result<Self> { Err(RecognitionError::CorruptModel(msg)) };

        if average_face.dimensions() != config.dimensions {
            return corrupt(format!(
                "average face is {} but model expects {}",
                average_face.dimensions(),
                config.dimensions
            ));
        }
        let n_pixels = config.dimensions.pixel_count();
        let k = principal_directions.ncols();
        let n = projected_training_vectors.nrows();

        if principal_directions.nrows() != n_pixels {
            return corrupt(format!(
                "principal directions have {} pixels, expected {}",
                principal_directions.nrows(),
                n_pixels
            ));
        }
        if k == 0 {
            return corrupt("model has no principal directions".to_string());
        }
        if variances.len() != k {
            return corrupt(format!(
                "{} variances for {} principal directions",
                variances.len(),
                k
            ));
        }
        if projected_training_vectors.ncols() != k {
            return corrupt(format!(
                "projected training vectors have {} columns, expected {}",
                projected_training_vectors.ncols(),
                k
            ));
        }
        if subject_ids.len() != n {
            return corrupt(format!(
                "{} subject ids for {} projected training vectors",
                subject_ids.len(),
                n
            ));
        }
        if n < 2 || k > n - 1 {
            return corrupt(format!(
                "{} principal directions cannot be derived from {} training faces",
                k, n
            ));
        }
        if variances.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return corrupt("variances must be finite and non-negative".to_string());
        }
        if variances
            .windows(2)
            .into_iter()
            .any(|w| w[1] > w[0] + VARIANCE_ORDER_SLACK)
        {
            return corrupt("variances are not sorted in descending order".to_string());
        }
        if principal_directions.iter().any(|v| !v.is_finite())
            || projected_training_vectors.iter().any(|v| !v.is_finite())
        {
            return corrupt("model contains non-finite values".to_string());
        }

        let distance_scale =
            max_pairwise_distance(&projected_training_vectors, &variances, config.distance_type);

        Ok(Self {
            config,
            average_face,
            principal_directions,
            variances,
            projected_training_vectors,
            subject_ids,
            distance_scale,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.config.dimensions
    }

    pub fn average_face(&self) -> &FaceImage {
        &self.average_face
    }

    pub fn principal_directions(&self) -> &Array2<f64> {
        &self.principal_directions
    }

    /// The `i`-th eigenface as a flat pixel vector.
    pub fn principal_direction(&self, i: usize) -> ArrayView1<'_, f64> {
        self.principal_directions.column(i)
    }

    pub fn variances(&self) -> &Array1<f64> {
        &self.variances
    }

    pub fn projected_training_vectors(&self) -> &Array2<f64> {
        &self.projected_training_vectors
    }

    pub fn subject_ids(&self) -> &[u32] {
        &self.subject_ids
    }

    pub fn train_faces_no(&self) -> usize {
        self.subject_ids.len()
    }

    pub fn eigen_vectors_no(&self) -> usize {
        self.variances.len()
    }

    pub fn distance_scale(&self) -> f64 {
        self.distance_scale
    }

    /// Fraction of the captured variance carried by each component.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total = self.variances.sum();
        if total > 0.0 {
            &self.variances / total
        } else {
            Array1::zeros(self.variances.len())
        }
    }

    /// Maps a distance to a confidence in `[0, 1]`, decreasing in `distance`.
    pub fn confidence(&self, distance: f64) -> f64 {
        if self.distance_scale > 0.0 {
            (1.0 - distance / self.distance_scale).clamp(0.0, 1.0)
        } else if distance <= 0.0 {
            1.0
        } else {
            0.0
        }
    }

    /// Rebuilds a face from its subspace coordinates: the average face plus
    /// the weighted sum of eigenfaces.
    pub fn reconstruct(&self, features: ArrayView1<f64>) -> Result<FaceImage> {
        if features.len() != self.eigen_vectors_no() {
            return Err(RecognitionError::FeatureLengthMismatch {
                expected: self.eigen_vectors_no(),
                found: features.len(),
            });
        }
        let flat = self.average_face.flatten() + self.principal_directions.dot(&features);
        FaceImage::from_flat(self.config.dimensions, flat)
    }

    /// Field-by-field comparison with an absolute tolerance on floats.
    pub fn approx_eq(&self, other: &EigenfaceModel, tolerance: f64) -> bool {
        fn close<'a, I: Iterator<Item = (&'a f64, &'a f64)>>(mut it: I, tol: f64) -> bool {
            it.all(|(a, b)| (a - b).abs() <= tol)
        }
        self.config.distance_type == other.config.distance_type
            && self.config.dimensions == other.config.dimensions
            && (self.config.recognition_threshold - other.config.recognition_threshold).abs()
                <= tolerance
            && self.subject_ids == other.subject_ids
            && self.principal_directions.dim() == other.principal_directions.dim()
            && self.projected_training_vectors.dim() == other.projected_training_vectors.dim()
            && self.variances.len() == other.variances.len()
            && close(
                self.average_face.pixels().iter().zip(other.average_face.pixels().iter()),
                tolerance,
            )
            && close(
                self.principal_directions.iter().zip(other.principal_directions.iter()),
                tolerance,
            )
            && close(self.variances.iter().zip(other.variances.iter()), tolerance)
            && close(
                self.projected_training_vectors
                    .iter()
                    .zip(other.projected_training_vectors.iter()),
                tolerance,
            )
    }
}

fn max_pairwise_distance(
    vectors: &Array2<f64>,
    variances: &Array1<f64>,
    distance_type: DistanceType,
) -> f64 {
    let metric = distance_type.metric();
    let n = vectors.nrows();
    (0..n)
        .into_par_iter()
        .map(|i| {
            let a = vectors.row(i);
            ((i + 1)..n)
                .map(|j| metric.distance(a, vectors.row(j), variances.view()))
                .fold(0.0_f64, f64::max)
        })
        .reduce(|| 0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            distance_type: DistanceType::Euclidean,
            recognition_threshold: 0.5,
            dimensions: ImageDimensions::new(2, 1),
        }
    }

    fn tiny_model() -> Result<EigenfaceModel> {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        EigenfaceModel::from_parts(
            tiny_config(),
            FaceImage::new(array![[1.0, 1.0]])?,
            array![[s], [s]],
            array![2.0],
            array![[-1.0], [1.0], [3.0]],
            vec![1, 2, 2],
        )
    }

    #[test]
    fn accepts_consistent_parts() {
        let model = tiny_model().unwrap();
        assert_eq!(model.train_faces_no(), 3);
        assert_eq!(model.eigen_vectors_no(), 1);
        assert_eq!(model.distance_scale(), 16.0);
        assert_eq!(model.confidence(0.0), 1.0);
        assert_eq!(model.confidence(8.0), 0.5);
        assert_eq!(model.confidence(40.0), 0.0);
    }

    #[test]
    fn rejects_mismatched_counts() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let err = EigenfaceModel::from_parts(
            tiny_config(),
            FaceImage::new(array![[1.0, 1.0]]).unwrap(),
            array![[s], [s]],
            array![2.0],
            array![[-1.0], [1.0]],
            vec![1, 2, 3],
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::CorruptModel(_)));
    }

    #[test]
    fn rejects_too_many_directions_and_unsorted_variances() {
        let err = EigenfaceModel::from_parts(
            tiny_config(),
            FaceImage::new(array![[1.0, 1.0]]).unwrap(),
            array![[1.0, 0.0], [0.0, 1.0]],
            array![2.0, 1.0],
            array![[0.0, 0.0], [1.0, 1.0]],
            vec![1, 2],
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::CorruptModel(_)));

        let err = EigenfaceModel::from_parts(
            tiny_config(),
            FaceImage::new(array![[1.0, 1.0]]).unwrap(),
            array![[1.0, 0.0], [0.0, 1.0]],
            array![1.0, 2.0],
            array![[0.0, 0.0], [1.0, 1.0], [2.0, 0.5]],
            vec![1, 2, 3],
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::CorruptModel(_)));
    }

    #[test]
    fn rejects_threshold_outside_unit_interval() {
        let mut config = tiny_config();
        config.recognition_threshold = 1.5;
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let err = EigenfaceModel::from_parts(
            config,
            FaceImage::new(array![[1.0, 1.0]]).unwrap(),
            array![[s], [s]],
            array![2.0],
            array![[-1.0], [1.0]],
            vec![1, 2],
        )
        .unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidParameter(_)));
    }

    #[test]
    fn reconstruct_adds_weighted_eigenfaces_to_mean() {
        let model = tiny_model().unwrap();
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let face = model.reconstruct(array![2.0].view()).unwrap();
        assert!((face.pixels()[[0, 0]] - (1.0 + 2.0 * s)).abs() < 1e-12);
        assert!(matches!(
            model.reconstruct(array![1.0, 2.0].view()),
            Err(RecognitionError::FeatureLengthMismatch { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn explained_variance_ratio_sums_to_one() {
        let model = tiny_model().unwrap();
        assert_eq!(model.explained_variance_ratio().to_vec(), vec![1.0]);
        assert!(model.approx_eq(&model.clone(), 0.0));
    }
}
