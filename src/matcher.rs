//! Nearest-neighbour matching of projected faces against the enrolled gallery.

use std::collections::HashSet;

use log::{debug, trace};
use ndarray::{ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RecognitionError, Result};
use crate::face::FaceImage;
use crate::model::EigenfaceModel;
use crate::projector::project_with_residual;

/// Subject id reported when the best match falls below the recognition threshold.
pub const UNKNOWN_SUBJECT: u32 = 0;

/// One ranked identity hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub subject_id: u32,
    /// Match strength in `[0, 1]`.
    pub confidence: f64,
}

/// Ranked candidates for one query, best first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub candidates: Vec<Candidate>,
}

impl RecognitionResult {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// True when the query was rejected as an unknown face.
    pub fn is_unknown(&self) -> bool {
        self.best()
            .map_or(true, |c| c.subject_id == UNKNOWN_SUBJECT)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Ranks the enrolled subjects by similarity to `query`.
///
/// Every training vector is scored with the model's distance metric and the
/// distance converted to a confidence by [`EigenfaceModel::confidence`].
/// Candidates are ordered by descending confidence, ties by ascending training
/// index; each subject appears once, at its best-scoring row. At most
/// `results_no` subjects are returned.
///
/// If the top confidence is below the recognition threshold the result is the
/// single entry `{subject_id: 0, confidence: top}`. A top confidence equal to
/// the threshold is accepted.
///
/// # Errors
/// `InvalidParameter` for `results_no == 0` or a non-finite query,
/// `FeatureLengthMismatch` if `query` does not have one value per eigenface.
pub fn classify(
    query: ArrayView1<f64>,
    model: &EigenfaceModel,
    results_no: usize,
) -> Result<RecognitionResult> {
    rank(query, model, results_no, 1.0)
}

/// Projects `image` and classifies it.
///
/// Confidences are additionally scaled by the image's face-space fraction
/// (see [`Projection::face_space_fraction`](crate::projector::Projection::face_space_fraction)),
/// so a pattern the eigenfaces cannot reconstruct scores low even when its
/// projection happens to land near an enrolled face.
pub fn classify_image(
    image: &FaceImage,
    model: &EigenfaceModel,
    results_no: usize,
) -> Result<RecognitionResult> {
    let projection = project_with_residual(image, model)?;
    let fraction = projection.face_space_fraction();
    trace!(
        "Query residual {:.4} of energy {:.4} (face-space fraction {:.4})",
        projection.residual,
        projection.energy,
        fraction
    );
    rank(projection.features.view(), model, results_no, fraction)
}

fn rank(
    query: ArrayView1<f64>,
    model: &EigenfaceModel,
    results_no: usize,
    face_space_fraction: f64,
) -> Result<RecognitionResult> {
    if results_no == 0 {
        return Err(RecognitionError::InvalidParameter(
            "number of results must be at least 1".to_string(),
        ));
    }
    if query.len() != model.eigen_vectors_no() {
        return Err(RecognitionError::FeatureLengthMismatch {
            expected: model.eigen_vectors_no(),
            found: query.len(),
        });
    }
    if query.iter().any(|v| !v.is_finite()) {
        return Err(RecognitionError::InvalidParameter(
            "query feature vector contains non-finite values".to_string(),
        ));
    }

    let metric = model.config().distance_type.metric();
    let variances = model.variances().view();
    let distances: Vec<f64> = model
        .projected_training_vectors()
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| metric.distance(query, row, variances))
        .collect();

    let mut ranked: Vec<(usize, f64)> = distances
        .iter()
        .enumerate()
        .map(|(idx, &d)| (idx, model.confidence(d) * face_space_fraction))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    // Training sets always hold at least two rows, so `ranked` is non-empty.
    let top_confidence = ranked.first().map_or(0.0, |&(_, c)| c);
    let threshold = model.config().recognition_threshold;
    if top_confidence < threshold {
        debug!(
            "Rejecting query: top confidence {:.4} is below threshold {:.4}",
            top_confidence, threshold
        );
        return Ok(RecognitionResult {
            candidates: vec![Candidate {
                subject_id: UNKNOWN_SUBJECT,
                confidence: top_confidence,
            }],
        });
    }

    let subject_ids = model.subject_ids();
    let mut seen = HashSet::with_capacity(results_no);
    let candidates: Vec<Candidate> = ranked
        .into_iter()
        .filter(|&(idx, _)| seen.insert(subject_ids[idx]))
        .take(results_no)
        .map(|(idx, confidence)| Candidate {
            subject_id: subject_ids[idx],
            confidence,
        })
        .collect();
    trace!("Ranked candidates: {:?}", candidates);
    Ok(RecognitionResult { candidates })
}
