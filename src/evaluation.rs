//! Batch accuracy measurement over a labeled test set.

use std::time::Instant;

use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::face::LabeledFace;
use crate::matcher::classify_image;
use crate::model::EigenfaceModel;

/// Result of classifying one labeled test face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EvaluationOutcome {
    /// The face was classified; `predicted` is 0 when it was rejected as unknown.
    Classified { predicted: u32, confidence: f64 },
    /// The face could not be classified (e.g. wrong dimensions).
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationItem {
    /// Position in the test set.
    pub index: usize,
    pub expected: u32,
    pub outcome: EvaluationOutcome,
}

impl EvaluationItem {
    pub fn is_correct(&self) -> bool {
        matches!(self.outcome, EvaluationOutcome::Classified { predicted, .. } if predicted == self.expected)
    }
}

/// Per-item outcomes plus aggregate accuracy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// One entry per test face, in input order.
    pub items: Vec<EvaluationItem>,
    /// Faces that were classified (failures excluded).
    pub attempted: usize,
    pub correct: usize,
    pub failed: usize,
}

impl EvaluationReport {
    /// `correct / attempted`, or 0 when nothing was attempted.
    pub fn accuracy(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.correct as f64 / self.attempted as f64
        }
    }
}

/// Classifies every test face with `results_no = 1` and tallies the results.
///
/// Per-face errors are recorded in the report instead of aborting the batch.
/// The model is only read.
pub fn evaluate(test_set: &[LabeledFace], model: &EigenfaceModel) -> EvaluationReport {
    let start_time = Instant::now();
    let items: Vec<EvaluationItem> = test_set
        .par_iter()
        .enumerate()
        .map(|(index, face)| {
            let outcome = match classify_image(&face.image, model, 1) {
                Ok(result) => {
                    let (predicted, confidence) = result
                        .best()
                        .map_or((0, 0.0), |c| (c.subject_id, c.confidence));
                    EvaluationOutcome::Classified {
                        predicted,
                        confidence,
                    }
                }
                Err(e) => {
                    warn!("Skipping test face {} (subject {}): {}", index, face.subject_id, e);
                    EvaluationOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            EvaluationItem {
                index,
                expected: face.subject_id,
                outcome,
            }
        })
        .collect();

    let failed = items
        .iter()
        .filter(|i| matches!(i.outcome, EvaluationOutcome::Failed { .. }))
        .count();
    let correct = items.iter().filter(|i| i.is_correct()).count();
    let report = EvaluationReport {
        attempted: items.len() - failed,
        correct,
        failed,
        items,
    };
    info!(
        "Evaluated {} test faces in {:?}: {}/{} correct ({:.2}%), {} failed",
        test_set.len(),
        start_time.elapsed(),
        report.correct,
        report.attempted,
        report.accuracy() * 100.0,
        report.failed
    );
    report
}
