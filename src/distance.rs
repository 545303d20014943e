//! Distance metrics in eigenface space, one strategy per [`DistanceType`].

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Selects the metric used to compare projected faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceType {
    /// Sum of squared component differences.
    Euclidean,
    /// Squared differences weighted by the inverse variance of each component.
    Mahalanobis,
}

impl Default for DistanceType {
    fn default() -> Self {
        DistanceType::Mahalanobis
    }
}

impl DistanceType {
    /// Returns the strategy implementing this metric.
    pub fn metric(self) -> &'static dyn DistanceMetric {
        match self {
            DistanceType::Euclidean => &Euclidean,
            DistanceType::Mahalanobis => &Mahalanobis,
        }
    }
}

/// Distance between two feature vectors of equal length.
///
/// `variances` is the model's per-component variance vector, parallel to the
/// feature vectors. Implementations must be symmetric and return `0.0` for
/// identical inputs.
pub trait DistanceMetric: Sync {
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>, variances: ArrayView1<f64>) -> f64;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>, _variances: ArrayView1<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum()
    }
}

/// Variances below this are treated as this value to keep weights finite.
const MIN_VARIANCE: f64 = 1e-12;

#[derive(Debug, Default, Copy, Clone)]
pub struct Mahalanobis;

impl DistanceMetric for Mahalanobis {
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>, variances: ArrayView1<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .zip(variances.iter())
            .map(|((x, y), var)| (x - y).powi(2) / var.max(MIN_VARIANCE))
            .sum()
    }
}
