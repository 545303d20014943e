//! Projection of face images into the eigenface subspace.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::error::Result;
use crate::face::{dot, FaceImage};
use crate::model::EigenfaceModel;

/// Coordinates of a face in the model's subspace.
///
/// `feature[i] = dot(flatten(image) - flatten(average_face), eigenface_i)`.
///
/// # Errors
/// `DimensionMismatch` if the image size differs from the model's.
pub fn project(image: &FaceImage, model: &EigenfaceModel) -> Result<Array1<f64>> {
    image.ensure_dimensions(model.dimensions())?;
    let centered = image.flatten() - model.average_face().flatten();
    Ok(project_centered(centered.view(), model.principal_directions()))
}

/// A projection together with how much of the face it failed to capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub features: Array1<f64>,
    /// Squared distance between the centered face and its reconstruction.
    pub residual: f64,
    /// Squared norm of the centered face.
    pub energy: f64,
}

impl Projection {
    /// Share of the centered face's energy that lies inside face space, in `[0, 1]`.
    ///
    /// An image equal to the average face has no energy and counts as fully inside.
    pub fn face_space_fraction(&self) -> f64 {
        if self.energy > 0.0 {
            (1.0 - self.residual / self.energy).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

/// Like [`project`], also measuring the distance from face space.
///
/// Eigenfaces are orthonormal, so the residual is `|x - mean|^2 - |features|^2`.
pub fn project_with_residual(image: &FaceImage, model: &EigenfaceModel) -> Result<Projection> {
    image.ensure_dimensions(model.dimensions())?;
    let centered = image.flatten() - model.average_face().flatten();
    let features = project_centered(centered.view(), model.principal_directions());
    let energy = dot(centered.view(), centered.view());
    let residual = (energy - dot(features.view(), features.view())).max(0.0);
    Ok(Projection {
        features,
        residual,
        energy,
    })
}

/// Projects several images in parallel, one output row per image.
/// Fails on the first image with the wrong dimensions.
pub fn project_batch(images: &[FaceImage], model: &EigenfaceModel) -> Result<Array2<f64>> {
    let k = model.eigen_vectors_no();
    let mut out = Array2::<f64>::zeros((images.len(), k));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(images.par_iter())
        .try_for_each(|(mut row, image)| -> Result<()> {
            row.assign(&project(image, model)?);
            Ok(())
        })?;
    Ok(out)
}

/// Projects an already mean-centered flat image onto the columns of `directions`.
pub(crate) fn project_centered(centered: ArrayView1<f64>, directions: &Array2<f64>) -> Array1<f64> {
    directions
        .columns()
        .into_iter()
        .map(|direction| dot(centered, direction))
        .collect()
}
