//! Debug images for inspecting a trained model.
//!
//! Nothing here feeds back into training or matching.

use std::path::Path;

use image::{GrayImage, Luma};
use log::info;

use crate::error::Result;
use crate::face::luma_from_flat;
use crate::model::EigenfaceModel;

/// Writes the average face as an 8-bit grayscale image (format from the extension).
pub fn export_average_face(model: &EigenfaceModel, path: &Path) -> Result<()> {
    model.average_face().to_luma_rescaled().save(path)?;
    info!("Wrote average face to {}", path.display());
    Ok(())
}

/// Lays the eigenfaces out left to right, top to bottom, on a grid with
/// `ceil(sqrt(k))` columns. Each eigenface is min-max rescaled on its own.
pub fn eigenface_mosaic(model: &EigenfaceModel) -> GrayImage {
    let dims = model.dimensions();
    let k = model.eigen_vectors_no();
    let columns = (k as f64).sqrt().ceil().max(1.0) as u32;
    let rows = (k as u32 + columns - 1) / columns;
    let mut mosaic = GrayImage::from_pixel(dims.width * columns, dims.height * rows, Luma([0]));
    for i in 0..k {
        let tile = luma_from_flat(dims, model.principal_direction(i).iter().copied());
        let x0 = (i as u32 % columns) * dims.width;
        let y0 = (i as u32 / columns) * dims.height;
        for (x, y, pixel) in tile.enumerate_pixels() {
            mosaic.put_pixel(x0 + x, y0 + y, *pixel);
        }
    }
    mosaic
}

/// Writes [`eigenface_mosaic`] to `path`.
pub fn export_eigenfaces(model: &EigenfaceModel, path: &Path) -> Result<()> {
    eigenface_mosaic(model).save(path)?;
    info!(
        "Wrote {} eigenfaces to {}",
        model.eigen_vectors_no(),
        path.display()
    );
    Ok(())
}
