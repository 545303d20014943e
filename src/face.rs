//! Face images as dense `f64` pixel matrices.

use std::fmt;
use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{RecognitionError, Result};

/// Width and height of a face image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels, i.e. the length of a flattened image.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A cropped, normalized single-channel face image.
///
/// Pixels are stored row-major with shape `(height, width)`. Flattening walks
/// rows in order, so the flat index of pixel `(row, col)` is `row * width + col`.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceImage {
    dimensions: ImageDimensions,
    pixels: Array2<f64>,
}

impl FaceImage {
    /// Wraps a `(height, width)` pixel matrix.
    ///
    /// # Errors
    /// `InvalidParameter` for an empty matrix or non-finite pixel values.
    pub fn new(pixels: Array2<f64>) -> Result<Self> {
        let (height, width) = pixels.dim();
        if height == 0 || width == 0 {
            return Err(RecognitionError::InvalidParameter(
                "face image must have at least one pixel".to_string(),
            ));
        }
        if pixels.iter().any(|v| !v.is_finite()) {
            return Err(RecognitionError::InvalidParameter(
                "face image contains non-finite pixel values".to_string(),
            ));
        }
        let dimensions = ImageDimensions::new(width as u32, height as u32);
        Ok(Self { dimensions, pixels })
    }

    /// Builds an image by evaluating `f(row, col)` for every pixel.
    pub fn from_shape_fn<F>(dimensions: ImageDimensions, f: F) -> Result<Self>
    where
        F: FnMut((usize, usize)) -> f64,
    {
        let shape = (dimensions.height as usize, dimensions.width as usize);
        Self::new(Array2::from_shape_fn(shape, f))
    }

    /// Rebuilds an image from a row-major flat vector.
    pub fn from_flat(dimensions: ImageDimensions, flat: Array1<f64>) -> Result<Self> {
        let shape = (dimensions.height as usize, dimensions.width as usize);
        if flat.len() != dimensions.pixel_count() {
            return Err(RecognitionError::InvalidParameter(format!(
                "flat vector has {} values but {} image needs {}",
                flat.len(),
                dimensions,
                dimensions.pixel_count()
            )));
        }
        let pixels = Array2::from_shape_vec(shape, flat.to_vec())
            .map_err(|e| RecognitionError::InvalidParameter(e.to_string()))?;
        Self::new(pixels)
    }

    pub fn from_luma(image: &GrayImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_shape_fn(ImageDimensions::new(width, height), |(row, col)| {
            image.get_pixel(col as u32, row as u32)[0] as f64
        })
    }

    /// Converts any decoded image to 8-bit luma first.
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        Self::from_luma(&image.to_luma8())
    }

    /// Decodes an image file from disk.
    ///
    /// # Errors
    /// `FileNotFound` if `path` does not exist, `Image` if decoding fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RecognitionError::FileNotFound(path.to_path_buf()));
        }
        let decoded = image::open(path)?;
        Self::from_dynamic(&decoded)
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn pixels(&self) -> &Array2<f64> {
        &self.pixels
    }

    /// Row-major copy of the pixels as a vector of length `width * height`.
    pub fn flatten(&self) -> Array1<f64> {
        self.pixels.iter().copied().collect()
    }

    /// Fails with `DimensionMismatch` unless this image has `expected` dimensions.
    pub fn ensure_dimensions(&self, expected: ImageDimensions) -> Result<()> {
        if self.dimensions != expected {
            return Err(RecognitionError::DimensionMismatch {
                expected,
                found: self.dimensions,
            });
        }
        Ok(())
    }

    /// Min-max rescales the pixels into an 8-bit luma image.
    /// A constant image maps to mid-gray.
    pub fn to_luma_rescaled(&self) -> GrayImage {
        luma_from_flat(self.dimensions, self.pixels.iter().copied())
    }
}

/// Min-max rescales a row-major sequence of values into an 8-bit luma image.
pub(crate) fn luma_from_flat<I>(dimensions: ImageDimensions, values: I) -> GrayImage
where
    I: IntoIterator<Item = f64> + Clone,
{
    let (min, max) = values
        .clone()
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let mut out = GrayImage::new(dimensions.width, dimensions.height);
    for (idx, value) in values.into_iter().enumerate() {
        let scaled = if range > 1e-12 {
            ((value - min) / range * 255.0).round()
        } else {
            128.0
        };
        let col = (idx % dimensions.width as usize) as u32;
        let row = (idx / dimensions.width as usize) as u32;
        out.put_pixel(col, row, Luma([scaled.clamp(0.0, 255.0) as u8]));
    }
    out
}

/// A face image with its subject label. Subject id `0` means "unknown".
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFace {
    pub subject_id: u32,
    pub image: FaceImage,
}

impl LabeledFace {
    pub fn new(subject_id: u32, image: FaceImage) -> Self {
        Self { subject_id, image }
    }
}

/// Checks that every image shares the dimensions of the first one and returns them.
///
/// # Errors
/// `InsufficientTrainingData` for an empty slice, `DimensionMismatch` on the
/// first differing image.
pub fn common_dimensions<'a, I>(images: I) -> Result<ImageDimensions>
where
    I: IntoIterator<Item = &'a FaceImage>,
{
    let mut iter = images.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| RecognitionError::InsufficientTrainingData("no images".to_string()))?
        .dimensions();
    for image in iter {
        image.ensure_dimensions(first)?;
    }
    Ok(first)
}

/// Per-pixel mean of a non-empty set of same-sized flattened images,
/// one image per row of `data`.
pub fn mean_vector(data: &Array2<f64>) -> Result<Array1<f64>> {
    data.mean_axis(ndarray::Axis(0)).ok_or_else(|| {
        RecognitionError::InsufficientTrainingData("cannot average an empty image set".to_string())
    })
}

/// Dot product of two equal-length views.
pub fn dot(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.dot(&b)
}
