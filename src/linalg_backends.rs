// src/linalg_backends.rs

//! Symmetric eigendecomposition behind a small backend trait.
//!
//! The trainer only ever decomposes the `N x N` Gram matrix of the training
//! set, so a single operation is abstracted here. The concrete backend is
//! chosen at compile time: `backend_faer` (pure Rust, the default) or one of
//! the LAPACK-backed `ndarray-linalg` features.

use ndarray::{Array1, Array2};

use crate::error::{RecognitionError, Result};

#[cfg(not(any(
    feature = "backend_faer",
    feature = "backend_openblas",
    feature = "backend_openblas_system",
    feature = "backend_mkl",
    feature = "backend_mkl_system"
)))]
compile_error!("enable one linear algebra backend feature, e.g. `backend_faer`");

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues in the order produced by the backend (typically ascending).
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns; `eigenvectors.column(i)` belongs to `eigenvalues[i]`.
    pub eigenvectors: Array2<f64>,
}

/// Symmetric eigendecomposition reading the upper triangle of `matrix`.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput>;
}

fn check_square(matrix: &Array2<f64>) -> Result<()> {
    if matrix.nrows() != matrix.ncols() {
        return Err(RecognitionError::Linalg(format!(
            "matrix must be square for eigendecomposition, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(RecognitionError::Linalg(
            "matrix contains non-finite entries".to_string(),
        ));
    }
    Ok(())
}

#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{check_square, BackendEigh, EighOutput};
    use crate::error::{RecognitionError, Result};
    use faer::{Mat, Side};
    use ndarray::{Array1, Array2};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    impl BackendEigh for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput> {
            check_square(matrix)?;
            let n = matrix.nrows();
            if n == 0 {
                return Ok(EighOutput {
                    eigenvalues: Array1::zeros(0),
                    eigenvectors: Array2::zeros((0, 0)),
                });
            }
            // Mirror the upper triangle so the input handed to faer is exactly symmetric.
            let symmetric = Mat::<f64>::from_fn(n, n, |i, j| {
                if i <= j {
                    matrix[[i, j]]
                } else {
                    matrix[[j, i]]
                }
            });
            let eig = symmetric.as_ref().self_adjoint_eigen(Side::Upper).map_err(|e| {
                RecognitionError::Linalg(format!("faer self-adjoint eigendecomposition failed: {:?}", e))
            })?;

            let diag = eig.S();
            let eigenvalues = Array1::from_shape_fn(diag.dim(), |idx| diag[idx]);
            let vectors_ref = eig.U();
            let eigenvectors =
                Array2::from_shape_fn((vectors_ref.nrows(), vectors_ref.ncols()), |(i, j)| {
                    vectors_ref[(i, j)]
                });
            Ok(EighOutput {
                eigenvalues,
                eigenvectors,
            })
        }
    }
}

#[cfg(not(feature = "backend_faer"))]
mod ndarray_specific_code {
    use super::{check_square, BackendEigh, EighOutput};
    use crate::error::{RecognitionError, Result};
    use ndarray::{Array1, Array2};
    use ndarray_linalg::{Eigh, UPLO};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct NdarrayLinAlgBackend;

    impl BackendEigh for NdarrayLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput> {
            check_square(matrix)?;
            if matrix.is_empty() {
                return Ok(EighOutput {
                    eigenvalues: Array1::zeros(0),
                    eigenvectors: Array2::zeros((0, 0)),
                });
            }
            let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(|e| {
                RecognitionError::Linalg(format!("LAPACK eigendecomposition failed: {}", e))
            })?;
            Ok(EighOutput {
                eigenvalues,
                eigenvectors,
            })
        }
    }
}

/// Dispatches to the backend selected by cargo features. `backend_faer` wins
/// when several backends are enabled.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider;

impl LinAlgBackendProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendEigh for LinAlgBackendProvider {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.eigh_upper(matrix)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            ndarray_specific_code::NdarrayLinAlgBackend.eigh_upper(matrix)
        }
    }
}
