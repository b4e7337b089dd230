//! Linear algebra helpers for small fixed-size covariances.
//!
//! Public API:
//!     pub fn matrix_square_root(matrix: &Matrix3<f64>) -> Matrix3<f64>
//!     pub fn is_positive_semidefinite(matrix: &Matrix3<f64>, tolerance: f64) -> bool
//!     pub fn sample_covariance<const D: usize>(samples: &[SVector<f64, D>]) -> SMatrix<f64, D, D>
//!
//! Internal pipeline for the square root (each step isolated for testing):
//!     - symmetrize()
//!     - chol_sqrt()
//!     - evd_symmetric_sqrt_with_floor()
//!
//! Strategy:
//! 1) Symmetrize P ← 0.5 (P + Pᵀ)
//! 2) Cholesky
//! 3) Symmetric EVD with eigenvalues clamped at zero → S = U * sqrt(Λ⁺) * Uᵀ
//!
//! The clamp is at zero rather than a small positive floor: a noise-free sensor has a zero
//! covariance and its noise factor must be exactly zero.

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{Matrix3, SMatrix, SVector};

/// Compute a square root `S` such that `matrix ≈ S * Sᵀ`.
///
/// Attempts Cholesky decomposition first (yielding lower triangular `L`). If the matrix is only
/// positive semi-definite (for example all zeros, or a sensor axis without noise) Cholesky fails
/// and the symmetric eigen-decomposition is used instead.
///
/// # Arguments
/// * `matrix` - A symmetric positive semi-definite covariance.
///
/// # Returns
/// A matrix `S` with `S * Sᵀ ≈ matrix`. Lower triangular when Cholesky succeeded, symmetric otherwise.
pub fn matrix_square_root(matrix: &Matrix3<f64>) -> Matrix3<f64> {
    let p = symmetrize(matrix);
    if let Some(s) = chol_sqrt(&p) {
        return s;
    }
    evd_symmetric_sqrt_with_floor(&p, 0.0)
}

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
#[inline]
pub fn symmetrize<const D: usize>(m: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    0.5 * (m + m.transpose())
}

/// Check that the smallest eigenvalue is not below `-tolerance * max|λ|`.
pub fn is_positive_semidefinite(matrix: &Matrix3<f64>, tolerance: f64) -> bool {
    let eigenvalues = SymmetricEigen::new(symmetrize(matrix)).eigenvalues;
    let scale = eigenvalues.amax().max(f64::MIN_POSITIVE);
    eigenvalues.min() >= -tolerance * scale
}

/// Unbiased sample covariance of a set of fixed-size vectors.
///
/// Returns the zero matrix when fewer than two samples are given.
pub fn sample_covariance<const D: usize>(samples: &[SVector<f64, D>]) -> SMatrix<f64, D, D> {
    if samples.len() < 2 {
        return SMatrix::<f64, D, D>::zeros();
    }
    let n = samples.len() as f64;
    let mean = samples
        .iter()
        .fold(SVector::<f64, D>::zeros(), |acc, s| acc + s)
        / n;
    let mut covariance = SMatrix::<f64, D, D>::zeros();
    for sample in samples {
        let centered = sample - mean;
        covariance += centered * centered.transpose();
    }
    covariance / (n - 1.0)
}

/// Plain Cholesky square root, or None if the matrix is not positive definite.
fn chol_sqrt(p: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    Cholesky::new(*p).map(|ch| ch.l())
}

/// Symmetric EVD square root with eigenvalue flooring:
/// S = U * sqrt(max(λ, floor)) * Uᵀ
fn evd_symmetric_sqrt_with_floor(p: &Matrix3<f64>, floor: f64) -> Matrix3<f64> {
    let se = SymmetricEigen::new(*p);
    let u = se.eigenvectors;
    let sqrt_vals = se.eigenvalues.map(|l| l.max(floor).sqrt());
    u * Matrix3::from_diagonal(&sqrt_vals) * u.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn approx_eq(a: &Matrix3<f64>, b: &Matrix3<f64>, tol: f64) -> bool {
        (a - b).amax() <= tol
    }

    #[test]
    fn t_symmetrize() {
        let m = Matrix3::new(1.0, 2.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let s = symmetrize(&m);
        assert!(approx_eq(&s, &s.transpose(), 0.0));
        assert_eq!(s[(0, 1)], 1.0);
    }

    #[test]
    fn t_chol_sqrt_spd() {
        let p = Matrix3::new(4.0, 1.0, 0.0, 1.0, 3.0, 0.5, 0.0, 0.5, 2.0);
        let l = chol_sqrt(&p).expect("SPD matrix must factor");
        assert!(approx_eq(&(l * l.transpose()), &p, 1e-12));
    }

    #[test]
    fn t_chol_sqrt_none_for_singular() {
        assert!(chol_sqrt(&Matrix3::zeros()).is_none());
    }

    #[test]
    fn t_public_isotropic() {
        let sigma = 0.1_f64 / 60.0;
        let s = matrix_square_root(&(Matrix3::identity() * sigma * sigma));
        assert!(approx_eq(&s, &(Matrix3::identity() * sigma), 1e-15));
    }

    #[test]
    fn t_public_zero_is_exactly_zero() {
        let s = matrix_square_root(&Matrix3::zeros());
        assert_eq!(s, Matrix3::zeros());
    }

    #[test]
    fn t_public_semidefinite() {
        let p = Matrix3::from_diagonal(&Vector3::new(1e-4, 0.0, 4e-4));
        let s = matrix_square_root(&p);
        assert!(approx_eq(&(s * s.transpose()), &p, 1e-12));
    }

    #[test]
    fn t_psd_check() {
        assert!(is_positive_semidefinite(&Matrix3::identity(), 1e-12));
        assert!(is_positive_semidefinite(&Matrix3::zeros(), 1e-12));
        let indefinite = Matrix3::from_diagonal(&Vector3::new(1.0, -0.5, 1.0));
        assert!(!is_positive_semidefinite(&indefinite, 1e-12));
    }

    #[test]
    fn t_sample_covariance() {
        let samples = vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, -2.0, 0.0),
        ];
        let c = sample_covariance(&samples);
        assert!((c[(0, 0)] - 2.0 / 3.0).abs() < 1e-12);
        assert!((c[(1, 1)] - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(c[(2, 2)], 0.0);
        assert_eq!(c[(0, 1)], 0.0);
    }

    #[test]
    fn t_sample_covariance_too_few() {
        let c = sample_covariance(&[Vector3::new(1.0, 2.0, 3.0)]);
        assert_eq!(c, Matrix3::zeros());
    }
}
