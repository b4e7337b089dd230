//! Rotation and rigid-transform primitives.
//!
//! Rotations are represented by [`nalgebra::Rotation3`] (a direction cosine matrix). This module
//! adds the Lie group machinery the preintegration needs on top of it:
//!
//! - [`skew`]: the skew-symmetric matrix $[v]_\times$ such that $[v]_\times u = v \times u$.
//! - [`exp_so3`] / [`log_so3`]: the exponential and logarithm maps of SO(3).
//! - [`left_jacobian`], [`right_jacobian`] and their inverses.
//! - [`Pose3`]: an element of SE(3) with composition, inverse, and the exponential/logarithm
//!   maps. The exponential map of a constant twist $\xi = (\omega, v)$ is a screw motion:
//!
//! $$
//! \exp(\xi) = \left( \exp(\omega), \; J_l(\omega) v \right)
//! $$
//!
//! All Jacobians follow the right-perturbation convention $R \exp(\delta\theta)$.
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3, Vector6};
use std::fmt::{self, Display};
use std::ops::Mul;

/// Below this angle the closed-form Jacobians switch to their Taylor expansions.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;
/// Below this quaternion vector norm the log map uses its first-order form.
const QUATERNION_SMALL_ANGLE: f64 = 1e-10;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Exponential map of SO(3): rotation by `|phi|` radians about `phi / |phi|`.
#[inline]
pub fn exp_so3(phi: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::new(*phi)
}

/// Logarithm map of SO(3), returning a rotation vector with norm in [0, π].
///
/// The angle is recovered as `2 atan2(|q_v|, q_w)` from the unit quaternion of `rotation`, so it
/// keeps full relative precision near the identity.
pub fn log_so3(rotation: &Rotation3<f64>) -> Vector3<f64> {
    let q = UnitQuaternion::from_rotation_matrix(rotation);
    // q and -q are the same rotation; pick the hemisphere with w >= 0 so the angle is in [0, π]
    let (w, imag) = if q.scalar() < 0.0 {
        (-q.scalar(), -q.imag())
    } else {
        (q.scalar(), q.imag())
    };
    let sin_half = imag.norm();
    if sin_half < QUATERNION_SMALL_ANGLE {
        // angle / sin(angle / 2) -> 2 / cos(angle / 2)
        return imag * (2.0 / w);
    }
    imag * (2.0 * sin_half.atan2(w) / sin_half)
}

/// Left Jacobian of SO(3).
///
/// ```text
/// Jl(φ) = I + (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
///
/// It maps a twist to the translation of the corresponding screw motion and is the
/// closed form of `∫₀¹ Exp(sφ) ds`.
pub fn left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;
    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + 0.5 * skew_phi + (1.0 / 6.0) * skew_phi_sq;
    }
    let theta_sq = theta * theta;
    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / (theta_sq * theta)) * skew_phi_sq
}

/// Right Jacobian of SO(3), `Jr(φ) = Jl(-φ)`.
///
/// For a small perturbation `δ`: `Exp(φ + δ) ≈ Exp(φ) Exp(Jr(φ) δ)`.
pub fn right_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    left_jacobian(&(-phi))
}

/// Inverse of the left Jacobian.
///
/// ```text
/// Jl⁻¹(φ) = I - 0.5 [φ]× + (1/|φ|² - (1 + cos|φ|)/(2|φ| sin|φ|)) [φ]×²
/// ```
pub fn left_jacobian_inverse(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;
    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew_phi + (1.0 / 12.0) * skew_phi_sq;
    }
    let coeff = 1.0 / (theta * theta) - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());
    Matrix3::identity() - 0.5 * skew_phi + coeff * skew_phi_sq
}

/// Inverse of the right Jacobian, `Jr⁻¹(φ) = Jl⁻¹(-φ)`.
pub fn right_jacobian_inverse(phi: &Vector3<f64>) -> Matrix3<f64> {
    left_jacobian_inverse(&(-phi))
}

/// Rigid body pose in the navigation frame: attitude plus translation.
///
/// Composition follows the usual convention `(a * b).transform_point(x) == a.transform_point(b.transform_point(x))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose3 {
    /// Body-to-navigation rotation
    pub rotation: Rotation3<f64>,
    /// Position of the body origin in the navigation frame
    pub translation: Vector3<f64>,
}

impl Default for Pose3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Display for Pose3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.rotation.euler_angles();
        write!(
            f,
            "Pose3 {{ translation: [{:.4}, {:.4}, {:.4}], rpy: [{:.4}, {:.4}, {:.4}] }}",
            self.translation[0], self.translation[1], self.translation[2], roll, pitch, yaw
        )
    }
}

impl Pose3 {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Pose3 {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Pose3 {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Exponential map of SE(3) for the twist `(omega, v)`.
    pub fn expmap(omega: &Vector3<f64>, v: &Vector3<f64>) -> Self {
        Pose3 {
            rotation: exp_so3(omega),
            translation: left_jacobian(omega) * v,
        }
    }

    /// Exponential map taking a stacked twist `[omega; v]`.
    pub fn expmap_vector(xi: &Vector6<f64>) -> Self {
        Self::expmap(
            &xi.fixed_rows::<3>(0).into_owned(),
            &xi.fixed_rows::<3>(3).into_owned(),
        )
    }

    /// Logarithm map, returning the stacked twist `[omega; v]`.
    pub fn logmap(&self) -> Vector6<f64> {
        let omega = log_so3(&self.rotation);
        let v = left_jacobian_inverse(&omega) * self.translation;
        let mut xi = Vector6::zeros();
        xi.fixed_rows_mut::<3>(0).copy_from(&omega);
        xi.fixed_rows_mut::<3>(3).copy_from(&v);
        xi
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Pose3 {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Relative pose `self⁻¹ * other`.
    pub fn between(&self, other: &Pose3) -> Self {
        self.inverse() * *other
    }

    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}

impl Mul for Pose3 {
    type Output = Pose3;

    fn mul(self, rhs: Pose3) -> Pose3 {
        Pose3 {
            rotation: self.rotation * rhs.rotation,
            translation: self.translation + self.rotation * rhs.translation,
        }
    }
}
