//! 2D SPH smoothing kernels used by the reference kernels.
//!
//! All kernels have compact support `r` (the influence radius) and are
//! normalized so that their integral over the plane is 1.

use std::f32::consts::PI;

/// Spiky kernel, squared falloff.
///
/// ```text
/// W(d, r) = 6 / (pi r^4) * (r - d)^2     for d < r
/// ```
#[inline]
pub fn spiky_pow2(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r - d;
    v * v * 6.0 / (PI * r.powi(4))
}

/// Spiky kernel, cubic falloff (near-density term).
///
/// ```text
/// W(d, r) = 10 / (pi r^5) * (r - d)^3    for d < r
/// ```
#[inline]
pub fn spiky_pow3(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r - d;
    v * v * v * 10.0 / (PI * r.powi(5))
}

/// dW/dd of [`spiky_pow2`].
#[inline]
pub fn spiky_pow2_derivative(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    -(r - d) * 12.0 / (PI * r.powi(4))
}

/// dW/dd of [`spiky_pow3`].
#[inline]
pub fn spiky_pow3_derivative(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r - d;
    -v * v * 30.0 / (PI * r.powi(5))
}

/// Poly6 kernel, used for viscosity smoothing.
///
/// ```text
/// W(d, r) = 4 / (pi r^8) * (r^2 - d^2)^3  for d < r
/// ```
#[inline]
pub fn poly6(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r * r - d * d;
    v * v * v * 4.0 / (PI * r.powi(8))
}
