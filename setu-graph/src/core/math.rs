//! Mathematical primitives for pose residuals.
//!
//! Angle arithmetic, quaternion operations, and rigid-transform composition,
//! all generic over [`Real`] so the same code path produces plain values and
//! derivative-carrying jets. Quaternions are stored `[w, x, y, z]`.

use std::f64::consts::PI;

use crate::core::real::Real;

/// Normalize an angle to [-π, π]. Non-finite input passes through.
///
/// Branches only on the scalar value, so it is safe under dual evaluation:
/// subtracting a constant multiple of 2π leaves derivatives untouched.
#[inline]
pub fn normalize_angle<T: Real>(angle: T) -> T {
    if !angle.value().is_finite() {
        return angle;
    }
    let mut a = angle;
    while a.value() > PI {
        a = a - T::from_f64(2.0 * PI);
    }
    while a.value() < -PI {
        a = a + T::from_f64(2.0 * PI);
    }
    a
}

/// Shortest signed angular difference from `a` to `b`.
#[inline]
pub fn angle_diff<T: Real>(a: T, b: T) -> T {
    normalize_angle(b - a)
}

/// Interpolate between two angles along the shortest arc.
///
/// `t` is a fixed coefficient, not an optimized parameter; 0 returns `a`
/// and 1 returns `b` (modulo wrapping into [-π, π]).
#[inline]
pub fn angle_lerp<T: Real>(a: T, b: T, t: f64) -> T {
    normalize_angle(a + angle_diff(a, b) * T::from_f64(t))
}

/// Hamilton product of two quaternions.
#[inline]
pub fn quat_multiply<T: Real>(a: &[T; 4], b: &[T; 4]) -> [T; 4] {
    [
        a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
        a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
        a[0] * b[2] - a[1] * b[3] + a[2] * b[0] + a[3] * b[1],
        a[0] * b[3] + a[1] * b[2] - a[2] * b[1] + a[3] * b[0],
    ]
}

/// Conjugate of a quaternion; the inverse for unit quaternions.
#[inline]
pub fn quat_conjugate<T: Real>(q: &[T; 4]) -> [T; 4] {
    [q[0], -q[1], -q[2], -q[3]]
}

/// Scale a quaternion to unit norm.
#[inline]
pub fn quat_normalize<T: Real>(q: &[T; 4]) -> [T; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    let inv = T::one() / norm;
    [q[0] * inv, q[1] * inv, q[2] * inv, q[3] * inv]
}

/// Rotate a point by a unit quaternion.
///
/// Uses v' = v + w·t + u × t with t = 2 u × v, which avoids building the
/// rotation matrix.
#[inline]
pub fn quat_rotate_point<T: Real>(q: &[T; 4], v: &[T; 3]) -> [T; 3] {
    let two = T::from_f64(2.0);
    let u = [q[1], q[2], q[3]];
    let t = [
        two * (u[1] * v[2] - u[2] * v[1]),
        two * (u[2] * v[0] - u[0] * v[2]),
        two * (u[0] * v[1] - u[1] * v[0]),
    ];
    [
        v[0] + q[0] * t[0] + u[1] * t[2] - u[2] * t[1],
        v[1] + q[0] * t[1] + u[2] * t[0] - u[0] * t[2],
        v[2] + q[0] * t[2] + u[0] * t[1] - u[1] * t[0],
    ]
}

/// Angle-axis vector (rotation log map) of a unit quaternion.
///
/// Magnitude is the rotation angle in [0, π] regardless of the sign of the
/// scalar part. Near the identity the first-order form keeps derivatives
/// finite where `sqrt` would not.
#[inline]
pub fn quat_to_angle_axis<T: Real>(q: &[T; 4]) -> [T; 3] {
    let sin_sq = q[1] * q[1] + q[2] * q[2] + q[3] * q[3];
    if sin_sq.value() > 1e-24 {
        let sin_theta = sin_sq.sqrt();
        // The scalar-part sign picks the branch that keeps the angle in
        // [-π, π]; q and -q must map to the same vector.
        let two_theta = T::from_f64(2.0)
            * if q[0].value() < 0.0 {
                (-sin_theta).atan2(-q[0])
            } else {
                sin_theta.atan2(q[0])
            };
        let k = two_theta / sin_theta;
        [q[1] * k, q[2] * k, q[3] * k]
    } else {
        let two = T::from_f64(2.0);
        [q[1] * two, q[2] * two, q[3] * two]
    }
}

/// Spherical interpolation between two unit quaternions at fixed `t`.
///
/// Takes the shorter arc; falls back to normalized linear interpolation
/// when the arc is too small for the sine ratio to be well conditioned.
pub fn quat_slerp<T: Real>(a: &[T; 4], b: &[T; 4], t: f64) -> [T; 4] {
    let mut b = *b;
    let mut cos_arc = a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3];
    if cos_arc.value() < 0.0 {
        b = [-b[0], -b[1], -b[2], -b[3]];
        cos_arc = -cos_arc;
    }

    if cos_arc.value() > 1.0 - 1e-10 {
        let blended = [
            a[0] + (b[0] - a[0]) * T::from_f64(t),
            a[1] + (b[1] - a[1]) * T::from_f64(t),
            a[2] + (b[2] - a[2]) * T::from_f64(t),
            a[3] + (b[3] - a[3]) * T::from_f64(t),
        ];
        return quat_normalize(&blended);
    }

    let arc = cos_arc.acos();
    let inv_sin = T::one() / arc.sin();
    let wa = (arc * T::from_f64(1.0 - t)).sin() * inv_sin;
    let wb = (arc * T::from_f64(t)).sin() * inv_sin;
    [
        a[0] * wa + b[0] * wb,
        a[1] * wa + b[1] * wb,
        a[2] * wa + b[2] * wb,
        a[3] * wa + b[3] * wb,
    ]
}

/// Quaternion for a rotation of `theta` about the vertical (+Z) axis.
///
/// This is how a planar heading embeds into 3D.
#[inline]
pub fn yaw_quat<T: Real>(theta: T) -> [T; 4] {
    let half = theta * T::from_f64(0.5);
    [half.cos(), T::zero(), T::zero(), half.sin()]
}

/// Relative 2D transform a⁻¹ ∘ b between two (x, y, heading) poses.
#[inline]
pub fn pose2_inverse_compose<T: Real>(a: &[T; 3], b: &[T; 3]) -> [T; 3] {
    let sin_t = a[2].sin();
    let cos_t = a[2].cos();
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    [
        dx * cos_t + dy * sin_t,
        -dx * sin_t + dy * cos_t,
        normalize_angle(b[2] - a[2]),
    ]
}

/// Relative 3D transform a⁻¹ ∘ b between two (translation, quaternion) poses.
#[inline]
pub fn pose3_inverse_compose<T: Real>(
    a_translation: &[T; 3],
    a_rotation: &[T; 4],
    b_translation: &[T; 3],
    b_rotation: &[T; 4],
) -> ([T; 3], [T; 4]) {
    let a_inv = quat_conjugate(a_rotation);
    let delta = [
        b_translation[0] - a_translation[0],
        b_translation[1] - a_translation[1],
        b_translation[2] - a_translation[2],
    ];
    (
        quat_rotate_point(&a_inv, &delta),
        quat_multiply(&a_inv, b_rotation),
    )
}
