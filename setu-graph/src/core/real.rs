//! Scalar abstraction shared by plain and derivative-carrying evaluation.
//!
//! Residual functions are written once, generic over [`Real`], and evaluated
//! with `f64` when only the value is needed or with [`crate::core::jet::Jet`]
//! when the Jacobian is needed as well. The trait deliberately exposes only
//! the operations residuals use.

use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::{One, Zero};

/// A real-valued scalar that supports the arithmetic residual functions need.
///
/// Implemented by `f64` (plain evaluation) and by [`crate::core::jet::Jet`]
/// (forward-mode automatic differentiation). Control flow in residual code
/// must branch only on [`Real::value`], never on the concrete scalar type,
/// so both implementations walk the same code path.
pub trait Real:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Zero
    + One
{
    /// Lift a plain constant into this scalar type (zero derivatives).
    fn from_f64(value: f64) -> Self;

    /// The scalar value, discarding any derivative information.
    ///
    /// Branch conditions in generic code go through this accessor so that
    /// the branch taken is identical for plain and dual evaluation.
    fn value(self) -> f64;

    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn sqrt(self) -> Self;
    fn acos(self) -> Self;
    fn atan2(self, other: Self) -> Self;
}

impl Real for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn value(self) -> f64 {
        self
    }

    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn acos(self) -> Self {
        f64::acos(self)
    }

    #[inline]
    fn atan2(self, other: Self) -> Self {
        f64::atan2(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Generic helper exercised through the trait, the way residuals use it.
    fn hypot<T: Real>(a: T, b: T) -> T {
        (a * a + b * b).sqrt()
    }

    #[test]
    fn test_f64_through_trait() {
        assert_eq!(hypot(3.0_f64, 4.0_f64), 5.0);
        assert_eq!(Real::value(2.5_f64), 2.5);
        assert_eq!(<f64 as Real>::from_f64(1.25), 1.25);
    }

    #[test]
    fn test_atan2_quadrants() {
        assert!((Real::atan2(1.0_f64, 1.0).to_degrees() - 45.0).abs() < 1e-9);
        assert!((Real::atan2(1.0_f64, -1.0).to_degrees() - 135.0).abs() < 1e-9);
    }
}
