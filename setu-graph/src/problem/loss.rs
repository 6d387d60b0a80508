//! Robust loss functions for outlier rejection in optimization.
//!
//! Applied to a residual block's norm to reduce the influence of outliers
//! (e.g. false loop closures) on the solution.
//!
//! # Available Kernels
//!
//! - **None**: Standard least squares (no robustness)
//! - **Huber**: Linear penalty beyond threshold, smooth transition
//! - **Cauchy**: Heavy-tailed, strong outlier rejection

use serde::{Deserialize, Serialize};

/// Robust loss kernel for outlier rejection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum LossFunction {
    /// No robustness - standard least squares
    #[default]
    None,

    /// Huber kernel with given threshold.
    ///
    /// - Behaves like L2 for |r| < threshold
    /// - Behaves like L1 for |r| > threshold
    /// - Smooth transition at threshold
    Huber(f64),

    /// Cauchy kernel with given scale.
    ///
    /// - Heavy-tailed distribution
    /// - Strong outlier rejection
    Cauchy(f64),
}

impl LossFunction {
    /// Compute the IRLS weight for a given residual norm.
    ///
    /// Applied multiplicatively to the residual (and its Jacobian rows)
    /// during iteratively reweighted least squares.
    ///
    /// # Returns
    /// Weight in range (0, 1] where smaller weights indicate outliers
    pub fn weight(&self, residual: f64) -> f64 {
        let abs_r = residual.abs();

        match self {
            LossFunction::None => 1.0,

            LossFunction::Huber(threshold) => {
                if abs_r <= *threshold {
                    1.0
                } else {
                    threshold / abs_r
                }
            }

            LossFunction::Cauchy(scale) => {
                let c2 = scale * scale;
                c2 / (c2 + residual * residual)
            }
        }
    }

    /// Compute the robust cost for a given residual norm.
    ///
    /// # Returns
    /// The robust cost (less than r² for outliers)
    pub fn cost(&self, residual: f64) -> f64 {
        let r2 = residual * residual;
        let abs_r = residual.abs();

        match self {
            LossFunction::None => r2,

            LossFunction::Huber(threshold) => {
                let t = *threshold;
                if abs_r <= t {
                    r2
                } else {
                    2.0 * t * abs_r - t * t
                }
            }

            LossFunction::Cauchy(scale) => {
                let c2 = scale * scale;
                c2 * (1.0 + r2 / c2).ln()
            }
        }
    }

    /// Check if this kernel provides robustness.
    pub fn is_robust(&self) -> bool {
        !matches!(self, LossFunction::None)
    }

    /// Get the kernel name for logging
    pub fn name(&self) -> &str {
        match self {
            LossFunction::None => "None",
            LossFunction::Huber(_) => "Huber",
            LossFunction::Cauchy(_) => "Cauchy",
        }
    }
}
