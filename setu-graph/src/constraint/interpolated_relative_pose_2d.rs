//! Relative pose constraint from an interpolated 2D pose to a 3D node.
//!
//! The anchor is not a stored node but a pose sampled between two 2D nodes
//! at a fixed interpolation factor (derived externally from timestamps,
//! never optimized): (x, y) interpolate linearly, heading along the
//! shortest arc. At factor 0 the anchor is `first_start` exactly, at 1 it
//! is `first_end` exactly. The interpolated pose is lifted into 3D and
//! compared against the `second` node, so the residual is differentiable
//! in both anchor nodes and the target's translation and rotation.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{
    add_pose_2d_blocks, add_pose_3d_blocks, block3, block4, relative_pose_error_3d,
    validate_weights, Transform3D,
};
use crate::core::jet::{seed, Jet};
use crate::core::math::{angle_lerp, yaw_quat};
use crate::core::real::Real;
use crate::error::{GraphError, Result};
use crate::nodes::{NodeId, Nodes};
use crate::problem::loss::LossFunction;
use crate::problem::{CostFunction, ParamBlockKey, Problem};

/// Residual layout: weighted translation difference then weighted
/// angle-axis rotation discrepancy of lifted(interpolated)⁻¹ ∘ second
/// versus the measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedRelativePose2D {
    /// 2D node at the start of the interpolation interval.
    pub first_start: NodeId,
    /// 2D node at the end of the interpolation interval.
    pub first_end: NodeId,
    /// The 3D target node.
    pub second: NodeId,
    /// Measured relative transform from the lifted interpolated anchor to
    /// `second`.
    pub measured: Transform3D,
    /// Fraction in [0, 1] along the path from `first_start` to
    /// `first_end` at which the anchor pose is sampled. Fixed at
    /// construction, not an optimized parameter.
    pub interpolation_factor: f64,
    /// Scale on the translation residual components.
    pub translation_weight: f64,
    /// Scale on the rotation residual components.
    pub rotation_weight: f64,
}

const PARAMS: usize = 13;

impl InterpolatedRelativePose2D {
    pub(crate) fn validate(&self) -> Result<()> {
        self.measured.validate()?;
        validate_weights(self.translation_weight, self.rotation_weight)?;
        if !self.interpolation_factor.is_finite()
            || !(0.0..=1.0).contains(&self.interpolation_factor)
        {
            return Err(GraphError::InvalidDescriptor(format!(
                "interpolation factor must be in [0, 1], got {}",
                self.interpolation_factor
            )));
        }
        Ok(())
    }

    /// The anchor pose sampled between `start` and `end` at the stored
    /// factor. Degenerate intervals (both poses equal) yield that pose
    /// for any factor; no special case needed.
    pub fn interpolated_pose(&self, start: &[f64; 3], end: &[f64; 3]) -> [f64; 3] {
        interpolate_pose_2d(start, end, self.interpolation_factor)
    }

    fn residual<T: Real>(
        &self,
        first_start: &[T; 3],
        first_end: &[T; 3],
        second_translation: &[T; 3],
        second_rotation: &[T; 4],
    ) -> [T; 6] {
        let anchor = interpolate_pose_2d(first_start, first_end, self.interpolation_factor);
        let anchor_translation = [anchor[0], anchor[1], T::zero()];
        let anchor_rotation = yaw_quat(anchor[2]);
        relative_pose_error_3d(
            &anchor_translation,
            &anchor_rotation,
            second_translation,
            second_rotation,
            &self.measured,
            self.translation_weight,
            self.rotation_weight,
        )
    }

    pub(crate) fn add_to_problem(
        &self,
        loss: &LossFunction,
        nodes: &Nodes,
        problem: &mut Problem,
    ) {
        let Some(start_node) = nodes.pose_2d(self.first_start) else {
            log::info!(
                "First node (start) {:?} not found in 2D pose nodes",
                self.first_start
            );
            return;
        };
        let Some(end_node) = nodes.pose_2d(self.first_end) else {
            log::info!(
                "First node (end) {:?} not found in 2D pose nodes",
                self.first_end
            );
            return;
        };
        let Some(second_node) = nodes.pose_3d(self.second) else {
            log::info!("Second node {:?} not found in 3D pose nodes", self.second);
            return;
        };
        if start_node.constant && end_node.constant && second_node.constant {
            log::info!("All nodes are constant, skipping the constraint");
            return;
        }

        add_pose_2d_blocks(problem, self.first_start, start_node);
        add_pose_2d_blocks(problem, self.first_end, end_node);
        add_pose_3d_blocks(problem, self.second, second_node);
        problem.add_residual_block(
            Box::new(self.clone()),
            loss.clone(),
            &[
                ParamBlockKey::Pose2D(self.first_start),
                ParamBlockKey::Pose2D(self.first_end),
                ParamBlockKey::Translation3(self.second),
                ParamBlockKey::Rotation3(self.second),
            ],
        );
    }
}

/// Interpolate a 2D pose: two-sided linear blend for (x, y) so both
/// endpoints reproduce exactly, shortest-arc blend for heading.
pub(crate) fn interpolate_pose_2d<T: Real>(start: &[T; 3], end: &[T; 3], t: f64) -> [T; 3] {
    let a = T::from_f64(1.0 - t);
    let b = T::from_f64(t);
    [
        start[0] * a + end[0] * b,
        start[1] * a + end[1] * b,
        angle_lerp(start[2], end[2], t),
    ]
}

impl CostFunction for InterpolatedRelativePose2D {
    fn residual_dim(&self) -> usize {
        6
    }

    fn parameter_block_sizes(&self) -> &'static [usize] {
        &[3, 3, 3, 4]
    }

    fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]) {
        let r = self.residual(
            &block3(params[0]),
            &block3(params[1]),
            &block3(params[2]),
            &block4(params[3]),
        );
        residuals.copy_from_slice(&r);
    }

    fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>) {
        let start: [Jet<PARAMS>; 3] = seed(params[0], 0);
        let end: [Jet<PARAMS>; 3] = seed(params[1], 3);
        let second_t: [Jet<PARAMS>; 3] = seed(params[2], 6);
        let second_q: [Jet<PARAMS>; 4] = seed(params[3], 9);
        let r = self.residual(&start, &end, &second_t, &second_q);
        for (i, ri) in r.iter().enumerate() {
            residuals[i] = ri.value;
            for j in 0..PARAMS {
                jacobian[(i, j)] = ri.derivs[j];
            }
        }
    }
}
