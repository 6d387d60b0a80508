//! Relative pose constraint from a 2D node to a 3D node.
//!
//! The planar pose is lifted into 3D (heading becomes a rotation about the
//! vertical axis, translation becomes (x, y, 0)) and the constraint then
//! behaves like a 3D relative-pose factor against the target node. This is
//! how a planar trajectory anchors sensors that live in full 3D.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{
    add_pose_2d_blocks, add_pose_3d_blocks, block3, block4, relative_pose_error_3d,
    validate_weights, Transform3D,
};
use crate::core::jet::{seed, Jet};
use crate::core::math::yaw_quat;
use crate::core::real::Real;
use crate::error::Result;
use crate::nodes::{NodeId, Nodes};
use crate::problem::loss::LossFunction;
use crate::problem::{CostFunction, ParamBlockKey, Problem};

/// Residual layout: weighted translation difference then weighted
/// angle-axis rotation discrepancy of lifted(first)⁻¹ ∘ second versus the
/// measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativePose2Dto3D {
    /// The 2D anchor node.
    pub first: NodeId,
    /// The 3D target node.
    pub second: NodeId,
    /// Measured relative transform from the lifted anchor to `second`.
    pub measured: Transform3D,
    /// Scale on the translation residual components.
    pub translation_weight: f64,
    /// Scale on the rotation residual components.
    pub rotation_weight: f64,
}

const PARAMS: usize = 10;

impl RelativePose2Dto3D {
    pub(crate) fn validate(&self) -> Result<()> {
        self.measured.validate()?;
        validate_weights(self.translation_weight, self.rotation_weight)
    }

    fn residual<T: Real>(
        &self,
        first: &[T; 3],
        second_translation: &[T; 3],
        second_rotation: &[T; 4],
    ) -> [T; 6] {
        let anchor_translation = [first[0], first[1], T::zero()];
        let anchor_rotation = yaw_quat(first[2]);
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
        let Some(first_node) = nodes.pose_2d(self.first) else {
            log::info!("First node {:?} not found in 2D pose nodes", self.first);
            return;
        };
        let Some(second_node) = nodes.pose_3d(self.second) else {
            log::info!("Second node {:?} not found in 3D pose nodes", self.second);
            return;
        };
        if first_node.constant && second_node.constant {
            log::info!("All nodes are constant, skipping the constraint");
            return;
        }

        add_pose_2d_blocks(problem, self.first, first_node);
        add_pose_3d_blocks(problem, self.second, second_node);
        problem.add_residual_block(
            Box::new(self.clone()),
            loss.clone(),
            &[
                ParamBlockKey::Pose2D(self.first),
                ParamBlockKey::Translation3(self.second),
                ParamBlockKey::Rotation3(self.second),
            ],
        );
    }
}

impl CostFunction for RelativePose2Dto3D {
    fn residual_dim(&self) -> usize {
        6
    }

    fn parameter_block_sizes(&self) -> &'static [usize] {
        &[3, 3, 4]
    }

    fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]) {
        let r = self.residual(&block3(params[0]), &block3(params[1]), &block4(params[2]));
        residuals.copy_from_slice(&r);
    }

    fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>) {
        let first: [Jet<PARAMS>; 3] = seed(params[0], 0);
        let second_t: [Jet<PARAMS>; 3] = seed(params[1], 3);
        let second_q: [Jet<PARAMS>; 4] = seed(params[2], 6);
        let r = self.residual(&first, &second_t, &second_q);
        for (i, ri) in r.iter().enumerate() {
            residuals[i] = ri.value;
            for j in 0..PARAMS {
                jacobian[(i, j)] = ri.derivs[j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Pose2DNode, Pose3DNode};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const IDENTITY_Q: [f64; 4] = [1.0, 0.0, 0.0, 0.0];

    fn constraint() -> RelativePose2Dto3D {
        RelativePose2Dto3D {
            first: NodeId(0),
            second: NodeId(10),
            measured: Transform3D::identity(),
            translation_weight: 1.0,
            rotation_weight: 1.0,
        }
    }

    #[test]
    fn test_residual_zero_when_coincident() {
        let c = constraint();
        let first = [0.7, -0.4, FRAC_PI_2];
        let second_t = [0.7, -0.4, 0.0];
        let second_q = [(FRAC_PI_2 / 2.0).cos(), 0.0, 0.0, (FRAC_PI_2 / 2.0).sin()];
        let r = c.residual(&first, &second_t, &second_q);
        for component in r {
            assert_relative_eq!(component, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_lift_measures_height_offset() {
        let c = constraint();
        // Anchor at origin; target floats 0.3 m above the plane.
        let r = c.residual(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.3], &IDENTITY_Q);
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[2], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_rotates_anchor_frame() {
        let c = constraint();
        // Anchor yawed 90°: a world +X offset reads as -Y in its frame.
        let r = c.residual(&[0.0, 0.0, FRAC_PI_2], &[1.0, 0.0, 0.0], &IDENTITY_Q);
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[1], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let c = constraint();
        let first = [0.4, 0.2, 0.6];
        let second_t = [0.9, -0.1, 0.3];
        let second_q = [(0.45f64).cos(), 0.1, 0.0, (0.45f64).sin()];
        let params: Vec<&[f64]> = vec![&first, &second_t, &second_q];

        let mut residuals = vec![0.0; 6];
        let mut jacobian = DMatrix::zeros(6, PARAMS);
        c.linearize(&params, &mut residuals, &mut jacobian);

        let h = 1e-7;
        let mut flat = [0.0; PARAMS];
        flat[..3].copy_from_slice(&first);
        flat[3..6].copy_from_slice(&second_t);
        flat[6..].copy_from_slice(&second_q);
        let eval = |v: &[f64; PARAMS]| {
            c.residual(
                &[v[0], v[1], v[2]],
                &[v[3], v[4], v[5]],
                &[v[6], v[7], v[8], v[9]],
            )
        };

        for col in 0..PARAMS {
            let mut plus = flat;
            let mut minus = flat;
            plus[col] += h;
            minus[col] -= h;
            let rp = eval(&plus);
            let rm = eval(&minus);
            for row in 0..6 {
                let fd = (rp[row] - rm[row]) / (2.0 * h);
                assert_relative_eq!(jacobian[(row, col)], fd, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_registration_mixes_key_spaces() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(0), Pose2DNode::new(0.0, 0.0, 0.0));
        nodes.insert_pose_3d(NodeId(10), Pose3DNode::identity());

        let mut problem = Problem::new();
        constraint().add_to_problem(&LossFunction::None, &nodes, &mut problem);

        // One block for the 2D node, two for the 3D node.
        assert_eq!(problem.num_parameter_blocks(), 3);
        assert_eq!(problem.num_residual_blocks(), 1);
    }

    #[test]
    fn test_registration_requires_matching_key_space() {
        // The target id exists, but only as a 2D node: the 3D lookup
        // misses and the constraint skips.
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(0), Pose2DNode::new(0.0, 0.0, 0.0));
        nodes.insert_pose_2d(NodeId(10), Pose2DNode::new(1.0, 0.0, 0.0));

        let mut problem = Problem::new();
        constraint().add_to_problem(&LossFunction::None, &nodes, &mut problem);
        assert_eq!(problem.num_parameter_blocks(), 0);
        assert_eq!(problem.num_residual_blocks(), 0);
    }
}
