//! Relative pose constraint from an interpolated 3D pose to a 3D node.
//!
//! The 3D counterpart of the interpolated 2D constraint: the anchor is
//! sampled between two 3D nodes at a fixed factor, translation linearly
//! and rotation by spherical interpolation along the shorter arc.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{
    add_pose_3d_blocks, block3, block4, relative_pose_error_3d, validate_weights, Transform3D,
};
use crate::core::jet::{seed, Jet};
use crate::core::math::quat_slerp;
use crate::core::real::Real;
use crate::error::{GraphError, Result};
use crate::nodes::{NodeId, Nodes};
use crate::problem::loss::LossFunction;
use crate::problem::{CostFunction, ParamBlockKey, Problem};

/// Residual layout: weighted translation difference then weighted
/// angle-axis rotation discrepancy of interpolated⁻¹ ∘ second versus the
/// measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedRelativePose3D {
    /// 3D node at the start of the interpolation interval.
    pub first_start: NodeId,
    /// 3D node at the end of the interpolation interval.
    pub first_end: NodeId,
    /// The 3D target node.
    pub second: NodeId,
    /// Measured relative transform from the interpolated anchor to
    /// `second`.
    pub measured: Transform3D,
    /// Fraction in [0, 1] along the path from `first_start` to
    /// `first_end` at which the anchor pose is sampled.
    pub interpolation_factor: f64,
    /// Scale on the translation residual components.
    pub translation_weight: f64,
    /// Scale on the rotation residual components.
    pub rotation_weight: f64,
}

const PARAMS: usize = 21;

impl InterpolatedRelativePose3D {
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

    fn residual<T: Real>(
        &self,
        start_translation: &[T; 3],
        start_rotation: &[T; 4],
        end_translation: &[T; 3],
        end_rotation: &[T; 4],
        second_translation: &[T; 3],
        second_rotation: &[T; 4],
    ) -> [T; 6] {
        let t = self.interpolation_factor;
        let a = T::from_f64(1.0 - t);
        let b = T::from_f64(t);
        let anchor_translation = [
            start_translation[0] * a + end_translation[0] * b,
            start_translation[1] * a + end_translation[1] * b,
            start_translation[2] * a + end_translation[2] * b,
        ];
        let anchor_rotation = quat_slerp(start_rotation, end_rotation, t);
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
        let Some(start_node) = nodes.pose_3d(self.first_start) else {
            log::info!(
                "First node (start) {:?} not found in 3D pose nodes",
                self.first_start
            );
            return;
        };
        let Some(end_node) = nodes.pose_3d(self.first_end) else {
            log::info!(
                "First node (end) {:?} not found in 3D pose nodes",
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

        add_pose_3d_blocks(problem, self.first_start, start_node);
        add_pose_3d_blocks(problem, self.first_end, end_node);
        add_pose_3d_blocks(problem, self.second, second_node);
        problem.add_residual_block(
            Box::new(self.clone()),
            loss.clone(),
            &[
                ParamBlockKey::Translation3(self.first_start),
                ParamBlockKey::Rotation3(self.first_start),
                ParamBlockKey::Translation3(self.first_end),
                ParamBlockKey::Rotation3(self.first_end),
                ParamBlockKey::Translation3(self.second),
                ParamBlockKey::Rotation3(self.second),
            ],
        );
    }
}

impl CostFunction for InterpolatedRelativePose3D {
    fn residual_dim(&self) -> usize {
        6
    }

    fn parameter_block_sizes(&self) -> &'static [usize] {
        &[3, 4, 3, 4, 3, 4]
    }

    fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]) {
        let r = self.residual(
            &block3(params[0]),
            &block4(params[1]),
            &block3(params[2]),
            &block4(params[3]),
            &block3(params[4]),
            &block4(params[5]),
        );
        residuals.copy_from_slice(&r);
    }

    fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>) {
        let start_t: [Jet<PARAMS>; 3] = seed(params[0], 0);
        let start_q: [Jet<PARAMS>; 4] = seed(params[1], 3);
        let end_t: [Jet<PARAMS>; 3] = seed(params[2], 7);
        let end_q: [Jet<PARAMS>; 4] = seed(params[3], 10);
        let second_t: [Jet<PARAMS>; 3] = seed(params[4], 14);
        let second_q: [Jet<PARAMS>; 4] = seed(params[5], 17);
        let r = self.residual(&start_t, &start_q, &end_t, &end_q, &second_t, &second_q);
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
    use crate::nodes::Pose3DNode;
    use approx::assert_relative_eq;

    const IDENTITY_Q: [f64; 4] = [1.0, 0.0, 0.0, 0.0];

    fn yaw(angle: f64) -> [f64; 4] {
        [(angle / 2.0).cos(), 0.0, 0.0, (angle / 2.0).sin()]
    }

    fn constraint(t: f64) -> InterpolatedRelativePose3D {
        InterpolatedRelativePose3D {
            first_start: NodeId(0),
            first_end: NodeId(1),
            second: NodeId(2),
            measured: Transform3D::identity(),
            interpolation_factor: t,
            translation_weight: 1.0,
            rotation_weight: 1.0,
        }
    }

    #[test]
    fn test_boundary_factors_reproduce_anchor_nodes() {
        // With the target coincident with an endpoint and identity
        // measurement, the residual vanishes at that endpoint's factor.
        let start_t = [0.0, 0.0, 0.0];
        let start_q = yaw(0.2);
        let end_t = [2.0, 1.0, -0.5];
        let end_q = yaw(1.1);

        let r = constraint(0.0).residual(&start_t, &start_q, &end_t, &end_q, &start_t, &start_q);
        for component in r {
            assert_relative_eq!(component, 0.0, epsilon = 1e-12);
        }

        let r = constraint(1.0).residual(&start_t, &start_q, &end_t, &end_q, &end_t, &end_q);
        for component in r {
            assert_relative_eq!(component, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_midpoint_rotation_is_half_arc() {
        let c = constraint(0.5);
        let start_t = [0.0; 3];
        let end_t = [1.0, 0.0, 0.0];
        // Target sits at the exact midpoint pose.
        let r = c.residual(
            &start_t,
            &IDENTITY_Q,
            &end_t,
            &yaw(1.0),
            &[0.5, 0.0, 0.0],
            &yaw(0.5),
        );
        for component in r {
            assert_relative_eq!(component, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_degenerate_interval_yields_that_pose() {
        let pose_t = [1.0, -2.0, 0.3];
        let pose_q = yaw(0.8);
        for t in [0.0, 0.4, 1.0] {
            let r = constraint(t).residual(&pose_t, &pose_q, &pose_t, &pose_q, &pose_t, &pose_q);
            for component in r {
                assert_relative_eq!(component, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let c = constraint(0.42);
        let mut flat = [0.0; PARAMS];
        flat[..3].copy_from_slice(&[0.1, 0.2, -0.3]);
        flat[3..7].copy_from_slice(&yaw(0.3));
        flat[7..10].copy_from_slice(&[1.5, -0.4, 0.6]);
        flat[10..14].copy_from_slice(&yaw(1.2));
        flat[14..17].copy_from_slice(&[0.7, 0.1, 0.2]);
        flat[17..].copy_from_slice(&yaw(0.7));

        let eval = |v: &[f64; PARAMS]| {
            c.residual(
                &[v[0], v[1], v[2]],
                &[v[3], v[4], v[5], v[6]],
                &[v[7], v[8], v[9]],
                &[v[10], v[11], v[12], v[13]],
                &[v[14], v[15], v[16]],
                &[v[17], v[18], v[19], v[20]],
            )
        };

        let params_owned: Vec<Vec<f64>> = vec![
            flat[..3].to_vec(),
            flat[3..7].to_vec(),
            flat[7..10].to_vec(),
            flat[10..14].to_vec(),
            flat[14..17].to_vec(),
            flat[17..].to_vec(),
        ];
        let params: Vec<&[f64]> = params_owned.iter().map(|p| p.as_slice()).collect();

        let mut residuals = vec![0.0; 6];
        let mut jacobian = DMatrix::zeros(6, PARAMS);
        c.linearize(&params, &mut residuals, &mut jacobian);

        let h = 1e-7;
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
    fn test_registration_block_layout() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_3d(NodeId(0), Pose3DNode::identity());
        nodes.insert_pose_3d(NodeId(1), Pose3DNode::new([1.0, 0.0, 0.0], yaw(0.5)));
        nodes.insert_pose_3d(NodeId(2), Pose3DNode::new([0.5, 0.0, 0.1], yaw(0.2)));

        let mut problem = Problem::new();
        constraint(0.5).add_to_problem(&LossFunction::None, &nodes, &mut problem);
        assert_eq!(problem.num_parameter_blocks(), 6);
        assert_eq!(problem.num_residual_blocks(), 1);
    }

    #[test]
    fn test_registration_skips_missing_node() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_3d(NodeId(0), Pose3DNode::identity());
        nodes.insert_pose_3d(NodeId(1), Pose3DNode::identity());
        // Second node absent.

        let mut problem = Problem::new();
        constraint(0.5).add_to_problem(&LossFunction::None, &nodes, &mut problem);
        assert_eq!(problem.num_parameter_blocks(), 0);
        assert_eq!(problem.num_residual_blocks(), 0);
    }

    #[test]
    fn test_shared_node_registers_once_across_constraints() {
        // Two interpolated constraints share the end node; idempotent
        // registration must not duplicate its blocks.
        let mut nodes = Nodes::new();
        for id in 0..4 {
            nodes.insert_pose_3d(NodeId(id), Pose3DNode::identity());
        }

        let first = constraint(0.3);
        let mut second = constraint(0.6);
        second.first_start = NodeId(1);
        second.first_end = NodeId(3);

        let mut problem = Problem::new();
        first.add_to_problem(&LossFunction::None, &nodes, &mut problem);
        second.add_to_problem(&LossFunction::None, &nodes, &mut problem);

        // 4 distinct nodes x 2 blocks each, despite 3 shared references.
        assert_eq!(problem.num_parameter_blocks(), 8);
        assert_eq!(problem.num_residual_blocks(), 2);
    }
}
