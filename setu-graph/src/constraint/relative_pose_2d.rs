//! Relative pose constraint between two 2D nodes.
//!
//! The workhorse constraint of a planar trajectory: odometry edges and
//! loop closures both ask the relative transform from⁻¹ ∘ to to match a
//! measured transform.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{add_pose_2d_blocks, block3, validate_weights, Transform2D};
use crate::core::jet::{seed, Jet};
use crate::core::math::{normalize_angle, pose2_inverse_compose};
use crate::core::real::Real;
use crate::error::Result;
use crate::nodes::{NodeId, Nodes};
use crate::problem::loss::LossFunction;
use crate::problem::{CostFunction, ParamBlockKey, Problem};

/// Residual layout: weighted (x, y) translation error then weighted
/// wrapped heading error of the relative transform from⁻¹ ∘ to versus the
/// measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativePose2D {
    /// Source 2D node.
    pub from: NodeId,
    /// Target 2D node.
    pub to: NodeId,
    /// Measured relative transform from `from` to `to`.
    pub measured: Transform2D,
    /// Scale on the translation residual components.
    pub translation_weight: f64,
    /// Scale on the heading residual component.
    pub rotation_weight: f64,
}

const PARAMS: usize = 6;

impl RelativePose2D {
    pub(crate) fn validate(&self) -> Result<()> {
        self.measured.validate()?;
        validate_weights(self.translation_weight, self.rotation_weight)
    }

    fn residual<T: Real>(&self, from: &[T; 3], to: &[T; 3]) -> [T; 3] {
        let rel = pose2_inverse_compose(from, to);
        let tw = T::from_f64(self.translation_weight);
        let rw = T::from_f64(self.rotation_weight);
        [
            (rel[0] - T::from_f64(self.measured.x)) * tw,
            (rel[1] - T::from_f64(self.measured.y)) * tw,
            normalize_angle(rel[2] - T::from_f64(self.measured.theta)) * rw,
        ]
    }

    pub(crate) fn add_to_problem(
        &self,
        loss: &LossFunction,
        nodes: &Nodes,
        problem: &mut Problem,
    ) {
        let Some(from_node) = nodes.pose_2d(self.from) else {
            log::info!("From node {:?} not found in 2D pose nodes", self.from);
            return;
        };
        let Some(to_node) = nodes.pose_2d(self.to) else {
            log::info!("To node {:?} not found in 2D pose nodes", self.to);
            return;
        };
        if from_node.constant && to_node.constant {
            log::info!("All nodes are constant, skipping the constraint");
            return;
        }

        add_pose_2d_blocks(problem, self.from, from_node);
        add_pose_2d_blocks(problem, self.to, to_node);
        problem.add_residual_block(
            Box::new(self.clone()),
            loss.clone(),
            &[
                ParamBlockKey::Pose2D(self.from),
                ParamBlockKey::Pose2D(self.to),
            ],
        );
    }
}

impl CostFunction for RelativePose2D {
    fn residual_dim(&self) -> usize {
        3
    }

    fn parameter_block_sizes(&self) -> &'static [usize] {
        &[3, 3]
    }

    fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]) {
        let r = self.residual(&block3(params[0]), &block3(params[1]));
        residuals.copy_from_slice(&r);
    }

    fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>) {
        let from: [Jet<PARAMS>; 3] = seed(params[0], 0);
        let to: [Jet<PARAMS>; 3] = seed(params[1], 3);
        let r = self.residual(&from, &to);
        for (i, ri) in r.iter().enumerate() {
            residuals[i] = ri.value;
            for j in 0..PARAMS {
                jacobian[(i, j)] = ri.derivs[j];
            }
        }
    }
}
