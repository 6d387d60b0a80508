//! Relative pose constraint between two 3D nodes.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{
    add_pose_3d_blocks, block3, block4, relative_pose_error_3d, validate_weights, Transform3D,
};
use crate::core::jet::{seed, Jet};
use crate::core::real::Real;
use crate::error::Result;
use crate::nodes::{NodeId, Nodes};
use crate::problem::loss::LossFunction;
use crate::problem::{CostFunction, ParamBlockKey, Problem};

/// Asks the relative transform from⁻¹ ∘ to between two 3D nodes to match
/// a measured transform. Residual layout: weighted translation difference
/// then weighted angle-axis rotation discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativePose3D {
    /// Source 3D node.
    pub from: NodeId,
    /// Target 3D node.
    pub to: NodeId,
    /// Measured relative transform from `from` to `to`.
    pub measured: Transform3D,
    /// Scale on the translation residual components.
    pub translation_weight: f64,
    /// Scale on the rotation residual components.
    pub rotation_weight: f64,
}

const PARAMS: usize = 14;

impl RelativePose3D {
    pub(crate) fn validate(&self) -> Result<()> {
        self.measured.validate()?;
        validate_weights(self.translation_weight, self.rotation_weight)
    }

    fn residual<T: Real>(
        &self,
        from_translation: &[T; 3],
        from_rotation: &[T; 4],
        to_translation: &[T; 3],
        to_rotation: &[T; 4],
    ) -> [T; 6] {
        relative_pose_error_3d(
            from_translation,
            from_rotation,
            to_translation,
            to_rotation,
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
        let Some(from_node) = nodes.pose_3d(self.from) else {
            log::info!("From node {:?} not found in 3D pose nodes", self.from);
            return;
        };
        let Some(to_node) = nodes.pose_3d(self.to) else {
            log::info!("To node {:?} not found in 3D pose nodes", self.to);
            return;
        };
        if from_node.constant && to_node.constant {
            log::info!("All nodes are constant, skipping the constraint");
            return;
        }

        add_pose_3d_blocks(problem, self.from, from_node);
        add_pose_3d_blocks(problem, self.to, to_node);
        problem.add_residual_block(
            Box::new(self.clone()),
            loss.clone(),
            &[
                ParamBlockKey::Translation3(self.from),
                ParamBlockKey::Rotation3(self.from),
                ParamBlockKey::Translation3(self.to),
                ParamBlockKey::Rotation3(self.to),
            ],
        );
    }
}

impl CostFunction for RelativePose3D {
    fn residual_dim(&self) -> usize {
        6
    }

    fn parameter_block_sizes(&self) -> &'static [usize] {
        &[3, 4, 3, 4]
    }

    fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]) {
        let r = self.residual(
            &block3(params[0]),
            &block4(params[1]),
            &block3(params[2]),
            &block4(params[3]),
        );
        residuals.copy_from_slice(&r);
    }

    fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>) {
        let from_t: [Jet<PARAMS>; 3] = seed(params[0], 0);
        let from_q: [Jet<PARAMS>; 4] = seed(params[1], 3);
        let to_t: [Jet<PARAMS>; 3] = seed(params[2], 7);
        let to_q: [Jet<PARAMS>; 4] = seed(params[3], 10);
        let r = self.residual(&from_t, &from_q, &to_t, &to_q);
        for (i, ri) in r.iter().enumerate() {
            residuals[i] = ri.value;
            for j in 0..PARAMS {
                jacobian[(i, j)] = ri.derivs[j];
            }
        }
    }
}
