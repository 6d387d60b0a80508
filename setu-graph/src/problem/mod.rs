//! The optimization problem a constraint pass builds.
//!
//! A [`Problem`] is the registry the graph driver fills while iterating
//! constraints: which parameter blocks participate, which of them are
//! constant, and which residual blocks tie them together. It never owns
//! pose values: blocks are typed keys resolved against the [`Nodes`]
//! store when the problem is evaluated or solved, so the store keeps
//! exclusive ownership of node storage between solves.

pub mod loss;
pub mod solver;

use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::error::{GraphError, Result};
use crate::nodes::Nodes;
use crate::nodes::NodeId;
use loss::LossFunction;

/// Typed key of one parameter block inside the pose store.
///
/// A 2D node contributes one block; a 3D node contributes two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamBlockKey {
    /// The (x, y, heading) block of a 2D node.
    Pose2D(NodeId),
    /// The translation block of a 3D node.
    Translation3(NodeId),
    /// The rotation (quaternion) block of a 3D node.
    Rotation3(NodeId),
}

impl ParamBlockKey {
    /// Number of scalars in this block.
    pub fn size(&self) -> usize {
        match self {
            ParamBlockKey::Pose2D(_) => 3,
            ParamBlockKey::Translation3(_) => 3,
            ParamBlockKey::Rotation3(_) => 4,
        }
    }

    /// Resolve this key to the current values in the store.
    pub fn resolve<'a>(&self, nodes: &'a Nodes) -> Option<&'a [f64]> {
        match self {
            ParamBlockKey::Pose2D(id) => nodes.pose_2d(*id).map(|n| n.pose.as_slice()),
            ParamBlockKey::Translation3(id) => nodes.pose_3d(*id).map(|n| n.translation.as_slice()),
            ParamBlockKey::Rotation3(id) => nodes.pose_3d(*id).map(|n| n.rotation.as_slice()),
        }
    }

    /// Resolve this key to mutable storage. Solver use only.
    pub fn resolve_mut<'a>(&self, nodes: &'a mut Nodes) -> Option<&'a mut [f64]> {
        match self {
            ParamBlockKey::Pose2D(id) => nodes.pose_2d_mut(*id).map(|n| n.pose.as_mut_slice()),
            ParamBlockKey::Translation3(id) => {
                nodes.pose_3d_mut(*id).map(|n| n.translation.as_mut_slice())
            }
            ParamBlockKey::Rotation3(id) => {
                nodes.pose_3d_mut(*id).map(|n| n.rotation.as_mut_slice())
            }
        }
    }
}

/// A residual term evaluated from one or more parameter blocks.
///
/// Implementations provide a single residual expression; `evaluate` runs it
/// with plain values, `linearize` with dual numbers, so both are guaranteed
/// to agree.
pub trait CostFunction: Send + Sync {
    /// Number of residual components.
    fn residual_dim(&self) -> usize;

    /// Sizes of the parameter blocks, in registration order.
    fn parameter_block_sizes(&self) -> &'static [usize];

    /// Compute residuals at the given parameter values.
    ///
    /// `params` holds one slice per block, in the order of
    /// [`CostFunction::parameter_block_sizes`]; `residuals` has
    /// [`CostFunction::residual_dim`] entries.
    fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]);

    /// Compute residuals and the dense Jacobian with respect to all block
    /// parameters (columns ordered block by block).
    fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>);
}

struct ParameterBlock {
    key: ParamBlockKey,
    size: usize,
    constant: bool,
}

/// One registered (cost, loss, parameter blocks) tuple.
pub struct ResidualBlock {
    pub(crate) cost: Box<dyn CostFunction>,
    pub(crate) loss: LossFunction,
    pub(crate) keys: Vec<ParamBlockKey>,
}

/// The assembled nonlinear least-squares problem.
#[derive(Default)]
pub struct Problem {
    block_index: HashMap<ParamBlockKey, usize>,
    blocks: Vec<ParameterBlock>,
    residual_blocks: Vec<ResidualBlock>,
}

impl Problem {
    /// Create an empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter block.
    ///
    /// Idempotent: re-registering a known block is a no-op, so constraints
    /// sharing a node may each register it independently.
    pub fn add_parameter_block(&mut self, key: ParamBlockKey, size: usize) {
        debug_assert_eq!(size, key.size());
        if self.block_index.contains_key(&key) {
            return;
        }
        self.block_index.insert(key, self.blocks.len());
        self.blocks.push(ParameterBlock {
            key,
            size,
            constant: false,
        });
    }

    /// Mark a registered block constant: its values are input, never output.
    ///
    /// Idempotent and sticky for the lifetime of the problem.
    pub fn set_parameter_block_constant(&mut self, key: ParamBlockKey) {
        match self.block_index.get(&key) {
            Some(&idx) => self.blocks[idx].constant = true,
            None => log::warn!("Marking unregistered block {key:?} constant has no effect"),
        }
    }

    /// Register a residual block binding a cost, a loss, and parameter
    /// blocks in the cost's documented order.
    pub fn add_residual_block(
        &mut self,
        cost: Box<dyn CostFunction>,
        loss: LossFunction,
        keys: &[ParamBlockKey],
    ) {
        debug_assert_eq!(keys.len(), cost.parameter_block_sizes().len());
        self.residual_blocks.push(ResidualBlock {
            cost,
            loss,
            keys: keys.to_vec(),
        });
    }

    /// Number of registered parameter blocks.
    pub fn num_parameter_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of registered residual blocks.
    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks.len()
    }

    /// Total residual dimension across all blocks.
    pub fn num_residuals(&self) -> usize {
        self.residual_blocks
            .iter()
            .map(|b| b.cost.residual_dim())
            .sum()
    }

    /// Whether a registered block is marked constant.
    pub fn is_constant(&self, key: ParamBlockKey) -> bool {
        self.block_index
            .get(&key)
            .map(|&idx| self.blocks[idx].constant)
            .unwrap_or(false)
    }

    /// Registered block keys in registration order.
    pub fn parameter_block_keys(&self) -> impl Iterator<Item = ParamBlockKey> + '_ {
        self.blocks.iter().map(|b| b.key)
    }

    pub(crate) fn residual_block_entries(&self) -> &[ResidualBlock] {
        &self.residual_blocks
    }

    pub(crate) fn constant_flags(&self) -> impl Iterator<Item = (ParamBlockKey, usize, bool)> + '_ {
        self.blocks.iter().map(|b| (b.key, b.size, b.constant))
    }

    /// Gather the current value slices for a residual block's keys.
    pub(crate) fn gather_params<'a>(
        &self,
        nodes: &'a Nodes,
        keys: &[ParamBlockKey],
    ) -> Result<Vec<&'a [f64]>> {
        keys.iter()
            .map(|key| key.resolve(nodes).ok_or(GraphError::MissingBlock(*key)))
            .collect()
    }

    /// Evaluate one residual block at the store's current values.
    pub fn evaluate_residual_block(&self, nodes: &Nodes, index: usize) -> Result<Vec<f64>> {
        let block = &self.residual_blocks[index];
        let params = self.gather_params(nodes, &block.keys)?;
        let mut residuals = vec![0.0; block.cost.residual_dim()];
        block.cost.evaluate(&params, &mut residuals);
        Ok(residuals)
    }

    /// Robust total cost at the store's current values.
    pub fn total_cost(&self, nodes: &Nodes) -> Result<f64> {
        let mut cost = 0.0;
        for index in 0..self.residual_blocks.len() {
            let residuals = self.evaluate_residual_block(nodes, index)?;
            let norm = residuals.iter().map(|r| r * r).sum::<f64>().sqrt();
            cost += self.residual_blocks[index].loss.cost(norm);
        }
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal cost pinning a 2D pose to the origin.
    struct OriginCost;

    impl CostFunction for OriginCost {
        fn residual_dim(&self) -> usize {
            3
        }

        fn parameter_block_sizes(&self) -> &'static [usize] {
            &[3]
        }

        fn evaluate(&self, params: &[&[f64]], residuals: &mut [f64]) {
            residuals.copy_from_slice(params[0]);
        }

        fn linearize(&self, params: &[&[f64]], residuals: &mut [f64], jacobian: &mut DMatrix<f64>) {
            self.evaluate(params, residuals);
            jacobian.fill(0.0);
            for i in 0..3 {
                jacobian[(i, i)] = 1.0;
            }
        }
    }

    use crate::nodes::{NodeId, Pose2DNode};

    #[test]
    fn test_parameter_block_registration_is_idempotent() {
        let mut problem = Problem::new();
        let key = ParamBlockKey::Pose2D(NodeId(1));
        problem.add_parameter_block(key, 3);
        problem.add_parameter_block(key, 3);
        problem.add_parameter_block(key, 3);
        assert_eq!(problem.num_parameter_blocks(), 1);
    }

    #[test]
    fn test_constant_marking_is_sticky() {
        let mut problem = Problem::new();
        let key = ParamBlockKey::Translation3(NodeId(2));
        problem.add_parameter_block(key, 3);
        assert!(!problem.is_constant(key));
        problem.set_parameter_block_constant(key);
        problem.set_parameter_block_constant(key);
        assert!(problem.is_constant(key));
    }

    #[test]
    fn test_constant_marking_unregistered_block_is_noop() {
        let mut problem = Problem::new();
        problem.set_parameter_block_constant(ParamBlockKey::Pose2D(NodeId(9)));
        assert_eq!(problem.num_parameter_blocks(), 0);
    }

    #[test]
    fn test_residual_evaluation_reads_store() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(1), Pose2DNode::new(1.0, -2.0, 0.5));

        let mut problem = Problem::new();
        let key = ParamBlockKey::Pose2D(NodeId(1));
        problem.add_parameter_block(key, 3);
        problem.add_residual_block(Box::new(OriginCost), LossFunction::None, &[key]);

        let residuals = problem.evaluate_residual_block(&nodes, 0).unwrap();
        assert_eq!(residuals, vec![1.0, -2.0, 0.5]);

        let cost = problem.total_cost(&nodes).unwrap();
        assert!((cost - (1.0 + 4.0 + 0.25)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_block_is_an_error() {
        let nodes = Nodes::new();
        let mut problem = Problem::new();
        let key = ParamBlockKey::Pose2D(NodeId(1));
        problem.add_parameter_block(key, 3);
        problem.add_residual_block(Box::new(OriginCost), LossFunction::None, &[key]);

        assert!(matches!(
            problem.evaluate_residual_block(&nodes, 0),
            Err(GraphError::MissingBlock(_))
        ));
    }

    #[test]
    fn test_block_key_sizes() {
        assert_eq!(ParamBlockKey::Pose2D(NodeId(0)).size(), 3);
        assert_eq!(ParamBlockKey::Translation3(NodeId(0)).size(), 3);
        assert_eq!(ParamBlockKey::Rotation3(NodeId(0)).size(), 4);
    }
}
