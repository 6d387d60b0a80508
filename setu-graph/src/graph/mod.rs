//! The constraint graph driver.
//!
//! Owns the pose store and the constraint list, and runs the two-phase
//! optimization round: a construction pass that asks every constraint to
//! register itself with a fresh [`Problem`] (the single dispatch point),
//! then a solve that writes optimized poses back into the store. The whole
//! round is synchronous and single-threaded; the driver holds exclusive
//! access to both store and problem throughout.

use crate::constraint::{Constraint, ConstraintDescriptor, ConstraintId};
use crate::error::Result;
use crate::nodes::{NodeId, Nodes, Pose2DNode, Pose3DNode};
use crate::problem::solver::{solve, SolverConfig, SolverSummary};
use crate::problem::Problem;

/// Trajectory nodes plus the constraints that tie them together.
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    nodes: Nodes,
    constraints: Vec<Constraint>,
}

impl ConstraintGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pose store.
    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    /// Mutable access to the pose store.
    ///
    /// Must not be used while a solve on this graph is in flight; between
    /// rounds the driver is the sole owner.
    pub fn nodes_mut(&mut self) -> &mut Nodes {
        &mut self.nodes
    }

    /// Add or replace a 2D node.
    pub fn add_pose_2d(&mut self, id: NodeId, node: Pose2DNode) {
        self.nodes.insert_pose_2d(id, node);
    }

    /// Add or replace a 3D node.
    pub fn add_pose_3d(&mut self, id: NodeId, node: Pose3DNode) {
        self.nodes.insert_pose_3d(id, node);
    }

    /// Add a constraint. Referenced nodes need not exist yet (or ever);
    /// the constraint simply skips rounds where they are absent.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    /// Remove a constraint by id (graph trimming), returning it if found.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Option<Constraint> {
        let index = self.constraints.iter().position(|c| c.id() == id)?;
        Some(self.constraints.remove(index))
    }

    /// All constraints.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Number of constraints.
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// The persisted form of every constraint.
    pub fn constraint_descriptors(&self) -> Vec<ConstraintDescriptor> {
        self.constraints.iter().map(|c| c.to_descriptor()).collect()
    }

    /// Construction pass: ask every constraint to register itself.
    ///
    /// Pure bookkeeping; no node value is read or written. Constraints
    /// with missing references or all-constant nodes contribute nothing.
    pub fn build_problem(&self) -> Problem {
        let mut problem = Problem::new();
        for constraint in &self.constraints {
            constraint.add_to_problem(&self.nodes, &mut problem);
        }
        log::debug!(
            "Built problem with {} parameter blocks, {} residual blocks from {} constraints",
            problem.num_parameter_blocks(),
            problem.num_residual_blocks(),
            self.constraints.len()
        );
        problem
    }

    /// One optimization round: build the problem and solve it, writing
    /// optimized poses back into the store.
    pub fn run_optimization(&mut self, config: &SolverConfig) -> Result<SolverSummary> {
        let problem = self.build_problem();
        solve(&problem, &mut self.nodes, config)
    }
}
