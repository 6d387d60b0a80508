//! # SetuGraph
//!
//! Pose graph constraint backend for SLAM optimization.
//!
//! SetuGraph translates a set of trajectory nodes (2D and 3D poses, each
//! possibly fixed) and a set of relative-pose constraints into the
//! parameter-block / residual-block structure of a nonlinear least-squares
//! problem, and solves it with Levenberg-Marquardt. Jacobians come from
//! forward-mode automatic differentiation, so every constraint is written
//! once as a plain residual function and evaluated with either `f64` or
//! dual numbers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    graph/                           │  ← Driver
//! │      (ConstraintGraph: build + optimize round)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  constraint/                        │  ← Constraint variants
//! │   (relative pose 2D/3D, 2D-to-3D, interpolated)     │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌──────────────────────────┬──────────────────────────┐
//! │         nodes/           │        problem/          │  ← Pose store + adapter
//! │  (parameter block store) │  (blocks, loss, solver)  │
//! └──────────────────────────┴──────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │          (scalar abstraction, jets, math)           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use setu_graph::{
//!     Constraint, ConstraintGraph, ConstraintId, CostFunctionKind, LossFunction, NodeId,
//!     Pose2DNode, RelativePose2D, SolverConfig, Transform2D,
//! };
//!
//! let mut graph = ConstraintGraph::new();
//! graph.add_pose_2d(NodeId(0), Pose2DNode::fixed(0.0, 0.0, 0.0));
//! graph.add_pose_2d(NodeId(1), Pose2DNode::new(0.9, 0.1, 0.0));
//!
//! let odometry = Constraint::new(
//!     ConstraintId(0),
//!     LossFunction::Huber(1.0),
//!     CostFunctionKind::RelativePose2D(RelativePose2D {
//!         from: NodeId(0),
//!         to: NodeId(1),
//!         measured: Transform2D::new(1.0, 0.0, 0.0),
//!         translation_weight: 10.0,
//!         rotation_weight: 40.0,
//!     }),
//! )?;
//! graph.add_constraint(odometry);
//!
//! let summary = graph.run_optimization(&SolverConfig::default())?;
//! println!("cost {} -> {}", summary.initial_cost, summary.final_cost);
//! ```
//!
//! # Ownership model
//!
//! Node storage is owned by the [`Nodes`] store. Building a problem only
//! records typed block keys and constant flags; no pose value is read or
//! written until the solver runs, and the solver borrows the store mutably
//! for exactly the duration of one solve. Constraints tolerate references
//! to nodes that are missing from the store (the constraint just skips the
//! round), so constraints and nodes can be added and trimmed independently.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Node storage and problem structure (depends on core)
// ============================================================================
pub mod nodes;
pub mod problem;

// ============================================================================
// Layer 3: Constraints (depends on core, nodes, problem)
// ============================================================================
pub mod constraint;

// ============================================================================
// Layer 4: Graph driver (depends on all layers)
// ============================================================================
pub mod graph;

mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

pub use error::{GraphError, Result};

// Core
pub use crate::core::jet::Jet;
pub use crate::core::real::Real;

// Nodes
pub use nodes::{NodeId, Nodes, Pose2DNode, Pose3DNode};

// Problem
pub use problem::loss::LossFunction;
pub use problem::solver::{SolverConfig, SolverSummary, TerminationReason};
pub use problem::{CostFunction, ParamBlockKey, Problem};

// Constraints
pub use constraint::{
    Constraint, ConstraintDescriptor, ConstraintId, CostFunctionKind, InterpolatedRelativePose2D,
    InterpolatedRelativePose3D, RelativePose2D, RelativePose2Dto3D, RelativePose3D, Transform2D,
    Transform3D,
};

// Graph driver
pub use graph::ConstraintGraph;
