//! Nonlinear least-squares solve over a built problem.
//!
//! Levenberg-Marquardt (optionally pure Gauss-Newton) on the residual
//! blocks registered in a [`Problem`]. Jacobians come from each cost's
//! [`CostFunction::linearize`]; robust losses are applied by IRLS
//! reweighting of whole residual blocks.
//!
//! Constant parameter blocks never enter the state vector: their values
//! feed residuals as fixed inputs and cannot move, whatever the solver
//! does. Mutable blocks are written back into the [`Nodes`] store after
//! each accepted step, which is the only time this module touches node
//! storage.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{CostFunction, ParamBlockKey, Problem};
use crate::error::{GraphError, Result};
use crate::nodes::Nodes;

/// Configuration for the nonlinear solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of iterations.
    pub max_iterations: u32,

    /// Convergence threshold for relative cost change.
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping factor.
    pub damping_factor: f64,

    /// Whether to use Levenberg-Marquardt damping (vs pure Gauss-Newton).
    pub use_levenberg_marquardt: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-6,
            damping_factor: 1e-3,
            use_levenberg_marquardt: true,
        }
    }
}

/// Reason the solve terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged (cost change below threshold).
    Converged,

    /// Maximum iterations reached.
    MaxIterations,

    /// Cost kept increasing despite damping.
    Diverged,

    /// Normal equations were not positive definite.
    SolveFailed,

    /// Nothing to optimize (no residual blocks or no free parameters).
    NoResiduals,
}

/// Result of a solve.
#[derive(Debug, Clone)]
pub struct SolverSummary {
    /// Number of iterations performed.
    pub iterations: u32,

    /// Cost before the first step.
    pub initial_cost: f64,

    /// Cost after the last accepted step.
    pub final_cost: f64,

    /// Whether the solve converged.
    pub converged: bool,

    /// Reason for termination.
    pub termination_reason: TerminationReason,
}

struct FreeLayout {
    offsets: HashMap<ParamBlockKey, usize>,
    dim: usize,
}

fn free_layout(problem: &Problem, nodes: &Nodes) -> Result<FreeLayout> {
    let mut offsets = HashMap::new();
    let mut dim = 0;
    for (key, size, constant) in problem.constant_flags() {
        if key.resolve(nodes).is_none() {
            return Err(GraphError::MissingBlock(key));
        }
        if !constant {
            offsets.insert(key, dim);
            dim += size;
        }
    }
    Ok(FreeLayout { offsets, dim })
}

fn assemble(
    problem: &Problem,
    nodes: &Nodes,
    layout: &FreeLayout,
    num_rows: usize,
) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let mut jacobian = DMatrix::zeros(num_rows, layout.dim);
    let mut residuals = DVector::zeros(num_rows);

    let mut row = 0;
    for block in problem.residual_block_entries() {
        let params = problem.gather_params(nodes, &block.keys)?;
        let dim = block.cost.residual_dim();
        let local_cols: usize = block.cost.parameter_block_sizes().iter().sum();

        let mut local_residuals = vec![0.0; dim];
        let mut local_jacobian = DMatrix::zeros(dim, local_cols);
        block
            .cost
            .linearize(&params, &mut local_residuals, &mut local_jacobian);

        // IRLS: scale the whole block by the square root of the robust
        // weight so JᵀJ and Jᵀr see the weighted system.
        let norm = local_residuals.iter().map(|r| r * r).sum::<f64>().sqrt();
        let scale = block.loss.weight(norm).sqrt();

        for (i, r) in local_residuals.iter().enumerate() {
            residuals[row + i] = r * scale;
        }

        let mut col_cursor = 0;
        for key in &block.keys {
            let size = key.size();
            if let Some(&offset) = layout.offsets.get(key) {
                for i in 0..dim {
                    for j in 0..size {
                        jacobian[(row + i, offset + j)] =
                            local_jacobian[(i, col_cursor + j)] * scale;
                    }
                }
            }
            col_cursor += size;
        }
        row += dim;
    }

    Ok((jacobian, residuals))
}

fn snapshot_free(nodes: &Nodes, layout: &FreeLayout) -> Vec<(ParamBlockKey, Vec<f64>)> {
    layout
        .offsets
        .keys()
        .map(|key| (*key, key.resolve(nodes).unwrap().to_vec()))
        .collect()
}

fn restore_free(nodes: &mut Nodes, snapshot: &[(ParamBlockKey, Vec<f64>)]) {
    for (key, values) in snapshot {
        key.resolve_mut(nodes)
            .unwrap()
            .copy_from_slice(values);
    }
}

fn apply_step(nodes: &mut Nodes, layout: &FreeLayout, step: &DVector<f64>) {
    for (key, &offset) in &layout.offsets {
        let block = key.resolve_mut(nodes).unwrap();
        for (i, value) in block.iter_mut().enumerate() {
            *value += step[offset + i];
        }
        if let ParamBlockKey::Rotation3(_) = key {
            let norm = block.iter().map(|c| c * c).sum::<f64>().sqrt();
            for value in block.iter_mut() {
                *value /= norm;
            }
        }
    }
}

/// Minimize the problem's total cost, writing optimized values back into
/// the store.
///
/// Returns `Err` only when a registered block no longer resolves against
/// the store; numerical trouble is reported through the summary's
/// termination reason.
pub fn solve(problem: &Problem, nodes: &mut Nodes, config: &SolverConfig) -> Result<SolverSummary> {
    let layout = free_layout(problem, nodes)?;
    let num_rows = problem.num_residuals();

    if num_rows == 0 || layout.dim == 0 {
        let cost = problem.total_cost(nodes)?;
        return Ok(SolverSummary {
            iterations: 0,
            initial_cost: cost,
            final_cost: cost,
            converged: true,
            termination_reason: TerminationReason::NoResiduals,
        });
    }

    let initial_cost = problem.total_cost(nodes)?;
    let mut current_cost = initial_cost;
    let mut lambda = config.damping_factor;
    let mut iterations = 0;

    let finish = |iterations, final_cost, converged, termination_reason| SolverSummary {
        iterations,
        initial_cost,
        final_cost,
        converged,
        termination_reason,
    };

    for _ in 0..config.max_iterations {
        iterations += 1;

        let (jacobian, residuals) = assemble(problem, nodes, &layout, num_rows)?;
        let gradient = jacobian.transpose() * &residuals;
        let mut hessian = jacobian.transpose() * &jacobian;

        if config.use_levenberg_marquardt {
            for i in 0..layout.dim {
                let diagonal = hessian[(i, i)];
                hessian[(i, i)] = diagonal + lambda * diagonal.max(1.0);
            }
        }

        let step = match hessian.cholesky() {
            Some(factor) => -factor.solve(&gradient),
            None => {
                return Ok(finish(
                    iterations,
                    current_cost,
                    false,
                    TerminationReason::SolveFailed,
                ))
            }
        };

        let snapshot = snapshot_free(nodes, &layout);
        apply_step(nodes, &layout, &step);
        let new_cost = problem.total_cost(nodes)?;

        if new_cost > current_cost * 1.1 {
            restore_free(nodes, &snapshot);

            if config.use_levenberg_marquardt {
                lambda *= 10.0;
                if lambda > 1e10 {
                    return Ok(finish(
                        iterations,
                        current_cost,
                        false,
                        TerminationReason::Diverged,
                    ));
                }
                continue;
            }
            return Ok(finish(
                iterations,
                current_cost,
                false,
                TerminationReason::Diverged,
            ));
        }

        if config.use_levenberg_marquardt {
            lambda = (lambda * 0.1).max(1e-10);
        }

        let relative_change = (current_cost - new_cost).abs() / current_cost.max(1e-12);
        current_cost = new_cost;

        if relative_change < config.convergence_threshold {
            log::debug!(
                "Solve converged after {iterations} iterations, cost {initial_cost:.6e} -> {current_cost:.6e}"
            );
            return Ok(finish(
                iterations,
                current_cost,
                true,
                TerminationReason::Converged,
            ));
        }
    }

    Ok(finish(
        iterations,
        current_cost,
        false,
        TerminationReason::MaxIterations,
    ))
}
