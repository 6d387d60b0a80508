//! Pose constraints: the factors that tie trajectory nodes together.
//!
//! A [`Constraint`] binds an identifier, a robust loss, node references and
//! a cost function into one unit with two operations: register itself with
//! an optimization problem ([`Constraint::add_to_problem`]) and serialize
//! itself back into a descriptor ([`Constraint::to_descriptor`]). The
//! variants form a closed enum; the graph driver dispatches through a
//! single match, no inheritance anywhere.
//!
//! Registration is skip-and-continue: a constraint whose nodes are missing
//! from the store, or whose nodes are all fixed, contributes nothing this
//! round and logs why. Neither condition is an error; both are ordinary
//! states of an evolving graph.

mod interpolated_relative_pose_2d;
mod interpolated_relative_pose_3d;
mod relative_pose_2d;
mod relative_pose_2d_to_3d;
mod relative_pose_3d;

pub use interpolated_relative_pose_2d::InterpolatedRelativePose2D;
pub use interpolated_relative_pose_3d::InterpolatedRelativePose3D;
pub use relative_pose_2d::RelativePose2D;
pub use relative_pose_2d_to_3d::RelativePose2Dto3D;
pub use relative_pose_3d::RelativePose3D;

use serde::{Deserialize, Serialize};

use crate::core::math::{
    pose3_inverse_compose, quat_conjugate, quat_multiply, quat_to_angle_axis,
};
use crate::core::real::Real;
use crate::error::{GraphError, Result};
use crate::nodes::{NodeId, Nodes, Pose2DNode, Pose3DNode};
use crate::problem::loss::LossFunction;
use crate::problem::{ParamBlockKey, Problem};

/// Identifier of a constraint, carried for bookkeeping and serialization.
/// Never used in optimization math.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConstraintId(pub u64);

impl ConstraintId {
    /// Raw id value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A measured relative 2D transform (x, y, heading).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Transform2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    fn validate(&self) -> Result<()> {
        if [self.x, self.y, self.theta].iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(GraphError::InvalidDescriptor(
                "2D transform has non-finite components".to_string(),
            ))
        }
    }
}

/// A measured relative 3D transform: translation plus unit quaternion
/// stored [w, x, y, z].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
}

impl Transform3D {
    pub fn new(translation: [f64; 3], rotation: [f64; 4]) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0])
    }

    fn validate(&self) -> Result<()> {
        let finite = self
            .translation
            .iter()
            .chain(self.rotation.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(GraphError::InvalidDescriptor(
                "3D transform has non-finite components".to_string(),
            ));
        }
        let norm_sq: f64 = self.rotation.iter().map(|c| c * c).sum();
        if norm_sq < 1e-12 {
            return Err(GraphError::InvalidDescriptor(
                "3D transform rotation has near-zero norm".to_string(),
            ));
        }
        Ok(())
    }
}

/// The serialized form of a constraint's cost function: node references
/// plus the cost's own parameters, per variant.
///
/// Reconstructing a [`Constraint`] from this value (with the original id
/// and loss) reproduces identical registration effects and residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CostFunctionKind {
    RelativePose2D(RelativePose2D),
    RelativePose3D(RelativePose3D),
    RelativePose2Dto3D(RelativePose2Dto3D),
    InterpolatedRelativePose2D(InterpolatedRelativePose2D),
    InterpolatedRelativePose3D(InterpolatedRelativePose3D),
}

impl CostFunctionKind {
    fn validate(&self) -> Result<()> {
        match self {
            CostFunctionKind::RelativePose2D(c) => c.validate(),
            CostFunctionKind::RelativePose3D(c) => c.validate(),
            CostFunctionKind::RelativePose2Dto3D(c) => c.validate(),
            CostFunctionKind::InterpolatedRelativePose2D(c) => c.validate(),
            CostFunctionKind::InterpolatedRelativePose3D(c) => c.validate(),
        }
    }
}

/// The full persisted form of a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    pub id: ConstraintId,
    pub loss: LossFunction,
    pub cost_function: CostFunctionKind,
}

/// A pose constraint: id, loss, node references and cost, immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct Constraint {
    id: ConstraintId,
    loss: LossFunction,
    cost: CostFunctionKind,
}

impl Constraint {
    /// Build a constraint, validating the cost parameters.
    pub fn new(id: ConstraintId, loss: LossFunction, cost: CostFunctionKind) -> Result<Self> {
        cost.validate()?;
        Ok(Self { id, loss, cost })
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn loss(&self) -> &LossFunction {
        &self.loss
    }

    /// The cost-function form of this constraint, as persisted.
    pub fn cost_function(&self) -> &CostFunctionKind {
        &self.cost
    }

    /// Register this constraint with the problem.
    ///
    /// Resolves every referenced node against the store first; if any is
    /// absent, or all are constant, nothing is registered. Otherwise the
    /// node parameter blocks are added (constant ones marked so) and
    /// exactly one residual block is registered.
    pub fn add_to_problem(&self, nodes: &Nodes, problem: &mut Problem) {
        match &self.cost {
            CostFunctionKind::RelativePose2D(c) => c.add_to_problem(&self.loss, nodes, problem),
            CostFunctionKind::RelativePose3D(c) => c.add_to_problem(&self.loss, nodes, problem),
            CostFunctionKind::RelativePose2Dto3D(c) => c.add_to_problem(&self.loss, nodes, problem),
            CostFunctionKind::InterpolatedRelativePose2D(c) => {
                c.add_to_problem(&self.loss, nodes, problem)
            }
            CostFunctionKind::InterpolatedRelativePose3D(c) => {
                c.add_to_problem(&self.loss, nodes, problem)
            }
        }
    }

    /// Serialize into the persisted descriptor form.
    pub fn to_descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            id: self.id,
            loss: self.loss.clone(),
            cost_function: self.cost.clone(),
        }
    }

    /// Reconstruct from a descriptor. Fails on malformed cost parameters.
    pub fn from_descriptor(descriptor: ConstraintDescriptor) -> Result<Self> {
        Self::new(descriptor.id, descriptor.loss, descriptor.cost_function)
    }
}

// ============================================================================
// Shared registration and residual helpers for the variant impls
// ============================================================================

/// Register a 2D node's single parameter block, marking it constant when
/// the node is fixed.
pub(crate) fn add_pose_2d_blocks(problem: &mut Problem, id: NodeId, node: &Pose2DNode) {
    let key = ParamBlockKey::Pose2D(id);
    problem.add_parameter_block(key, key.size());
    if node.constant {
        problem.set_parameter_block_constant(key);
    }
}

/// Register a 3D node's translation and rotation blocks.
pub(crate) fn add_pose_3d_blocks(problem: &mut Problem, id: NodeId, node: &Pose3DNode) {
    let translation = ParamBlockKey::Translation3(id);
    let rotation = ParamBlockKey::Rotation3(id);
    problem.add_parameter_block(translation, translation.size());
    problem.add_parameter_block(rotation, rotation.size());
    if node.constant {
        problem.set_parameter_block_constant(translation);
        problem.set_parameter_block_constant(rotation);
    }
}

/// Weighted 6-dimensional error between the relative transform
/// anchor⁻¹ ∘ second and a measured transform.
///
/// Layout: weighted translation difference, then the angle-axis form of
/// the rotation discrepancy scaled by the rotation weight. Zero exactly
/// when the predicted relative transform matches the measurement.
pub(crate) fn relative_pose_error_3d<T: Real>(
    anchor_translation: &[T; 3],
    anchor_rotation: &[T; 4],
    second_translation: &[T; 3],
    second_rotation: &[T; 4],
    measured: &Transform3D,
    translation_weight: f64,
    rotation_weight: f64,
) -> [T; 6] {
    let (rel_t, rel_q) = pose3_inverse_compose(
        anchor_translation,
        anchor_rotation,
        second_translation,
        second_rotation,
    );

    let measured_q = [
        T::from_f64(measured.rotation[0]),
        T::from_f64(measured.rotation[1]),
        T::from_f64(measured.rotation[2]),
        T::from_f64(measured.rotation[3]),
    ];
    let delta_q = quat_multiply(&quat_conjugate(&measured_q), &rel_q);
    let angle_axis = quat_to_angle_axis(&delta_q);

    let tw = T::from_f64(translation_weight);
    let rw = T::from_f64(rotation_weight);
    [
        (rel_t[0] - T::from_f64(measured.translation[0])) * tw,
        (rel_t[1] - T::from_f64(measured.translation[1])) * tw,
        (rel_t[2] - T::from_f64(measured.translation[2])) * tw,
        angle_axis[0] * rw,
        angle_axis[1] * rw,
        angle_axis[2] * rw,
    ]
}

/// Validate a (translation, rotation) weight pair.
pub(crate) fn validate_weights(translation_weight: f64, rotation_weight: f64) -> Result<()> {
    for w in [translation_weight, rotation_weight] {
        if !w.is_finite() || w < 0.0 {
            return Err(GraphError::InvalidDescriptor(format!(
                "weight must be finite and non-negative, got {w}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn block3(slice: &[f64]) -> [f64; 3] {
    [slice[0], slice[1], slice[2]]
}

pub(crate) fn block4(slice: &[f64]) -> [f64; 4] {
    [slice[0], slice[1], slice[2], slice[3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_validation() {
        assert!(Transform2D::identity().validate().is_ok());
        assert!(Transform2D::new(f64::NAN, 0.0, 0.0).validate().is_err());

        assert!(Transform3D::identity().validate().is_ok());
        assert!(Transform3D::new([0.0; 3], [0.0; 4]).validate().is_err());
        assert!(
            Transform3D::new([f64::INFINITY, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_weight_validation() {
        assert!(validate_weights(1.0, 0.0).is_ok());
        assert!(validate_weights(-1.0, 1.0).is_err());
        assert!(validate_weights(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_relative_pose_error_zero_at_measurement() {
        let anchor_t = [1.0, 2.0, 0.0];
        let anchor_q = [1.0, 0.0, 0.0, 0.0];
        let second_t = [1.5, 2.0, 0.3];
        let second_q = [1.0, 0.0, 0.0, 0.0];
        let measured = Transform3D::new([0.5, 0.0, 0.3], [1.0, 0.0, 0.0, 0.0]);

        let error =
            relative_pose_error_3d(&anchor_t, &anchor_q, &second_t, &second_q, &measured, 1.0, 1.0);
        for component in error {
            assert_relative_eq!(component, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_relative_pose_error_scales_with_weights() {
        let anchor_t = [0.0; 3];
        let anchor_q = [1.0, 0.0, 0.0, 0.0];
        let second_t = [1.0, 0.0, 0.0];
        let second_q = [1.0, 0.0, 0.0, 0.0];
        let measured = Transform3D::identity();

        let unweighted =
            relative_pose_error_3d(&anchor_t, &anchor_q, &second_t, &second_q, &measured, 1.0, 1.0);
        let weighted =
            relative_pose_error_3d(&anchor_t, &anchor_q, &second_t, &second_q, &measured, 4.0, 1.0);
        assert_relative_eq!(weighted[0], 4.0 * unweighted[0]);
    }

    #[test]
    fn test_descriptor_roundtrip_through_json() {
        let descriptor = ConstraintDescriptor {
            id: ConstraintId(42),
            loss: LossFunction::Huber(1.5),
            cost_function: CostFunctionKind::RelativePose2D(RelativePose2D {
                from: NodeId(1),
                to: NodeId(2),
                measured: Transform2D::new(1.0, 0.5, 0.1),
                translation_weight: 10.0,
                rotation_weight: 20.0,
            }),
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        let back: ConstraintDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);

        let constraint = Constraint::from_descriptor(back).unwrap();
        assert_eq!(constraint.id(), ConstraintId(42));
        assert_eq!(constraint.to_descriptor(), descriptor);
    }

    #[test]
    fn test_unknown_variant_tag_fails_deserialization() {
        let json = r#"{"id":1,"loss":"None","cost_function":{"AccelerationPrior":{}}}"#;
        assert!(serde_json::from_str::<ConstraintDescriptor>(json).is_err());
    }

    #[test]
    fn test_malformed_descriptor_fails_construction() {
        let result = Constraint::new(
            ConstraintId(0),
            LossFunction::None,
            CostFunctionKind::RelativePose2D(RelativePose2D {
                from: NodeId(1),
                to: NodeId(2),
                measured: Transform2D::identity(),
                translation_weight: -1.0,
                rotation_weight: 1.0,
            }),
        );
        assert!(matches!(result, Err(GraphError::InvalidDescriptor(_))));
    }
}
