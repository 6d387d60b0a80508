//! Trajectory node storage: the pose parameter blocks the solver optimizes.
//!
//! Nodes live in two disjoint key spaces (2D and 3D). The store owns the
//! actual parameter storage; problem construction only records which blocks
//! exist, and the solver borrows the store mutably for the duration of one
//! solve. Lookups return `None` for absent ids, an expected outcome in an
//! evolving graph rather than an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a trajectory node within one key space.
///
/// The same id value must not denote both a 2D and a 3D node in one graph;
/// the store does not police this, callers keep the spaces disjoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Raw id value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A 2D pose node: one parameter block of (x, y, heading).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2DNode {
    /// Parameter block: x (m), y (m), heading (rad).
    pub pose: [f64; 3],
    /// Whether this node is excluded from optimization.
    pub constant: bool,
}

impl Pose2DNode {
    /// Create a mutable (optimized) node.
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            pose: [x, y, theta],
            constant: false,
        }
    }

    /// Create a fixed node whose pose is input, never output.
    pub fn fixed(x: f64, y: f64, theta: f64) -> Self {
        Self {
            pose: [x, y, theta],
            constant: true,
        }
    }
}

/// A 3D pose node: two parameter blocks, translation and rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3DNode {
    /// Translation parameter block (m).
    pub translation: [f64; 3],
    /// Rotation parameter block, unit quaternion stored [w, x, y, z].
    pub rotation: [f64; 4],
    /// Whether this node is excluded from optimization.
    pub constant: bool,
}

impl Pose3DNode {
    /// Create a mutable (optimized) node.
    pub fn new(translation: [f64; 3], rotation: [f64; 4]) -> Self {
        Self {
            translation,
            rotation,
            constant: false,
        }
    }

    /// Create a fixed node whose pose is input, never output.
    pub fn fixed(translation: [f64; 3], rotation: [f64; 4]) -> Self {
        Self {
            translation,
            rotation,
            constant: true,
        }
    }

    /// Node at the origin with identity rotation.
    pub fn identity() -> Self {
        Self::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0])
    }
}

/// The pose store: node id → parameter blocks, per key space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Nodes {
    pose_2d_nodes: HashMap<NodeId, Pose2DNode>,
    pose_3d_nodes: HashMap<NodeId, Pose3DNode>,
}

impl Nodes {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a 2D node.
    pub fn insert_pose_2d(&mut self, id: NodeId, node: Pose2DNode) {
        self.pose_2d_nodes.insert(id, node);
    }

    /// Insert or replace a 3D node.
    pub fn insert_pose_3d(&mut self, id: NodeId, node: Pose3DNode) {
        self.pose_3d_nodes.insert(id, node);
    }

    /// Look up a 2D node. Absence is a value, not an error.
    pub fn pose_2d(&self, id: NodeId) -> Option<&Pose2DNode> {
        self.pose_2d_nodes.get(&id)
    }

    /// Look up a 3D node.
    pub fn pose_3d(&self, id: NodeId) -> Option<&Pose3DNode> {
        self.pose_3d_nodes.get(&id)
    }

    /// Mutable access to a 2D node.
    pub fn pose_2d_mut(&mut self, id: NodeId) -> Option<&mut Pose2DNode> {
        self.pose_2d_nodes.get_mut(&id)
    }

    /// Mutable access to a 3D node.
    pub fn pose_3d_mut(&mut self, id: NodeId) -> Option<&mut Pose3DNode> {
        self.pose_3d_nodes.get_mut(&id)
    }

    /// Remove a 2D node, returning it if present.
    pub fn remove_pose_2d(&mut self, id: NodeId) -> Option<Pose2DNode> {
        self.pose_2d_nodes.remove(&id)
    }

    /// Remove a 3D node, returning it if present.
    pub fn remove_pose_3d(&mut self, id: NodeId) -> Option<Pose3DNode> {
        self.pose_3d_nodes.remove(&id)
    }

    /// Iterate over 2D nodes.
    pub fn iter_pose_2d(&self) -> impl Iterator<Item = (&NodeId, &Pose2DNode)> {
        self.pose_2d_nodes.iter()
    }

    /// Iterate over 3D nodes.
    pub fn iter_pose_3d(&self) -> impl Iterator<Item = (&NodeId, &Pose3DNode)> {
        self.pose_3d_nodes.iter()
    }

    /// Number of 2D nodes.
    pub fn num_pose_2d(&self) -> usize {
        self.pose_2d_nodes.len()
    }

    /// Number of 3D nodes.
    pub fn num_pose_3d(&self) -> usize {
        self.pose_3d_nodes.len()
    }

    /// True when both key spaces are empty.
    pub fn is_empty(&self) -> bool {
        self.pose_2d_nodes.is_empty() && self.pose_3d_nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_absent_is_none() {
        let nodes = Nodes::new();
        assert!(nodes.pose_2d(NodeId(7)).is_none());
        assert!(nodes.pose_3d(NodeId(7)).is_none());
    }

    #[test]
    fn test_insert_and_find() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(1), Pose2DNode::new(1.0, 2.0, 0.5));
        nodes.insert_pose_3d(NodeId(2), Pose3DNode::identity());

        let n = nodes.pose_2d(NodeId(1)).unwrap();
        assert_eq!(n.pose, [1.0, 2.0, 0.5]);
        assert!(!n.constant);

        let n = nodes.pose_3d(NodeId(2)).unwrap();
        assert_eq!(n.rotation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_key_spaces_are_independent() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(1), Pose2DNode::new(0.0, 0.0, 0.0));
        // Same raw id in the other space is a distinct entry; the store
        // does not enforce disjointness.
        assert!(nodes.pose_3d(NodeId(1)).is_none());
        nodes.insert_pose_3d(NodeId(1), Pose3DNode::identity());
        assert!(nodes.pose_2d(NodeId(1)).is_some());
        assert!(nodes.pose_3d(NodeId(1)).is_some());
    }

    #[test]
    fn test_fixed_constructor_sets_constant() {
        assert!(Pose2DNode::fixed(0.0, 0.0, 0.0).constant);
        assert!(Pose3DNode::fixed([0.0; 3], [1.0, 0.0, 0.0, 0.0]).constant);
        assert!(!Pose2DNode::new(0.0, 0.0, 0.0).constant);
    }

    #[test]
    fn test_remove() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(3), Pose2DNode::new(1.0, 0.0, 0.0));
        assert!(nodes.remove_pose_2d(NodeId(3)).is_some());
        assert!(nodes.pose_2d(NodeId(3)).is_none());
        assert!(nodes.remove_pose_2d(NodeId(3)).is_none());
    }

    #[test]
    fn test_mutation_through_store() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(1), Pose2DNode::new(0.0, 0.0, 0.0));
        nodes.pose_2d_mut(NodeId(1)).unwrap().pose[0] = 4.2;
        assert_eq!(nodes.pose_2d(NodeId(1)).unwrap().pose[0], 4.2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut nodes = Nodes::new();
        nodes.insert_pose_2d(NodeId(1), Pose2DNode::fixed(1.0, -2.0, 0.3));
        nodes.insert_pose_3d(NodeId(2), Pose3DNode::new([0.5, 0.0, 0.2], [1.0, 0.0, 0.0, 0.0]));

        let json = serde_json::to_string(&nodes).unwrap();
        let back: Nodes = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pose_2d(NodeId(1)), nodes.pose_2d(NodeId(1)));
        assert_eq!(back.pose_3d(NodeId(2)), nodes.pose_3d(NodeId(2)));
    }
}
