//! Constructive Solid Geometry
//!
//! Solid scopes build a tree of boolean operations; primitives emitted
//! inside a `primitive` solid are tagged with their leaf node. At
//! composition time each sample's entry list is resolved against the
//! tree: walking front to back, a surface crossing toggles its leaf's
//! inside state, and the entry survives only when the crossing changes
//! the combined solid's state.

use crate::state::SolidOp;

/// Index of a node in its [`CsgTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CsgNodeId(pub u32);

#[derive(Debug)]
struct CsgNodeData {
    op: SolidOp,
    parent: Option<CsgNodeId>,
    children: Vec<CsgNodeId>,
}

/// The solid tree of one frame. Built single-threaded by the interface,
/// then shared immutably with the sampling workers.
#[derive(Debug, Default)]
pub struct CsgTree {
    nodes: Vec<CsgNodeData>,
}

impl CsgTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node under `parent` (or a new root).
    pub fn add(&mut self, op: SolidOp, parent: Option<CsgNodeId>) -> CsgNodeId {
        let id = CsgNodeId(self.nodes.len() as u32);
        self.nodes.push(CsgNodeData {
            op,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.0 as usize].children.push(id);
        }
        id
    }

    #[must_use]
    pub fn op(&self, id: CsgNodeId) -> SolidOp {
        self.nodes[id.0 as usize].op
    }

    /// Walks to the root of a node's tree.
    #[must_use]
    pub fn root_of(&self, id: CsgNodeId) -> CsgNodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0 as usize].parent {
            current = parent;
        }
        current
    }

    /// Evaluates whether the solid rooted at `id` is "inside", given the
    /// inside state of each `primitive` leaf (indexed by node id).
    #[must_use]
    pub fn inside(&self, id: CsgNodeId, leaf_states: &[bool]) -> bool {
        let node = &self.nodes[id.0 as usize];
        match node.op {
            SolidOp::Primitive => {
                // A primitive leaf's own state; an interior `primitive`
                // node with children treats them as a union.
                if node.children.is_empty() {
                    leaf_states.get(id.0 as usize).copied().unwrap_or(false)
                } else {
                    node.children.iter().any(|c| self.inside(*c, leaf_states))
                }
            }
            SolidOp::Union => node.children.iter().any(|c| self.inside(*c, leaf_states)),
            SolidOp::Intersection => {
                !node.children.is_empty()
                    && node.children.iter().all(|c| self.inside(*c, leaf_states))
            }
            SolidOp::Difference => match node.children.split_first() {
                None => false,
                Some((first, rest)) => {
                    self.inside(*first, leaf_states)
                        && !rest.iter().any(|c| self.inside(*c, leaf_states))
                }
            },
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// difference { primitive A; primitive B }
    fn difference_tree() -> (CsgTree, CsgNodeId, CsgNodeId, CsgNodeId) {
        let mut tree = CsgTree::new();
        let diff = tree.add(SolidOp::Difference, None);
        let a = tree.add(SolidOp::Primitive, Some(diff));
        let b = tree.add(SolidOp::Primitive, Some(diff));
        (tree, diff, a, b)
    }

    #[test]
    fn difference_semantics() {
        let (tree, diff, a, b) = difference_tree();
        let mut states = vec![false; tree.node_count()];
        assert!(!tree.inside(diff, &states));
        states[a.0 as usize] = true;
        assert!(tree.inside(diff, &states));
        states[b.0 as usize] = true;
        assert!(!tree.inside(diff, &states), "inside B carves the hole");
    }

    #[test]
    fn union_and_intersection() {
        let mut tree = CsgTree::new();
        let union = tree.add(SolidOp::Union, None);
        let a = tree.add(SolidOp::Primitive, Some(union));
        let b = tree.add(SolidOp::Primitive, Some(union));
        let mut states = vec![false; tree.node_count()];
        states[b.0 as usize] = true;
        assert!(tree.inside(union, &states));

        let mut tree2 = CsgTree::new();
        let inter = tree2.add(SolidOp::Intersection, None);
        let c = tree2.add(SolidOp::Primitive, Some(inter));
        let d = tree2.add(SolidOp::Primitive, Some(inter));
        let mut states2 = vec![false; tree2.node_count()];
        states2[c.0 as usize] = true;
        assert!(!tree2.inside(inter, &states2));
        states2[d.0 as usize] = true;
        assert!(tree2.inside(inter, &states2));
    }

    #[test]
    fn root_walk() {
        let (tree, diff, a, _) = difference_tree();
        assert_eq!(tree.root_of(a), diff);
        assert_eq!(tree.root_of(diff), diff);
    }
}
