use crate::error::{GateError, Result};
use crate::types::{Gate, GateId, TransformId};
use flow_events::Transform;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
struct GateEntry {
    gate: Gate,
    parent: Option<GateId>,
    children: Vec<GateId>,
}

/// An ordered forest of gates plus the transforms their dimensions reference.
///
/// Gates live in an arena and are addressed by [`GateId`]. A gate is attached to its
/// parent when it is added, so every tree is acyclic by construction and every
/// non-root gate has exactly one parent.
///
/// # Example
///
/// ```rust
/// use flow_gates::{Gate, GateDimension, GateTrees, RectangleBound};
///
/// # fn example() -> flow_gates::Result<()> {
/// let mut trees = GateTrees::new();
/// let root = trees.add_root_gate(Gate::rectangle(
///     vec![GateDimension::new("FSC-A")],
///     vec![RectangleBound::new(Some(1000.0), None)],
/// )?)?;
/// let child = trees.add_child_gate(root, Gate::rectangle(
///     vec![GateDimension::new("SSC-A")],
///     vec![RectangleBound::new(None, Some(5000.0))],
/// )?)?;
///
/// assert_eq!(trees.parent(child), Some(root));
/// assert_eq!(trees.find_descendant_gates(), vec![root, child]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateTrees {
    gates: Vec<GateEntry>,
    roots: Vec<GateId>,
    transforms: Vec<Transform>,
}

impl GateTrees {
    /// Create a new empty forest
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transform and return its handle
    pub fn add_transform(&mut self, transform: Transform) -> TransformId {
        self.transforms.push(transform);
        TransformId(self.transforms.len() - 1)
    }

    pub fn transform(&self, id: TransformId) -> Option<&Transform> {
        self.transforms.get(id.index())
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Find a transform by its identifier string
    pub fn find_transform(&self, id: &str) -> Option<TransformId> {
        self.transforms
            .iter()
            .position(|t| t.id.as_ref() == id)
            .map(TransformId)
    }

    /// Add a gate as a new root tree
    /// # Errors
    /// Returns an error if the gate is invalid or references an unknown transform
    pub fn add_root_gate(&mut self, gate: Gate) -> Result<GateId> {
        self.insert(gate, None)
    }

    /// Add a gate as the last child of `parent`
    /// # Errors
    /// Returns an error if `parent` does not exist, the gate is invalid, or it
    /// references an unknown transform
    pub fn add_child_gate(&mut self, parent: GateId, gate: Gate) -> Result<GateId> {
        if self.gates.get(parent.index()).is_none() {
            return Err(GateError::hierarchy_error(format!("parent gate {parent} does not exist")));
        }
        self.insert(gate, Some(parent))
    }

    fn insert(&mut self, gate: Gate, parent: Option<GateId>) -> Result<GateId> {
        gate.validate().map_err(|e| e.with_context(format!("gate '{}'", gate.label())))?;
        for dimension in gate.all_parameters() {
            if let Some(transform) = dimension.transform {
                if self.transform(transform).is_none() {
                    return Err(GateError::UnknownTransform(format!("#{}", transform.index())));
                }
            }
        }

        let id = GateId(self.gates.len());
        debug!("Adding gate '{}' as {id}", gate.label());
        self.gates.push(GateEntry {
            gate,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.gates[parent.index()].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    pub fn gate(&self, id: GateId) -> Option<&Gate> {
        self.gates.get(id.index()).map(|e| &e.gate)
    }

    /// Get a gate, failing with a hierarchy error when the handle is stale
    /// # Errors
    /// Returns an error if no gate has this id
    pub fn require_gate(&self, id: GateId) -> Result<&Gate> {
        self.gate(id)
            .ok_or_else(|| GateError::hierarchy_error(format!("gate {id} does not exist")))
    }

    pub fn number_of_gates(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Root gates in insertion order
    pub fn roots(&self) -> &[GateId] {
        &self.roots
    }

    /// Get the parent of a gate (`None` for roots and unknown ids)
    pub fn parent(&self, id: GateId) -> Option<GateId> {
        self.gates.get(id.index()).and_then(|e| e.parent)
    }

    /// Get the children of a gate in insertion order
    pub fn children(&self, id: GateId) -> &[GateId] {
        self.gates
            .get(id.index())
            .map(|e| e.children.as_slice())
            .unwrap_or_default()
    }

    /// Get all ancestors of a gate in order from closest to root
    pub fn ancestors(&self, id: GateId) -> Vec<GateId> {
        let mut ancestors = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            ancestors.push(parent);
            current = parent;
        }
        ancestors
    }

    /// Get the depth of a gate in its tree (root = 0)
    pub fn depth(&self, id: GateId) -> usize {
        self.ancestors(id).len()
    }

    pub fn is_root(&self, id: GateId) -> bool {
        self.gates.get(id.index()).is_some_and(|e| e.parent.is_none())
    }

    pub fn is_leaf(&self, id: GateId) -> bool {
        self.children(id).is_empty()
    }

    /// Every gate with parents before children: roots in order, each followed by its
    /// subtree with children in insertion order.
    ///
    /// This is the only order in which gates may be computed.
    pub fn find_descendant_gates(&self) -> Vec<GateId> {
        let mut order = Vec::with_capacity(self.gates.len());
        for &root in &self.roots {
            self.push_subtree(root, &mut order);
        }
        order
    }

    /// A gate followed by all of its descendants, in the same order as
    /// [`find_descendant_gates`](Self::find_descendant_gates)
    pub fn find_subtree(&self, id: GateId) -> Vec<GateId> {
        let mut order = Vec::new();
        if self.gate(id).is_some() {
            self.push_subtree(id, &mut order);
        }
        order
    }

    fn push_subtree(&self, id: GateId, order: &mut Vec<GateId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.children(current).iter().rev());
        }
    }

    /// Gates grouped by depth, breadth first
    pub fn levels(&self) -> Vec<Vec<GateId>> {
        let mut levels: Vec<Vec<GateId>> = Vec::new();
        let mut queue: VecDeque<(GateId, usize)> = self.roots.iter().map(|&r| (r, 0)).collect();
        while let Some((id, depth)) = queue.pop_front() {
            if levels.len() <= depth {
                levels.push(Vec::new());
            }
            levels[depth].push(id);
            queue.extend(self.children(id).iter().map(|&c| (c, depth + 1)));
        }
        levels
    }

    /// Find a gate by the identifier it was loaded with
    pub fn find_by_original_id(&self, original_id: &str) -> Option<GateId> {
        self.gates
            .iter()
            .position(|e| e.gate.original_id.as_deref() == Some(original_id))
            .map(GateId)
    }

    /// Find the first gate with this name
    pub fn find_by_name(&self, name: &str) -> Option<GateId> {
        self.gates.iter().position(|e| e.gate.name == name).map(GateId)
    }

    /// Iterate over all gates in arena order
    pub fn iter(&self) -> impl Iterator<Item = (GateId, &Gate)> {
        self.gates.iter().enumerate().map(|(i, e)| (GateId(i), &e.gate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GateDimension, RectangleBound};

    fn gate(name: &str) -> Gate {
        Gate::rectangle(
            vec![GateDimension::new("X")],
            vec![RectangleBound::new(Some(0.0), Some(1.0))],
        )
        .unwrap()
        .with_name(name)
    }

    #[test]
    fn test_add_child() {
        let mut trees = GateTrees::new();
        let parent = trees.add_root_gate(gate("parent")).unwrap();
        let child = trees.add_child_gate(parent, gate("child")).unwrap();

        assert_eq!(trees.parent(child), Some(parent));
        assert_eq!(trees.parent(parent), None);
        assert_eq!(trees.children(parent), &[child]);
        assert!(trees.is_root(parent));
        assert!(trees.is_leaf(child));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut trees = GateTrees::new();
        let result = trees.add_child_gate(GateId(3), gate("orphan"));
        assert!(matches!(result, Err(GateError::HierarchyError { .. })));
        assert!(trees.is_empty());
    }

    #[test]
    fn test_ancestors_and_depth() {
        let mut trees = GateTrees::new();
        let root = trees.add_root_gate(gate("root")).unwrap();
        let parent = trees.add_child_gate(root, gate("parent")).unwrap();
        let child = trees.add_child_gate(parent, gate("child")).unwrap();

        assert_eq!(trees.ancestors(child), vec![parent, root]);
        assert_eq!(trees.depth(root), 0);
        assert_eq!(trees.depth(child), 2);
    }

    #[test]
    fn test_descendant_order_is_preorder() {
        let mut trees = GateTrees::new();
        let a = trees.add_root_gate(gate("a")).unwrap();
        let b = trees.add_child_gate(a, gate("b")).unwrap();
        let c = trees.add_child_gate(a, gate("c")).unwrap();
        let d = trees.add_child_gate(b, gate("d")).unwrap();
        let e = trees.add_root_gate(gate("e")).unwrap();
        let f = trees.add_child_gate(c, gate("f")).unwrap();

        assert_eq!(trees.find_descendant_gates(), vec![a, b, d, c, f, e]);
        assert_eq!(trees.find_subtree(c), vec![c, f]);
        assert_eq!(trees.levels(), vec![vec![a, e], vec![b, c], vec![d, f]]);
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let mut trees = GateTrees::new();
        let gate = Gate::rectangle(
            vec![GateDimension::new("X").with_transform(TransformId(0))],
            vec![RectangleBound::default()],
        )
        .unwrap();
        assert!(matches!(trees.add_root_gate(gate), Err(GateError::UnknownTransform(_))));
    }

    #[test]
    fn test_lookup_by_ids() {
        let mut trees = GateTrees::new();
        let root = trees.add_root_gate(gate("Lymphocytes").with_original_id("G1")).unwrap();
        assert_eq!(trees.find_by_original_id("G1"), Some(root));
        assert_eq!(trees.find_by_name("Lymphocytes"), Some(root));
        assert_eq!(trees.find_by_original_id("G2"), None);
    }
}
