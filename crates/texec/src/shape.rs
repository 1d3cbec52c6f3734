use serde::{Deserialize, Serialize};

/// Opaque identifier for one registered buffer. Handles are issued by the
/// runtime's buffer registry; callers never see raw storage pointers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BufferId(pub u64);

/// Shape of one parameter or output: a possibly nested tuple whose leaves
/// are flat byte extents. Tuple structure is explicit here rather than
/// encoded as pointer tables packed into a parent buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeTree {
    Leaf { byte_len: usize },
    Tuple(Vec<ShapeTree>),
}

impl ShapeTree {
    pub fn leaf(byte_len: usize) -> Self {
        ShapeTree::Leaf { byte_len }
    }

    pub fn tuple(children: impl Into<Vec<ShapeTree>>) -> Self {
        ShapeTree::Tuple(children.into())
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, ShapeTree::Tuple(_))
    }

    /// Number of leaf tensors, counted pre-order depth-first.
    pub fn leaf_count(&self) -> usize {
        match self {
            ShapeTree::Leaf { .. } => 1,
            ShapeTree::Tuple(children) => children.iter().map(ShapeTree::leaf_count).sum(),
        }
    }

    /// Byte extents of all leaves in pre-order.
    pub fn leaf_sizes(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.leaf_count());
        self.collect_leaf_sizes(&mut out);
        out
    }

    fn collect_leaf_sizes(&self, out: &mut Vec<usize>) {
        match self {
            ShapeTree::Leaf { byte_len } => out.push(*byte_len),
            ShapeTree::Tuple(children) => {
                for child in children {
                    child.collect_leaf_sizes(out);
                }
            }
        }
    }
}

/// A tensor value as seen by executor callers: either one buffer handle or
/// a tuple of nested values. The tree mirrors a `ShapeTree` structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferTree {
    Leaf(BufferId),
    Tuple(Vec<BufferTree>),
}

impl BufferTree {
    pub fn leaf(id: BufferId) -> Self {
        BufferTree::Leaf(id)
    }

    pub fn tuple(children: impl Into<Vec<BufferTree>>) -> Self {
        BufferTree::Tuple(children.into())
    }

    pub fn as_leaf(&self) -> Option<BufferId> {
        match self {
            BufferTree::Leaf(id) => Some(*id),
            BufferTree::Tuple(_) => None,
        }
    }

    /// Tuple-element access, one level deep.
    pub fn element(&self, index: usize) -> Option<&BufferTree> {
        match self {
            BufferTree::Leaf(_) => None,
            BufferTree::Tuple(children) => children.get(index),
        }
    }

    /// All leaf handles in pre-order depth-first order.
    pub fn leaf_ids(&self) -> Vec<BufferId> {
        let mut out = Vec::new();
        self.collect_leaf_ids(&mut out);
        out
    }

    fn collect_leaf_ids(&self, out: &mut Vec<BufferId>) {
        match self {
            BufferTree::Leaf(id) => out.push(*id),
            BufferTree::Tuple(children) => {
                for child in children {
                    child.collect_leaf_ids(out);
                }
            }
        }
    }

    /// Flattens this tree against `shape`, returning the pre-order leaf
    /// handles when the two trees agree structurally.
    pub fn flatten_matching(&self, shape: &ShapeTree) -> Option<Vec<BufferId>> {
        let mut out = Vec::with_capacity(shape.leaf_count());
        if self.flatten_into(shape, &mut out) {
            Some(out)
        } else {
            None
        }
    }

    fn flatten_into(&self, shape: &ShapeTree, out: &mut Vec<BufferId>) -> bool {
        match (self, shape) {
            (BufferTree::Leaf(id), ShapeTree::Leaf { .. }) => {
                out.push(*id);
                true
            }
            (BufferTree::Tuple(children), ShapeTree::Tuple(shapes)) => {
                children.len() == shapes.len()
                    && children
                        .iter()
                        .zip(shapes)
                        .all(|(child, shape)| child.flatten_into(shape, out))
            }
            _ => false,
        }
    }

    /// Rebuilds a tree from `shape` structure and a pre-order leaf handle
    /// sequence. Returns `None` when the leaf count does not match.
    pub fn rebuild(shape: &ShapeTree, leaves: &[BufferId]) -> Option<BufferTree> {
        let mut rest = leaves;
        let tree = Self::rebuild_inner(shape, &mut rest)?;
        if rest.is_empty() {
            Some(tree)
        } else {
            None
        }
    }

    fn rebuild_inner(shape: &ShapeTree, rest: &mut &[BufferId]) -> Option<BufferTree> {
        match shape {
            ShapeTree::Leaf { .. } => {
                let (first, tail) = rest.split_first()?;
                *rest = tail;
                Some(BufferTree::Leaf(*first))
            }
            ShapeTree::Tuple(shapes) => {
                let mut children = Vec::with_capacity(shapes.len());
                for shape in shapes {
                    children.push(Self::rebuild_inner(shape, rest)?);
                }
                Some(BufferTree::Tuple(children))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_shape() -> ShapeTree {
        ShapeTree::tuple([
            ShapeTree::leaf(4),
            ShapeTree::tuple([ShapeTree::leaf(8), ShapeTree::leaf(12)]),
            ShapeTree::leaf(16),
        ])
    }

    #[test]
    fn leaf_count_and_sizes_are_preorder() {
        let shape = nested_shape();
        assert_eq!(shape.leaf_count(), 4);
        assert_eq!(shape.leaf_sizes(), vec![4, 8, 12, 16]);
    }

    #[test]
    fn flatten_rebuild_round_trip() {
        let shape = nested_shape();
        let tree = BufferTree::tuple([
            BufferTree::leaf(BufferId(10)),
            BufferTree::tuple([BufferTree::leaf(BufferId(11)), BufferTree::leaf(BufferId(12))]),
            BufferTree::leaf(BufferId(13)),
        ]);
        let leaves = tree.flatten_matching(&shape).expect("trees must agree");
        assert_eq!(
            leaves,
            vec![BufferId(10), BufferId(11), BufferId(12), BufferId(13)]
        );
        let rebuilt = BufferTree::rebuild(&shape, &leaves).expect("rebuild");
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn flatten_rejects_structural_mismatch() {
        let shape = nested_shape();
        let tree = BufferTree::tuple([BufferTree::leaf(BufferId(1))]);
        assert!(tree.flatten_matching(&shape).is_none());
    }

    #[test]
    fn rebuild_rejects_leftover_leaves() {
        let shape = ShapeTree::leaf(4);
        assert!(BufferTree::rebuild(&shape, &[BufferId(1), BufferId(2)]).is_none());
    }

    #[test]
    fn element_access() {
        let tree = BufferTree::tuple([BufferTree::leaf(BufferId(1)), BufferTree::leaf(BufferId(2))]);
        assert_eq!(tree.element(1).and_then(BufferTree::as_leaf), Some(BufferId(2)));
        assert_eq!(tree.element(2), None);
    }
}
