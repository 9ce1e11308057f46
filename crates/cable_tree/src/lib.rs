#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {node} has parent {parent}, which is not earlier in the tree")]
    NonTopological { node: usize, parent: usize },
    #[error("node {node} has parent {parent}, which is out of range for {size} nodes")]
    ParentOutOfRange {
        node: usize,
        parent: usize,
        size: usize,
    },
}

/// Rooted tree over segment indices, stored as parent links only.
///
/// Node 0 is the root; every other node's parent is a strictly smaller index.
/// Children are materialized into a CSR adjacency so callers can iterate them
/// without the tree holding child pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTree {
    parents: Vec<usize>,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
}

impl SegmentTree {
    /// Builds a tree from a parent-index sequence. Element `i` is the parent
    /// of node `i`; the root's parent is itself. An empty sequence is treated
    /// as a single root node.
    pub fn from_parent_index(parents: &[usize]) -> Result<Self, TreeError> {
        let parents: Vec<usize> = if parents.is_empty() {
            vec![0]
        } else {
            parents.to_vec()
        };

        let size = parents.len();
        for (node, &parent) in parents.iter().enumerate() {
            if parent >= size {
                return Err(TreeError::ParentOutOfRange { node, parent, size });
            }
            if node == 0 {
                if parent != 0 {
                    return Err(TreeError::NonTopological { node, parent });
                }
            } else if parent >= node {
                return Err(TreeError::NonTopological { node, parent });
            }
        }

        Ok(Self::from_checked_parents(parents))
    }

    fn from_checked_parents(parents: Vec<usize>) -> Self {
        let size = parents.len();
        let mut counts = vec![0usize; size];
        for (node, &parent) in parents.iter().enumerate() {
            if node != 0 {
                counts[parent] += 1;
            }
        }

        let mut row_offsets = vec![0usize; size + 1];
        for node in 0..size {
            row_offsets[node + 1] = row_offsets[node] + counts[node];
        }

        let mut cursor = row_offsets.clone();
        let mut col_indices = vec![0usize; row_offsets[size]];
        for (node, &parent) in parents.iter().enumerate() {
            if node != 0 {
                col_indices[cursor[parent]] = node;
                cursor[parent] += 1;
            }
        }

        Self {
            parents,
            row_offsets,
            col_indices,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.parents.len()
    }

    pub fn parent(&self, node: usize) -> usize {
        self.parents[node]
    }

    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    pub fn children(&self, node: usize) -> &[usize] {
        &self.col_indices[self.row_offsets[node]..self.row_offsets[node + 1]]
    }

    pub fn num_children(&self, node: usize) -> usize {
        self.row_offsets[node + 1] - self.row_offsets[node]
    }

    /// Depth of each node below the root.
    pub fn depths(&self) -> Vec<usize> {
        let mut depths = vec![0usize; self.num_nodes()];
        for node in 1..self.num_nodes() {
            depths[node] = depths[self.parents[node]] + 1;
        }
        depths
    }

    /// Nodes in depth-first pre-order, children visited in index order.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.num_nodes());
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            order.push(node);
            for &child in self.children(node).iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Returns a copy of the tree re-rooted at `new_root`, preserving
    /// connectivity. Parent pointers along the path from `new_root` to the old
    /// root are reversed; nodes are renumbered in pre-order, where each path
    /// node keeps its original children (minus the path child) with the former
    /// parent appended last.
    pub fn change_root(&self, new_root: usize) -> SegmentTree {
        assert!(new_root < self.num_nodes(), "new root out of range");
        if new_root == 0 {
            return self.clone();
        }

        // Path from the new root up to the old root.
        let mut path = vec![new_root];
        while *path.last().unwrap() != 0 {
            path.push(self.parents[*path.last().unwrap()]);
        }

        // Reoriented adjacency: along the path, drop the downhill child and
        // append the former parent.
        let mut adjacency: Vec<Vec<usize>> = (0..self.num_nodes())
            .map(|node| self.children(node).to_vec())
            .collect();
        for pair in path.windows(2) {
            if let [below, above] = pair {
                adjacency[*above].retain(|&child| child != *below);
                adjacency[*below].push(*above);
            }
        }

        // Renumber in pre-order from the new root.
        let mut new_parents = Vec::with_capacity(self.num_nodes());
        let mut stack = vec![(new_root, 0usize)];
        while let Some((old, new_parent)) = stack.pop() {
            let new_id = new_parents.len();
            new_parents.push(new_parent);
            for &child in adjacency[old].iter().rev() {
                stack.push((child, new_id));
            }
        }
        debug_assert_eq!(new_parents.len(), self.num_nodes());
        new_parents[0] = 0;

        SegmentTree::from_checked_parents(new_parents)
    }

    /// Re-roots the tree at the node minimizing the maximum depth. Ties are
    /// broken by the smallest original node index.
    pub fn balance(&self) -> SegmentTree {
        self.change_root(self.height_centroid())
    }

    /// Node whose eccentric height (longest downward path from it after
    /// re-rooting) is minimal.
    pub fn height_centroid(&self) -> usize {
        let n = self.num_nodes();

        // Height of the subtree below each node, via reverse index order
        // (parents precede children).
        let mut down = vec![0usize; n];
        for node in (1..n).rev() {
            let parent = self.parents[node];
            down[parent] = down[parent].max(down[node] + 1);
        }

        // Height of the rest of the tree seen from each node, through its
        // parent.
        let mut up = vec![0usize; n];
        for node in 0..n {
            let children = self.children(node);
            // Two largest child subtree heights, to exclude each child itself.
            let (mut best, mut second) = (0usize, 0usize);
            for &child in children {
                let h = down[child] + 1;
                if h > best {
                    second = best;
                    best = h;
                } else if h > second {
                    second = h;
                }
            }
            for &child in children {
                let sibling_h = if down[child] + 1 == best { second } else { best };
                up[child] = 1 + up[node].max(sibling_h);
            }
        }

        let mut centroid = 0;
        let mut height = down[0].max(up[0]);
        for node in 1..n {
            let h = down[node].max(up[node]);
            if h < height {
                height = h;
                centroid = node;
            }
        }
        centroid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_adjacency_builds_expected_slices() {
        let tree = SegmentTree::from_parent_index(&[0, 0, 0, 1, 1]).unwrap();
        assert_eq!(tree.row_offsets, vec![0, 2, 4, 4, 4, 4]);
        assert_eq!(tree.col_indices, vec![1, 2, 3, 4]);
        assert_eq!(tree.children(0), &[1, 2]);
        assert_eq!(tree.children(1), &[3, 4]);
        assert_eq!(tree.children(4), &[] as &[usize]);
    }

    #[test]
    fn rejects_non_topological_parents() {
        assert_eq!(
            SegmentTree::from_parent_index(&[0, 2, 1]),
            Err(TreeError::NonTopological { node: 1, parent: 2 })
        );
        assert_eq!(
            SegmentTree::from_parent_index(&[0, 1]),
            Err(TreeError::NonTopological { node: 1, parent: 1 })
        );
        assert_eq!(
            SegmentTree::from_parent_index(&[0, 5]),
            Err(TreeError::ParentOutOfRange {
                node: 1,
                parent: 5,
                size: 2
            })
        );
        assert_eq!(
            SegmentTree::from_parent_index(&[1, 0]),
            Err(TreeError::NonTopological { node: 0, parent: 1 })
        );
    }

    #[test]
    fn empty_input_is_single_root() {
        let tree = SegmentTree::from_parent_index(&[]).unwrap();
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.num_children(0), 0);
    }

    #[test]
    fn depths_follow_parent_chain() {
        let tree = SegmentTree::from_parent_index(&[0, 0, 1, 2, 2]).unwrap();
        assert_eq!(tree.depths(), vec![0, 1, 2, 3, 3]);
    }

    #[test]
    fn preorder_visits_children_in_index_order() {
        let tree = SegmentTree::from_parent_index(&[0, 0, 0, 1, 1]).unwrap();
        assert_eq!(tree.preorder(), vec![0, 1, 3, 4, 2]);
    }
}
