// src/tdigest/centroid_tree.rs
//
// Centroids kept in mean order on top of the indexed AVL tree, with a
// subtree-weight aggregate per node. The aggregate is what makes head_sum and
// floor_sum logarithmic, which is the whole point of the tree digest.

use std::cmp::Ordering;

use super::tree::{IntAvlTree, NodeStore, NIL};

/// A centroid waiting to be inserted or written back into the tree.
struct Pending {
    mean: f64,
    count: i64,
    data: Option<Vec<f64>>,
}

struct CentroidStore {
    means: Vec<f64>,
    counts: Vec<i64>,
    // total count of the subtree rooted at each node
    aggregated_counts: Vec<i64>,
    // per-node recorded samples, allocated only when recording is on
    data: Option<Vec<Vec<f64>>>,
}

impl NodeStore for CentroidStore {
    type Item = Pending;

    fn resize(&mut self, new_capacity: usize) {
        self.means.resize(new_capacity, 0.0);
        self.counts.resize(new_capacity, 0);
        self.aggregated_counts.resize(new_capacity, 0);
        if let Some(data) = &mut self.data {
            data.resize(new_capacity, Vec::new());
        }
    }

    fn compare(&self, item: &Pending, node: u32) -> Ordering {
        // never Equal: centroids with the same mean stay distinct, ties
        // sort after the incumbent
        if item.mean < self.means[node as usize] {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    fn copy(&mut self, item: Pending, node: u32) {
        self.means[node as usize] = item.mean;
        self.counts[node as usize] = item.count;
        if let Some(data) = &mut self.data {
            data[node as usize] = item.data.unwrap_or_default();
        }
    }

    fn merge(&mut self, _item: Pending, _node: u32) {
        unreachable!("centroid comparisons never report equality");
    }

    fn fix_aggregate(&mut self, node: u32, left: u32, right: u32) {
        self.aggregated_counts[node as usize] = self.counts[node as usize]
            + self.aggregated_counts[left as usize]
            + self.aggregated_counts[right as usize];
    }
}

pub struct CentroidTree {
    tree: IntAvlTree,
    store: CentroidStore,
}

impl CentroidTree {
    pub fn new(record_data: bool) -> Self {
        let mut store = CentroidStore {
            means: Vec::new(),
            counts: Vec::new(),
            aggregated_counts: Vec::new(),
            data: record_data.then(Vec::new),
        };
        let tree = IntAvlTree::new(&mut store, 16);
        CentroidTree { tree, store }
    }

    pub fn records_data(&self) -> bool {
        self.store.data.is_some()
    }

    /// Number of centroids.
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// Total weight across all centroids.
    pub fn sum(&self) -> i64 {
        self.store.aggregated_counts[self.tree.root() as usize]
    }

    pub fn mean(&self, node: u32) -> f64 {
        self.store.means[node as usize]
    }

    pub fn count(&self, node: u32) -> i64 {
        self.store.counts[node as usize]
    }

    pub fn data(&self, node: u32) -> Option<&[f64]> {
        self.store.data.as_ref().map(|d| d[node as usize].as_slice())
    }

    /// Detach the recorded samples from `node`, typically right before an
    /// update puts an extended list back.
    pub fn take_data(&mut self, node: u32) -> Option<Vec<f64>> {
        self.store
            .data
            .as_mut()
            .map(|d| std::mem::take(&mut d[node as usize]))
    }

    pub fn add(&mut self, mean: f64, count: i64, data: Option<Vec<f64>>) {
        debug_assert!(!mean.is_nan() && count > 0);
        self.tree.add(&mut self.store, Pending { mean, count, data });
    }

    pub fn update(&mut self, node: u32, mean: f64, count: i64, data: Option<Vec<f64>>) {
        self.tree
            .update(&mut self.store, node, Pending { mean, count, data });
    }

    /// Rewrite `node` without relocating it. The caller guarantees the new
    /// mean still sorts between the node's neighbors.
    pub fn update_in_place(&mut self, node: u32, mean: f64, count: i64, data: Option<Vec<f64>>) {
        self.tree
            .update_in_place(&mut self.store, node, Pending { mean, count, data });
    }

    pub fn remove(&mut self, node: u32) {
        self.tree.remove(&mut self.store, node);
    }

    pub fn first(&self) -> u32 {
        self.tree.first(self.tree.root())
    }

    pub fn last(&self) -> u32 {
        self.tree.last(self.tree.root())
    }

    pub fn next(&self, node: u32) -> u32 {
        self.tree.next(node)
    }

    pub fn prev(&self, node: u32) -> u32 {
        self.tree.prev(node)
    }

    /// The last node in mean order whose mean is strictly less than `x`, or
    /// NIL when no mean is below `x`. Strictness matters: an insertion scan
    /// that starts here enters a run of equal means at its head instead of
    /// its tail.
    pub fn floor(&self, x: f64) -> u32 {
        let mut floor = NIL;
        let mut node = self.tree.root();
        while node != NIL {
            if x <= self.mean(node) {
                node = self.tree.left(node);
            } else {
                floor = node;
                node = self.tree.right(node);
            }
        }
        floor
    }

    /// The last node whose preceding weight (head sum) is `<= sum`.
    pub fn floor_sum(&self, mut sum: i64) -> u32 {
        let mut floor = NIL;
        let mut node = self.tree.root();
        while node != NIL {
            let left = self.tree.left(node);
            let left_count = self.store.aggregated_counts[left as usize];
            if left_count <= sum {
                floor = node;
                sum -= left_count + self.count(node);
                node = self.tree.right(node);
            } else {
                node = left;
            }
        }
        floor
    }

    /// Total weight of centroids strictly before `node` in mean order.
    pub fn head_sum(&self, node: u32) -> i64 {
        let left = self.tree.left(node);
        let mut sum = self.store.aggregated_counts[left as usize];
        let mut n = node;
        let mut p = self.tree.parent(node);
        while p != NIL {
            if n == self.tree.right(p) {
                let pl = self.tree.left(p);
                sum += self.count(p) + self.store.aggregated_counts[pl as usize];
            }
            n = p;
            p = self.tree.parent(p);
        }
        sum
    }

    /// In-order node handles.
    pub fn iter(&self) -> CentroidTreeIter<'_> {
        CentroidTreeIter {
            tree: self,
            node: self.first(),
        }
    }

    /// Verify tree balance and the weight aggregates. Test hook.
    #[cfg(test)]
    pub fn check(&self) {
        self.tree.check_balance(self.tree.root());
        self.check_aggregates(self.tree.root());
    }

    #[cfg(test)]
    fn check_aggregates(&self, node: u32) {
        if node == NIL {
            assert_eq!(self.store.aggregated_counts[node as usize], 0);
            return;
        }
        let left = self.tree.left(node);
        let right = self.tree.right(node);
        assert_eq!(
            self.store.aggregated_counts[node as usize],
            self.count(node)
                + self.store.aggregated_counts[left as usize]
                + self.store.aggregated_counts[right as usize]
        );
        self.check_aggregates(left);
        self.check_aggregates(right);
    }
}

pub struct CentroidTreeIter<'a> {
    tree: &'a CentroidTree,
    node: u32,
}

impl Iterator for CentroidTreeIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.node == NIL {
            return None;
        }
        let node = self.node;
        self.node = self.tree.next(node);
        Some(node)
    }
}
