// src/tdigest/tree.rs
//
// An AVL tree stored in parallel arrays and addressed by integer node
// handles. The tree only manages structure (links, depths, balance); node
// payloads live in a NodeStore that the caller threads through each mutating
// call. Handle 0 is the NIL sentinel, which lets child lookups on NIL work
// without a branch.

use std::cmp::Ordering;

pub const NIL: u32 = 0;

/// Payload storage for tree nodes. The pending item is handed to the hooks
/// explicitly; the store never sees tree structure beyond the handles it is
/// given.
pub trait NodeStore {
    type Item;

    /// Grow payload arrays to `new_capacity` entries, in lock step with the
    /// tree's own arrays.
    fn resize(&mut self, new_capacity: usize);

    /// Order the pending item against the payload at `node`.
    fn compare(&self, item: &Self::Item, node: u32) -> Ordering;

    /// Write the pending item into a fresh `node`.
    fn copy(&mut self, item: Self::Item, node: u32);

    /// Fold the pending item into an existing `node` (only reached when
    /// `compare` can return `Equal`).
    fn merge(&mut self, item: Self::Item, node: u32);

    /// Recompute the aggregate at `node` from its children.
    fn fix_aggregate(&mut self, node: u32, left: u32, right: u32);
}

pub struct IntAvlTree {
    root: u32,
    parent: Vec<u32>,
    left: Vec<u32>,
    right: Vec<u32>,
    depth: Vec<u8>,
    // free-list node allocator; handle 0 is never allocated
    next_node: u32,
    released: Vec<u32>,
}

/// Grow a capacity by 1/8.
pub fn oversize(size: usize) -> usize {
    size + (size >> 3)
}

impl IntAvlTree {
    pub fn new<S: NodeStore>(store: &mut S, initial_capacity: usize) -> Self {
        store.resize(initial_capacity);
        IntAvlTree {
            root: NIL,
            parent: vec![NIL; initial_capacity],
            left: vec![NIL; initial_capacity],
            right: vec![NIL; initial_capacity],
            depth: vec![0; initial_capacity],
            next_node: NIL + 1,
            released: Vec::new(),
        }
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn capacity(&self) -> usize {
        self.parent.len()
    }

    /// Number of live nodes.
    pub fn size(&self) -> usize {
        (self.next_node as usize) - self.released.len() - 1
    }

    pub fn parent(&self, node: u32) -> u32 {
        self.parent[node as usize]
    }

    pub fn left(&self, node: u32) -> u32 {
        self.left[node as usize]
    }

    pub fn right(&self, node: u32) -> u32 {
        self.right[node as usize]
    }

    pub fn depth(&self, node: u32) -> u32 {
        self.depth[node as usize] as u32
    }

    /// Least node under `node`.
    pub fn first(&self, node: u32) -> u32 {
        let mut node = node;
        if node == NIL {
            return NIL;
        }
        loop {
            let left = self.left(node);
            if left == NIL {
                return node;
            }
            node = left;
        }
    }

    /// Greatest node under `node`.
    pub fn last(&self, node: u32) -> u32 {
        let mut node = node;
        loop {
            let right = self.right(node);
            if right == NIL {
                return node;
            }
            node = right;
        }
    }

    /// In-order successor, or NIL.
    pub fn next(&self, node: u32) -> u32 {
        let right = self.right(node);
        if right != NIL {
            return self.first(right);
        }
        let mut node = node;
        let mut parent = self.parent(node);
        while parent != NIL && node == self.right(parent) {
            node = parent;
            parent = self.parent(parent);
        }
        parent
    }

    /// In-order predecessor, or NIL.
    pub fn prev(&self, node: u32) -> u32 {
        let left = self.left(node);
        if left != NIL {
            return self.last(left);
        }
        let mut node = node;
        let mut parent = self.parent(node);
        while parent != NIL && node == self.left(parent) {
            node = parent;
            parent = self.parent(parent);
        }
        parent
    }

    /// Add `item` to the tree. Returns true if a new node was created, false
    /// if the item was merged into an existing node.
    pub fn add<S: NodeStore>(&mut self, store: &mut S, item: S::Item) -> bool {
        if self.root == NIL {
            let node = self.new_node(store);
            self.root = node;
            store.copy(item, node);
            self.fix_aggregates(store, node);
            return true;
        }
        debug_assert!(self.parent(self.root) == NIL);
        let mut node = self.root;
        let (parent, cmp) = loop {
            let cmp = store.compare(&item, node);
            let child = match cmp {
                Ordering::Less => self.left(node),
                Ordering::Greater => self.right(node),
                Ordering::Equal => {
                    store.merge(item, node);
                    // aggregates along the path are stale after a merge
                    let mut n = node;
                    while n != NIL {
                        self.fix_aggregates(store, n);
                        n = self.parent(n);
                    }
                    return false;
                }
            };
            if child == NIL {
                break (node, cmp);
            }
            node = child;
        };

        let node = self.new_node(store);
        store.copy(item, node);
        self.set_parent(node, parent);
        match cmp {
            Ordering::Less => self.set_left(parent, node),
            _ => self.set_right(parent, node),
        }
        self.rebalance(store, node);
        true
    }

    /// Find the node holding a payload equal to `item`, or NIL.
    pub fn find<S: NodeStore>(&self, store: &S, item: &S::Item) -> u32 {
        let mut node = self.root;
        while node != NIL {
            node = match store.compare(item, node) {
                Ordering::Less => self.left(node),
                Ordering::Greater => self.right(node),
                Ordering::Equal => return node,
            };
        }
        NIL
    }

    /// Replace the payload at `node` with `item`. Done in place when the new
    /// payload still sorts between the node's neighbors, otherwise the node
    /// is removed and re-added.
    pub fn update<S: NodeStore>(&mut self, store: &mut S, node: u32, item: S::Item) {
        let prev = self.prev(node);
        let next = self.next(node);
        let in_place = (prev == NIL || store.compare(&item, prev) == Ordering::Greater)
            && (next == NIL || store.compare(&item, next) == Ordering::Less);
        if in_place {
            self.update_in_place(store, node, item);
        } else {
            self.remove(store, node);
            self.add(store, item);
        }
    }

    /// Replace the payload at `node` without moving it. The caller must know
    /// the new payload keeps the node's position in the ordering; `update`
    /// checks this, callers that have just removed a neighbor may not need to.
    pub fn update_in_place<S: NodeStore>(&mut self, store: &mut S, node: u32, item: S::Item) {
        store.copy(item, node);
        let mut n = node;
        while n != NIL {
            self.fix_aggregates(store, n);
            n = self.parent(n);
        }
    }

    /// Remove `node` from the tree. Removing NIL is a caller bug.
    pub fn remove<S: NodeStore>(&mut self, store: &mut S, node: u32) {
        assert!(node != NIL, "cannot remove the NIL sentinel");
        let mut node = node;
        if self.left(node) != NIL && self.right(node) != NIL {
            // interior node: swap structure with the successor, then the
            // node has at most one child
            let next = self.next(node);
            debug_assert!(next != NIL);
            self.swap(node, next);
        }
        debug_assert!(self.left(node) == NIL || self.right(node) == NIL);

        let parent = self.parent(node);
        let mut child = self.left(node);
        if child == NIL {
            child = self.right(node);
        }

        if child == NIL {
            if node == self.root {
                debug_assert!(self.size() == 1);
                self.root = NIL;
            } else if node == self.left(parent) {
                self.set_left(parent, NIL);
            } else {
                debug_assert!(node == self.right(parent));
                self.set_right(parent, NIL);
            }
        } else {
            if node == self.root {
                debug_assert!(self.size() == 2);
                self.root = child;
            } else if node == self.left(parent) {
                self.set_left(parent, child);
            } else {
                debug_assert!(node == self.right(parent));
                self.set_right(parent, child);
            }
            self.set_parent(child, parent);
        }

        self.release(node);
        self.rebalance(store, parent);
    }

    fn new_node<S: NodeStore>(&mut self, store: &mut S) -> u32 {
        let node = match self.released.pop() {
            Some(node) => node,
            None => {
                let node = self.next_node;
                self.next_node += 1;
                node
            }
        };
        if node as usize >= self.capacity() {
            self.resize(store, oversize(node as usize + 1));
        }
        node
    }

    fn resize<S: NodeStore>(&mut self, store: &mut S, new_capacity: usize) {
        self.parent.resize(new_capacity, NIL);
        self.left.resize(new_capacity, NIL);
        self.right.resize(new_capacity, NIL);
        self.depth.resize(new_capacity, 0);
        store.resize(new_capacity);
    }

    fn release(&mut self, node: u32) {
        self.set_left(node, NIL);
        self.set_right(node, NIL);
        self.set_parent(node, NIL);
        self.released.push(node);
    }

    // Exchange the positions of two nodes without touching payloads.
    fn swap(&mut self, node1: u32, node2: u32) {
        let parent1 = self.parent(node1);
        let parent2 = self.parent(node2);
        if parent1 != NIL {
            if node1 == self.left(parent1) {
                self.set_left(parent1, node2);
            } else {
                debug_assert!(node1 == self.right(parent1));
                self.set_right(parent1, node2);
            }
        } else {
            debug_assert!(self.root == node1);
            self.root = node2;
        }
        if parent2 != NIL {
            if node2 == self.left(parent2) {
                self.set_left(parent2, node1);
            } else {
                debug_assert!(node2 == self.right(parent2));
                self.set_right(parent2, node1);
            }
        } else {
            debug_assert!(self.root == node2);
            self.root = node1;
        }
        self.set_parent(node1, parent2);
        self.set_parent(node2, parent1);

        let left1 = self.left(node1);
        let left2 = self.left(node2);
        self.set_left(node1, left2);
        if left2 != NIL {
            self.set_parent(left2, node1);
        }
        self.set_left(node2, left1);
        if left1 != NIL {
            self.set_parent(left1, node2);
        }

        let right1 = self.right(node1);
        let right2 = self.right(node2);
        self.set_right(node1, right2);
        if right2 != NIL {
            self.set_parent(right2, node1);
        }
        self.set_right(node2, right1);
        if right1 != NIL {
            self.set_parent(right1, node2);
        }

        let depth1 = self.depth[node1 as usize];
        self.depth[node1 as usize] = self.depth[node2 as usize];
        self.depth[node2 as usize] = depth1;
    }

    fn balance_factor(&self, node: u32) -> i32 {
        self.depth(self.left(node)) as i32 - self.depth(self.right(node)) as i32
    }

    fn rebalance<S: NodeStore>(&mut self, store: &mut S, node: u32) {
        let mut n = node;
        while n != NIL {
            let p = self.parent(n);
            self.fix_aggregates(store, n);
            match self.balance_factor(n) {
                -2 => {
                    let right = self.right(n);
                    if self.balance_factor(right) == 1 {
                        self.rotate_right(store, right);
                    }
                    self.rotate_left(store, n);
                }
                2 => {
                    let left = self.left(n);
                    if self.balance_factor(left) == -1 {
                        self.rotate_left(store, left);
                    }
                    self.rotate_right(store, n);
                }
                -1..=1 => {}
                bf => unreachable!("balance factor {} out of range", bf),
            }
            n = p;
        }
    }

    fn fix_aggregates<S: NodeStore>(&mut self, store: &mut S, node: u32) {
        let left = self.left(node);
        let right = self.right(node);
        let depth = 1 + self.depth(left).max(self.depth(right));
        debug_assert!(depth <= u8::MAX as u32);
        self.depth[node as usize] = depth as u8;
        store.fix_aggregate(node, left, right);
    }

    fn rotate_left<S: NodeStore>(&mut self, store: &mut S, n: u32) {
        let r = self.right(n);
        let lr = self.left(r);
        self.set_right(n, lr);
        if lr != NIL {
            self.set_parent(lr, n);
        }
        let p = self.parent(n);
        self.set_parent(r, p);
        if p == NIL {
            self.root = r;
        } else if self.left(p) == n {
            self.set_left(p, r);
        } else {
            debug_assert!(self.right(p) == n);
            self.set_right(p, r);
        }
        self.set_left(r, n);
        self.set_parent(n, r);
        self.fix_aggregates(store, n);
        self.fix_aggregates(store, self.parent(n));
    }

    fn rotate_right<S: NodeStore>(&mut self, store: &mut S, n: u32) {
        let l = self.left(n);
        let rl = self.right(l);
        self.set_left(n, rl);
        if rl != NIL {
            self.set_parent(rl, n);
        }
        let p = self.parent(n);
        self.set_parent(l, p);
        if p == NIL {
            self.root = l;
        } else if self.right(p) == n {
            self.set_right(p, l);
        } else {
            debug_assert!(self.left(p) == n);
            self.set_left(p, l);
        }
        self.set_right(l, n);
        self.set_parent(n, l);
        self.fix_aggregates(store, n);
        self.fix_aggregates(store, self.parent(n));
    }

    fn set_parent(&mut self, node: u32, parent: u32) {
        debug_assert!(node != NIL);
        self.parent[node as usize] = parent;
    }

    fn set_left(&mut self, node: u32, left: u32) {
        debug_assert!(node != NIL);
        self.left[node as usize] = left;
    }

    fn set_right(&mut self, node: u32, right: u32) {
        debug_assert!(node != NIL);
        self.right[node as usize] = right;
    }

    /// Verify depths and the AVL balance property below `node`. Test hook.
    pub fn check_balance(&self, node: u32) {
        if node == NIL {
            assert_eq!(self.depth(node), 0);
        } else {
            assert_eq!(
                self.depth(node),
                1 + self.depth(self.left(node)).max(self.depth(self.right(node)))
            );
            assert!(
                (self.depth(self.left(node)) as i32 - self.depth(self.right(node)) as i32).abs()
                    <= 1
            );
            self.check_balance(self.left(node));
            self.check_balance(self.right(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Minimal store: i64 keys with a subtree node-count aggregate. Equal keys
    // merge by bumping a duplicate counter.
    struct KeyStore {
        keys: Vec<i64>,
        dups: Vec<u32>,
        subtree: Vec<u32>,
    }

    impl KeyStore {
        fn new() -> Self {
            KeyStore {
                keys: Vec::new(),
                dups: Vec::new(),
                subtree: Vec::new(),
            }
        }
    }

    impl NodeStore for KeyStore {
        type Item = i64;

        fn resize(&mut self, new_capacity: usize) {
            self.keys.resize(new_capacity, 0);
            self.dups.resize(new_capacity, 0);
            self.subtree.resize(new_capacity, 0);
        }

        fn compare(&self, item: &i64, node: u32) -> Ordering {
            item.cmp(&self.keys[node as usize])
        }

        fn copy(&mut self, item: i64, node: u32) {
            self.keys[node as usize] = item;
            self.dups[node as usize] = 1;
        }

        fn merge(&mut self, _item: i64, node: u32) {
            self.dups[node as usize] += 1;
        }

        fn fix_aggregate(&mut self, node: u32, left: u32, right: u32) {
            self.subtree[node as usize] =
                1 + self.subtree[left as usize] + self.subtree[right as usize];
        }
    }

    fn in_order(tree: &IntAvlTree, store: &KeyStore) -> Vec<i64> {
        let mut out = Vec::new();
        let mut node = tree.first(tree.root());
        while node != NIL {
            out.push(store.keys[node as usize]);
            node = tree.next(node);
        }
        out
    }

    #[test]
    fn insert_keeps_order_and_balance() {
        let mut store = KeyStore::new();
        let mut tree = IntAvlTree::new(&mut store, 16);
        let mut rng = StdRng::seed_from_u64(1);
        let mut expected = Vec::new();
        for _ in 0..2000 {
            let k: i64 = rng.random_range(0..100_000);
            if tree.add(&mut store, k) {
                expected.push(k);
            }
        }
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(in_order(&tree, &store), expected);
        assert_eq!(tree.size(), expected.len());
        tree.check_balance(tree.root());
    }

    #[test]
    fn sequential_inserts_stay_balanced() {
        let mut store = KeyStore::new();
        let mut tree = IntAvlTree::new(&mut store, 4);
        for k in 0..1000i64 {
            tree.add(&mut store, k);
        }
        tree.check_balance(tree.root());
        // a balanced tree over 1000 nodes is about 10 deep
        assert!(tree.depth(tree.root()) <= 14);
        assert_eq!(tree.subtree_count(&store), 1000);
    }

    impl IntAvlTree {
        fn subtree_count(&self, store: &KeyStore) -> u32 {
            store.subtree[self.root() as usize]
        }
    }

    #[test]
    fn equal_keys_merge_instead_of_duplicating() {
        let mut store = KeyStore::new();
        let mut tree = IntAvlTree::new(&mut store, 16);
        assert!(tree.add(&mut store, 7));
        assert!(!tree.add(&mut store, 7));
        assert_eq!(tree.size(), 1);
        let node = tree.find(&store, &7);
        assert_ne!(node, NIL);
        assert_eq!(store.dups[node as usize], 2);
    }

    #[test]
    fn removal_reuses_handles_and_rebalances() {
        let mut store = KeyStore::new();
        let mut tree = IntAvlTree::new(&mut store, 16);
        let mut rng = StdRng::seed_from_u64(9);
        let mut live: Vec<i64> = Vec::new();
        for i in 0..3000i64 {
            if !live.is_empty() && rng.random_bool(0.3) {
                let pick = live.swap_remove(rng.random_range(0..live.len()));
                let node = tree.find(&store, &pick);
                assert_ne!(node, NIL, "key {} should be present", pick);
                tree.remove(&mut store, node);
            } else {
                // i is unique so add always creates a node
                assert!(tree.add(&mut store, i));
                live.push(i);
            }
        }
        let mut expected = live.clone();
        expected.sort_unstable();
        assert_eq!(in_order(&tree, &store), expected);
        assert_eq!(tree.size(), expected.len());
        tree.check_balance(tree.root());
        assert_eq!(tree.subtree_count(&store) as usize, expected.len());
    }

    #[test]
    #[should_panic(expected = "NIL")]
    fn removing_nil_panics() {
        let mut store = KeyStore::new();
        let mut tree = IntAvlTree::new(&mut store, 16);
        tree.add(&mut store, 1);
        tree.remove(&mut store, NIL);
    }

    #[test]
    fn update_in_place_and_by_move() {
        let mut store = KeyStore::new();
        let mut tree = IntAvlTree::new(&mut store, 16);
        for k in [10i64, 20, 30, 40, 50] {
            tree.add(&mut store, k);
        }
        // 20 -> 25 stays between 10 and 30
        let node = tree.find(&store, &20);
        tree.update(&mut store, node, 25);
        assert_eq!(in_order(&tree, &store), vec![10, 25, 30, 40, 50]);

        // 25 -> 45 has to move past 30 and 40
        let node = tree.find(&store, &25);
        tree.update(&mut store, node, 45);
        assert_eq!(in_order(&tree, &store), vec![10, 30, 40, 45, 50]);
        tree.check_balance(tree.root());
    }
}
