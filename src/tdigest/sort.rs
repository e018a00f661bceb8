// src/tdigest/sort.rs
//
// Quicksort variants tuned for the merge path: three-way partitioning keeps
// the cost linear on duplicate-heavy input, and a bounded insertion-sort pass
// finishes segments the recursion left behind.

/// Segments at or below this size are left for the insertion-sort pass.
const LIMIT: usize = 8;

/// Sort `order[..n]` so that `values[order[i]]` is ascending as `i` goes
/// `0..n`. Ties are broken by the original index, making the sort stable.
pub fn sort_index(order: &mut [usize], values: &[f64], n: usize) {
    debug_assert!(order.len() >= n && values.len() >= n);
    for (i, slot) in order.iter_mut().take(n).enumerate() {
        *slot = i;
    }
    quick_sort_index(order, values, 0, n);
    insertion_sort_index(order, values, 0, n);
}

/// Sort `key` in place, rearranging `aux` the same way so the pairing between
/// the arrays survives.
pub fn sort_parallel(key: &mut [f64], aux: &mut [f64]) {
    debug_assert_eq!(key.len(), aux.len());
    let n = key.len();
    quick_sort_parallel(key, aux, 0, n);
    insertion_sort_parallel(key, aux, 0, n);
}

// (value, original index) ordering used by the stable index sort
#[inline]
fn index_less(values: &[f64], a: usize, b: usize) -> bool {
    values[a] < values[b] || (values[a] == values[b] && a < b)
}

fn quick_sort_index(order: &mut [usize], values: &[f64], mut start: usize, mut end: usize) {
    // the loop is tail recursion on the larger partition
    while end - start > LIMIT {
        let a = start;
        let b = (start + end) / 2;
        let c = end - 1;
        // median of three on the (value, index) key
        let pivot_index = {
            let (oa, ob, oc) = (order[a], order[b], order[c]);
            if index_less(values, oa, ob) {
                if index_less(values, ob, oc) {
                    b
                } else if index_less(values, oa, oc) {
                    c
                } else {
                    a
                }
            } else if index_less(values, oa, oc) {
                a
            } else if index_less(values, ob, oc) {
                c
            } else {
                b
            }
        };
        let pv = order[pivot_index];
        let pivot_value = values[pv];

        order.swap(start, pivot_index);

        // three-way partition: [start..low) == pivot, [low..i) < pivot,
        // [high..end) > pivot
        let mut low = start + 1;
        let mut high = end;
        let mut i = low;
        while i < high {
            let oi = order[i];
            let vi = values[oi];
            if vi == pivot_value && oi == pv {
                if low != i {
                    order.swap(low, i);
                } else {
                    i += 1;
                }
                low += 1;
            } else if vi > pivot_value || (vi == pivot_value && oi > pv) {
                high -= 1;
                order.swap(i, high);
            } else {
                i += 1;
            }
        }

        // swap the run of pivots into the middle
        let mut from = start;
        let mut to = high - 1;
        while from < low && to >= low {
            order.swap(from, to);
            from += 1;
            to -= 1;
        }
        low = if from == low { to + 1 } else { from };

        if low - start < end - high {
            quick_sort_index(order, values, start, low);
            start = high;
        } else {
            quick_sort_index(order, values, high, end);
            end = low;
        }
    }
}

// After quicksort no element is more than LIMIT slots from home, so the
// backward scan is bounded.
fn insertion_sort_index(order: &mut [usize], values: &[f64], start: usize, n: usize) {
    for i in start + 1..n {
        let t = order[i];
        let v = values[t];
        let m = if i > start + LIMIT { i - LIMIT } else { start };
        let mut j = i;
        while j > m {
            let prev = order[j - 1];
            if values[prev] < v || (values[prev] == v && prev <= t) {
                break;
            }
            j -= 1;
        }
        if j < i {
            order.copy_within(j..i, j + 1);
            order[j] = t;
        }
    }
}

fn quick_sort_parallel(key: &mut [f64], aux: &mut [f64], mut start: usize, mut end: usize) {
    while end - start > LIMIT {
        let a = start;
        let b = (start + end) / 2;
        let c = end - 1;
        let (va, vb, vc) = (key[a], key[b], key[c]);
        let pivot_index = if va > vb {
            if vc > va {
                a
            } else if vc < vb {
                b
            } else {
                c
            }
        } else if vc > vb {
            b
        } else if vc < va {
            a
        } else {
            c
        };
        let pivot_value = key[pivot_index];

        key.swap(start, pivot_index);
        aux.swap(start, pivot_index);

        let mut low = start + 1;
        let mut high = end;
        let mut i = low;
        while i < high {
            let vi = key[i];
            if vi == pivot_value {
                if low != i {
                    key.swap(low, i);
                    aux.swap(low, i);
                } else {
                    i += 1;
                }
                low += 1;
            } else if vi > pivot_value {
                high -= 1;
                key.swap(i, high);
                aux.swap(i, high);
            } else {
                i += 1;
            }
        }

        let mut from = start;
        let mut to = high - 1;
        while from < low && to >= low {
            key.swap(from, to);
            aux.swap(from, to);
            from += 1;
            to -= 1;
        }
        low = if from == low { to + 1 } else { from };

        if low - start < end - high {
            quick_sort_parallel(key, aux, start, low);
            start = high;
        } else {
            quick_sort_parallel(key, aux, high, end);
            end = low;
        }
    }
}

fn insertion_sort_parallel(key: &mut [f64], aux: &mut [f64], start: usize, end: usize) {
    for i in start + 1..end {
        let v = key[i];
        let w = aux[i];
        let m = if i > start + LIMIT { i - LIMIT } else { start };
        let mut j = i;
        while j > m && key[j - 1] > v {
            j -= 1;
        }
        if j < i {
            key.copy_within(j..i, j + 1);
            key[j] = v;
            aux.copy_within(j..i, j + 1);
            aux[j] = w;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_values(n: usize, distinct: u32, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| rng.random_range(0..distinct) as f64)
            .collect()
    }

    #[test]
    fn index_sort_matches_std_sort() {
        for &(n, distinct) in &[(0usize, 1u32), (1, 1), (10, 3), (1000, 5), (1000, 1000)] {
            let values = random_values(n, distinct, 42);
            let mut order = vec![0usize; n];
            sort_index(&mut order, &values, n);

            let mut expected: Vec<usize> = (0..n).collect();
            expected.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
            assert_eq!(order, expected, "n={} distinct={}", n, distinct);
        }
    }

    #[test]
    fn index_sort_is_stable_on_duplicates() {
        let values = vec![5.0; 500];
        let mut order = vec![0usize; 500];
        sort_index(&mut order, &values, 500);
        let expected: Vec<usize> = (0..500).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn parallel_sort_keeps_pairs_aligned() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 2000;
        let mut key: Vec<f64> = (0..n).map(|_| rng.random_range(0..40) as f64).collect();
        // aux encodes the original key so alignment is checkable afterwards
        let mut aux: Vec<f64> = key.iter().map(|k| k * 10.0 + 1.0).collect();

        sort_parallel(&mut key, &mut aux);

        for i in 1..n {
            assert!(key[i - 1] <= key[i], "keys out of order at {}", i);
        }
        for i in 0..n {
            assert_eq!(aux[i], key[i] * 10.0 + 1.0, "pair broken at {}", i);
        }
    }

    #[test]
    fn already_sorted_and_reversed_inputs() {
        let n = 300;
        let sorted: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut order = vec![0usize; n];
        sort_index(&mut order, &sorted, n);
        assert_eq!(order, (0..n).collect::<Vec<_>>());

        let reversed: Vec<f64> = (0..n).rev().map(|i| i as f64).collect();
        sort_index(&mut order, &reversed, n);
        assert_eq!(order, (0..n).rev().collect::<Vec<_>>());
    }
}
