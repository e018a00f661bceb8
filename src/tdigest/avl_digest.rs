// src/tdigest/avl_digest.rs
//
//! Clustering digest over a balanced tree of centroids.
//!
//! Semantics
//! - Each sample lands in the nearest centroid that still has room under the
//!   scale-function weight cap at its quantile position; ties are broken by
//!   reservoir sampling so repeated values spread over all candidates.
//! - When no candidate has room, the sample opens a new centroid. Once the
//!   tree grows past `20 x compression` nodes it is compressed by merging
//!   neighboring centroids in mean order, which re-merges clusters that
//!   sequential input kept apart.
//!
//! Guarantees
//! - `quantile(0)`/`quantile(1)` return the exact min/max that were added.
//! - Centroid means are always true weighted averages of absorbed samples.
//! - All randomness comes from a seeded generator, so runs are reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::centroid::Centroid;
use super::centroid_tree::CentroidTree;
use super::scale::ScaleFunction;
use super::tree::NIL;
use super::weighted_average;
use crate::error::{TdError, TdResult};

pub struct AvlTreeDigest {
    compression: f64,
    scale: ScaleFunction,
    summary: CentroidTree,
    count: i64,
    min: f64,
    max: f64,
    gen: StdRng,
}

impl AvlTreeDigest {
    /// A digest with quantile errors almost always under `3 / compression`,
    /// tracking about `5 x compression` centroids.
    pub fn new(compression: f64) -> Self {
        Self::with_seed(compression, 0)
    }

    pub fn with_seed(compression: f64, seed: u64) -> Self {
        AvlTreeDigest {
            compression,
            scale: ScaleFunction::default(),
            summary: CentroidTree::new(false),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            gen: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_scale_function(&mut self, scale: ScaleFunction) {
        self.scale = scale;
    }

    pub fn scale_function(&self) -> ScaleFunction {
        self.scale
    }

    /// Keep every raw sample attached to its centroid. Only callable on an
    /// empty digest.
    pub fn record_all_data(&mut self) {
        assert!(
            self.summary.size() == 0,
            "can only record data on an empty digest"
        );
        self.summary = CentroidTree::new(true);
    }

    pub fn is_recording(&self) -> bool {
        self.summary.records_data()
    }

    pub fn add(&mut self, x: f64) -> TdResult<()> {
        self.add_weighted(x, 1)
    }

    pub fn add_weighted(&mut self, x: f64, w: i64) -> TdResult<()> {
        self.add_with_data(x, w, None)
    }

    pub(crate) fn add_with_data(
        &mut self,
        x: f64,
        w: i64,
        data: Option<Vec<f64>>,
    ) -> TdResult<()> {
        if x.is_nan() {
            return Err(TdError::NanInput {
                context: "sample value",
            });
        }
        if w < 1 {
            return Err(TdError::NonPositiveWeight);
        }
        self.add_unchecked(x, w, data);
        Ok(())
    }

    fn add_unchecked(&mut self, x: f64, w: i64, data: Option<Vec<f64>>) {
        let data = if self.summary.records_data() && data.is_none() {
            Some(vec![x])
        } else {
            data
        };
        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }

        let mut start = self.summary.floor(x);
        if start == NIL {
            start = self.summary.first();
        }

        if start == NIL {
            debug_assert!(self.summary.size() == 0);
            self.summary.add(x, w, data);
            self.count = w;
            return;
        }

        // walk outward from the floor until the distance starts growing
        let mut min_distance = f64::MAX;
        let mut last_neighbor = NIL;
        let mut neighbor = start;
        while neighbor != NIL {
            let z = (self.summary.mean(neighbor) - x).abs();
            if z < min_distance {
                start = neighbor;
                min_distance = z;
            } else if z > min_distance {
                last_neighbor = neighbor;
                break;
            }
            neighbor = self.summary.next(neighbor);
        }

        // sample uniformly from the equally-near centroids that have room;
        // this keeps heavy repetition from always landing on the same one
        let total = self.count as f64;
        let mut closest = NIL;
        let mut n = 0.0;
        let mut neighbor = start;
        while neighbor != last_neighbor {
            debug_assert!(min_distance == (self.summary.mean(neighbor) - x).abs());
            let q0 = self.summary.head_sum(neighbor) as f64 / total;
            let q1 = q0 + self.summary.count(neighbor) as f64 / total;
            let cap = self
                .scale
                .max(q0, self.compression, total)
                .min(self.scale.max(q1, self.compression, total));
            if (self.summary.count(neighbor) + w) as f64 <= total * cap {
                n += 1.0;
                if self.gen.random::<f64>() < 1.0 / n {
                    closest = neighbor;
                }
            }
            neighbor = self.summary.next(neighbor);
        }

        if closest == NIL {
            self.summary.add(x, w, data);
        } else {
            let mean = self.summary.mean(closest);
            let count = self.summary.count(closest);
            let mut d = self.summary.take_data(closest);
            if let Some(d) = &mut d {
                if w == 1 {
                    d.push(x);
                } else if let Some(extra) = data {
                    d.extend(extra);
                }
            }
            let mean = weighted_average(mean, count as f64, x, w as f64);
            self.summary.update(closest, mean, count + w, d);
        }
        self.count += w;

        if self.summary.size() as f64 > 20.0 * self.compression {
            // may happen with sequential input
            self.compress();
        }
    }

    /// Fold another digest into this one. The other digest's centroids are
    /// inserted in random order so the result does not depend on its internal
    /// layout.
    pub fn merge(&mut self, other: &AvlTreeDigest) -> TdResult<()> {
        let mut centroids: Vec<u32> = other.summary.iter().collect();
        let len = centroids.len();
        for i in (1..len).rev() {
            let j = self.gen.random_range(0..=i);
            centroids.swap(i, j);
        }
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        for node in centroids {
            let data = if self.summary.records_data() {
                other.summary.data(node).map(|d| d.to_vec())
            } else {
                None
            };
            self.add_with_data(other.summary.mean(node), other.summary.count(node), data)?;
        }
        Ok(())
    }

    /// Merge runs of neighboring centroids whose combined weight stays under
    /// the scale-function cap at their quantile position. Works in mean
    /// order, so piles of repeated values are folded together rather than
    /// scattered.
    pub fn compress(&mut self) {
        if self.summary.size() <= 1 {
            return;
        }
        crate::ttrace!("compressing {} centroids", self.summary.size());
        let total = self.count as f64;

        let mut n0 = 0.0;
        let mut k0 = total * self.scale.max(n0 / total, self.compression, total);
        let mut node = self.summary.first();
        let mut w0 = self.summary.count(node);
        let mut n1 = n0 + w0 as f64;

        let mut w1 = 0i64;
        while node != NIL {
            let mut after = self.summary.next(node);
            while after != NIL {
                w1 = self.summary.count(after);
                let k1 =
                    total * self.scale.max((n1 + w1 as f64) / total, self.compression, total);
                if (w0 + w1) as f64 > k0.min(k1) {
                    break;
                }
                let mean = weighted_average(
                    self.summary.mean(node),
                    w0 as f64,
                    self.summary.mean(after),
                    w1 as f64,
                );
                let mut d = self.summary.take_data(node);
                if let (Some(d), Some(extra)) = (&mut d, self.summary.take_data(after)) {
                    d.extend(extra);
                }
                // drop the absorbed neighbor first; the merged mean cannot
                // pass whatever follows it, so the write stays in place
                let tmp = self.summary.next(after);
                self.summary.remove(after);
                after = tmp;
                self.summary.update_in_place(node, mean, w0 + w1, d);
                n1 += w1 as f64;
                w0 += w1;
            }
            node = after;
            if node != NIL {
                n0 = n1;
                k0 = total * self.scale.max(n0 / total, self.compression, total);
                w0 = w1;
                n1 = n0 + w0 as f64;
            }
        }
    }

    /// Number of samples added so far.
    pub fn size(&self) -> i64 {
        self.count
    }

    pub fn centroid_count(&self) -> usize {
        self.summary.size()
    }

    pub fn compression(&self) -> f64 {
        self.compression
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Centroids in mean order.
    pub fn centroids(&self) -> Vec<Centroid> {
        self.summary
            .iter()
            .enumerate()
            .map(|(i, node)| {
                Centroid::with_data(
                    self.summary.mean(node),
                    self.summary.count(node),
                    i as i32,
                    self.summary.data(node).map(|d| d.to_vec()),
                )
            })
            .collect()
    }

    pub(crate) fn summary(&self) -> &CentroidTree {
        &self.summary
    }

    pub(crate) fn set_min_max(&mut self, min: f64, max: f64) {
        self.min = min;
        self.max = max;
    }

    /// Fraction of samples at or below `x`.
    pub fn cdf(&self, x: f64) -> f64 {
        let values = &self.summary;
        if values.size() == 0 {
            return f64::NAN;
        }
        if values.size() == 1 {
            let m = values.mean(values.first());
            return if x < m {
                0.0
            } else if x > m {
                1.0
            } else {
                0.5
            };
        }
        let n = self.count as f64;
        if x < self.min {
            return 0.0;
        }
        if x == self.min {
            return 0.5 / n;
        }
        if x > self.max {
            return 1.0;
        }
        if x == self.max {
            return (n - 0.5) / n;
        }

        let first = values.first();
        let first_mean = values.mean(first);
        if x > self.min && x < first_mean {
            return self.interpolate_tail(x, first, first_mean, self.min);
        }
        let last = values.last();
        let last_mean = values.mean(last);
        if x < self.max && x > last_mean {
            return 1.0 - self.interpolate_tail(x, last, last_mean, self.max);
        }
        debug_assert!(values.size() >= 2);
        debug_assert!(x >= first_mean && x <= last_mean);

        // a scans the centroids, b is the look-ahead
        let mut a_mean = values.mean(first);
        let mut a_weight = values.count(first) as f64;

        if x == a_mean {
            return a_weight / 2.0 / n;
        }
        debug_assert!(x > a_mean);

        let mut b = values.next(first);
        let mut b_mean = values.mean(b);
        let mut b_weight = values.count(b) as f64;
        debug_assert!(b_mean >= a_mean);

        let mut weight_so_far = 0.0;
        while b_weight > 0.0 {
            debug_assert!(x > a_mean);
            if x == b_mean {
                debug_assert!(b_mean > a_mean);
                weight_so_far += a_weight;
                // gather every centroid sitting exactly at x
                let mut next = values.next(b);
                while next != NIL {
                    if x == values.mean(next) {
                        b_weight += values.count(next) as f64;
                        next = values.next(next);
                    } else {
                        break;
                    }
                }
                return (weight_so_far + a_weight + b_weight / 2.0) / n;
            }

            if x < b_mean {
                // strictly between a and b; singletons do not interpolate
                debug_assert!(a_mean < b_mean);
                if a_weight == 1.0 {
                    if b_weight == 1.0 {
                        return (weight_so_far + 1.0) / n;
                    }
                    let partial = (x - a_mean) / (b_mean - a_mean) * b_weight / 2.0;
                    return (weight_so_far + 1.0 + partial) / n;
                } else if b_weight == 1.0 {
                    let partial = (x - a_mean) / (b_mean - a_mean) * a_weight / 2.0;
                    return (weight_so_far + a_weight / 2.0 + partial) / n;
                } else {
                    let partial = (x - a_mean) / (b_mean - a_mean) * (a_weight + b_weight) / 2.0;
                    return (weight_so_far + a_weight / 2.0 + partial) / n;
                }
            }
            weight_so_far += a_weight;
            debug_assert!(x > b_mean);

            let next = values.next(b);
            if next != NIL {
                a_mean = b_mean;
                a_weight = b_weight;
                b = next;
                b_mean = values.mean(b);
                b_weight = values.count(b) as f64;
                debug_assert!(b_mean >= a_mean);
            } else {
                b_weight = 0.0;
            }
        }
        unreachable!("cdf scan ran past the last centroid");
    }

    // Interpolate between an extreme value (min or max) and the mean of the
    // centroid that holds it.
    fn interpolate_tail(&self, x: f64, node: u32, mean: f64, extreme: f64) -> f64 {
        let n = self.count as f64;
        let count = self.summary.count(node);
        debug_assert!(count > 1);
        if count == 2 {
            // the other sample must be on the other side of the mean
            1.0 / n
        } else {
            let weight = count as f64 / 2.0 - 1.0;
            let partial = (extreme - x) / (extreme - mean) * weight;
            (partial + 1.0) / n
        }
    }

    /// Smallest value `x` such that about a `q` fraction of samples are at or
    /// below `x`.
    pub fn quantile(&self, q: f64) -> TdResult<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(TdError::QuantileOutOfRange);
        }
        let values = &self.summary;
        if values.size() == 0 {
            return Ok(f64::NAN);
        }
        if values.size() == 1 {
            return Ok(values.mean(values.first()));
        }

        // the offset we would look up if samples were a sorted array
        let index = q * self.count as f64;

        // min and max are kept as exact singletons
        if index < 1.0 {
            return Ok(self.min);
        }
        if index >= (self.count - 1) as f64 {
            return Ok(self.max);
        }

        let mut current = values.first();
        let mut current_weight = values.count(current);

        if current_weight == 2 && index <= 2.0 {
            // first node is a doublet with one sample at min, so the other
            // sample's position follows from the mean
            return Ok(2.0 * values.mean(current) - self.min);
        }
        let last = values.last();
        if values.count(last) == 2 && index > (self.count - 2) as f64 {
            return Ok(2.0 * values.mean(last) - self.max);
        }

        // total mass to the left of the current node's center
        let mut weight_so_far = current_weight as f64 / 2.0;

        if index < weight_so_far {
            // interpolate between min and the first mean, excluding the
            // sample that sits exactly at min
            return Ok(weighted_average(
                self.min,
                weight_so_far - index,
                values.mean(current),
                index - 1.0,
            ));
        }

        for _ in 0..values.size() - 1 {
            let next = values.next(current);
            let next_weight = values.count(next);
            // mass between the two centers
            let dw = (current_weight + next_weight) as f64 / 2.0;
            if index < weight_so_far + dw {
                // bracketed; singletons shrink the interpolation weights
                let mut left_exclusion = 0.0;
                let mut right_exclusion = 0.0;
                if current_weight == 1 {
                    if index < weight_so_far + 0.5 {
                        return Ok(values.mean(current));
                    }
                    left_exclusion = 0.5;
                }
                if next_weight == 1 {
                    if index >= weight_so_far + dw - 0.5 {
                        return Ok(values.mean(next));
                    }
                    right_exclusion = 0.5;
                }
                debug_assert!(left_exclusion + right_exclusion < 1.0);
                debug_assert!(dw > 1.0);
                let w1 = index - weight_so_far - left_exclusion;
                let w2 = weight_so_far + dw - index - right_exclusion;
                return Ok(weighted_average(
                    values.mean(current),
                    w2,
                    values.mean(next),
                    w1,
                ));
            }
            weight_so_far += dw;
            current = next;
            current_weight = next_weight;
        }

        // right of the last center; the singleton case was handled above
        debug_assert!(current_weight > 1);
        let w1 = index - weight_so_far;
        let w2 = self.count as f64 - 1.0 - index;
        Ok(weighted_average(values.mean(current), w2, self.max, w1))
    }

    /// Upper bound on the verbose serialized size.
    pub fn byte_size(&mut self) -> usize {
        self.compress();
        32 + self.summary.size() * 12
    }
}
