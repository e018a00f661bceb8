// src/tdigest/merging_digest.rs
//
//! Buffered merging digest.
//!
//! Semantics
//! - Samples land in a scratch buffer; when it fills, buffer and retained
//!   centroids are sorted together and folded left-to-right into as few
//!   clusters as the scale function allows at each quantile position.
//! - Merge passes alternate direction to cancel the bias a fixed sweep
//!   direction would build up.
//! - Internally the digest runs at `sqrt(buffer_ratio) x` the requested
//!   compression and only squeezes down to the public setting when results
//!   leave the digest (`compress`, serialization, `centroids`).
//!
//! Guarantees
//! - Quantiles at 0 and 1 are the exact min/max added.
//! - Merging never reorders mass: centroid means stay sorted and the total
//!   weight is conserved exactly (integer-valued weights below 2^53).
//! - No allocation on the add path; all buffers are sized at construction.

use core::fmt;

use super::centroid::Centroid;
use super::scale::ScaleFunction;
use super::sort::sort_index;
use super::weighted_average;
use crate::error::{TdError, TdResult};

pub struct MergingDigest {
    merge_count: i64,
    // how many centroids the user asked for vs. how many we actually keep
    public_compression: f64,
    compression: f64,

    last_used_cell: usize,
    total_weight: f64,
    weight: Vec<f64>,
    mean: Vec<f64>,
    // per-cell sample history, kept only when recording
    data: Option<Vec<Vec<f64>>>,

    unmerged_weight: f64,
    temp_used: usize,
    temp_weight: Vec<f64>,
    temp_mean: Vec<f64>,
    temp_data: Option<Vec<Vec<f64>>>,

    // scratch for sorting; a field to avoid allocation during merges
    order: Vec<usize>,

    min: f64,
    max: f64,
    scale: ScaleFunction,

    use_alternating_sort: bool,
    use_two_level_compression: bool,
    // merge based on explicit weight caps instead of accumulated k-index;
    // cheaper because it skips most scale function evaluations
    use_weight_limit: bool,
}

impl MergingDigest {
    pub fn new(compression: f64) -> Self {
        Self::with_capacity(compression, -1, -1)
    }

    /// Full control over buffer sizing; `-1` picks the default for either
    /// capacity argument.
    pub fn with_capacity(compression: f64, buffer_size: i32, size: i32) -> Self {
        let use_weight_limit = true;
        let use_two_level_compression = true;

        // anything below 10 keeps too few centroids to be useful
        let mut compression = compression;
        if compression < 10.0 {
            compression = 10.0;
        }

        // the weight limit is conservative about sizes and needs extra room
        let mut size_fudge = 0.0;
        if use_weight_limit {
            size_fudge = 10.0;
            if compression < 30.0 {
                size_fudge += 20.0;
            }
        }

        let mut size = (2.0 * compression + size_fudge).max(size as f64) as i32;

        let mut buffer_size = buffer_size;
        if buffer_size == -1 {
            // a big buffer trades memory for merge frequency; 5x is within
            // 10% of the speed of much larger buffers
            buffer_size = 5 * size;
        }
        if buffer_size <= 2 * size {
            buffer_size = 2 * size;
        }

        // ratio of spare buffer to final size, accounting for the fact that
        // live centroids are copied into the incoming space on every merge
        let mut scale = (buffer_size / size - 1).max(1) as f64;
        if !use_two_level_compression {
            scale = 1.0;
        }

        let public_compression = compression;
        let compression = scale.sqrt() * public_compression;

        // the higher working compression may need bigger buffers
        if (size as f64) < compression + size_fudge {
            size = (compression + size_fudge).ceil() as i32;
        }
        if buffer_size <= 2 * size {
            buffer_size = 2 * size;
        }

        let size = size as usize;
        let buffer_size = buffer_size as usize;

        MergingDigest {
            merge_count: 0,
            public_compression,
            compression,
            last_used_cell: 0,
            total_weight: 0.0,
            weight: vec![0.0; size],
            mean: vec![0.0; size],
            data: None,
            unmerged_weight: 0.0,
            temp_used: 0,
            temp_weight: vec![0.0; buffer_size],
            temp_mean: vec![0.0; buffer_size],
            temp_data: None,
            order: vec![0; buffer_size],
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            scale: ScaleFunction::default(),
            use_alternating_sort: true,
            use_two_level_compression,
            use_weight_limit,
        }
    }

    /// Only normalized scale functions keep the merge math consistent with
    /// the two-level compression.
    pub fn set_scale_function(&mut self, scale: ScaleFunction) {
        assert!(
            scale.is_normalized(),
            "the merging digest requires a normalized scale function"
        );
        self.scale = scale;
    }

    pub fn scale_function(&self) -> ScaleFunction {
        self.scale
    }

    pub fn set_use_alternating_sort(&mut self, v: bool) {
        self.use_alternating_sort = v;
    }

    pub fn set_use_weight_limit(&mut self, v: bool) {
        self.use_weight_limit = v;
    }

    /// Keep every raw sample attached to its cell. Only callable on an empty
    /// digest.
    pub fn record_all_data(&mut self) {
        assert!(self.size() == 0, "can only record data on an empty digest");
        self.data = Some(Vec::new());
        self.temp_data = Some(Vec::new());
    }

    pub fn is_recording(&self) -> bool {
        self.data.is_some()
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
        history: Option<Vec<f64>>,
    ) -> TdResult<()> {
        if x.is_nan() {
            return Err(TdError::NanInput {
                context: "sample value",
            });
        }
        if w < 1 {
            return Err(TdError::NonPositiveWeight);
        }
        if self.temp_used >= self.temp_weight.len() - self.last_used_cell - 1 {
            self.merge_new_values(false, self.compression);
        }
        let slot = self.temp_used;
        self.temp_used += 1;
        self.temp_weight[slot] = w as f64;
        self.temp_mean[slot] = x;
        self.unmerged_weight += w as f64;
        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }
        if self.data.is_some() {
            let temp_data = self.temp_data.get_or_insert_with(Vec::new);
            while temp_data.len() <= slot {
                temp_data.push(Vec::new());
            }
            match history {
                Some(h) => temp_data[slot].extend(h),
                None => temp_data[slot].push(x),
            }
        }
        Ok(())
    }

    /// Fold other digests into this one through the regular merge kernel.
    pub fn merge_digests(&mut self, others: &mut [MergingDigest]) {
        if others.is_empty() {
            return;
        }
        let mut count = 0;
        for other in others.iter_mut() {
            other.compress();
            count += other.last_used_cell;
        }

        let mut m = Vec::with_capacity(count + self.last_used_cell);
        let mut w = Vec::with_capacity(count + self.last_used_cell);
        let mut incoming_data = self.data.is_some().then(Vec::new);
        let mut total = 0.0;
        for other in others.iter() {
            m.extend_from_slice(&other.mean[..other.last_used_cell]);
            w.extend_from_slice(&other.weight[..other.last_used_cell]);
            total += other.total_weight;
            if let Some(incoming_data) = &mut incoming_data {
                for i in 0..other.last_used_cell {
                    let history = match &other.data {
                        Some(d) => d[i].clone(),
                        None => Vec::new(),
                    };
                    incoming_data.push(history);
                }
            }
            if other.min < self.min {
                self.min = other.min;
            }
            if other.max > self.max {
                self.max = other.max;
            }
        }
        if count == 0 {
            return;
        }
        let mut order = Vec::new();
        let compression = self.compression;
        self.merge(
            &mut m,
            &mut w,
            count,
            incoming_data,
            &mut order,
            total,
            false,
            compression,
        );
    }

    fn merge_new_values(&mut self, force: bool, compression: f64) {
        if self.total_weight == 0.0 && self.unmerged_weight == 0.0 {
            return;
        }
        if force || self.unmerged_weight > 0.0 {
            crate::ttrace!(
                "merge pass {} ({} pending, force={})",
                self.merge_count,
                self.temp_used,
                force
            );
            // run in reverse every other pass to avoid left-to-right bias
            let run_backwards = self.use_alternating_sort && self.merge_count % 2 == 1;
            let mut incoming_mean = std::mem::take(&mut self.temp_mean);
            let mut incoming_weight = std::mem::take(&mut self.temp_weight);
            let mut order = std::mem::take(&mut self.order);
            let incoming_data = self.temp_data.take();
            let temp_used = self.temp_used;
            let unmerged = self.unmerged_weight;
            self.merge(
                &mut incoming_mean,
                &mut incoming_weight,
                temp_used,
                incoming_data,
                &mut order,
                unmerged,
                run_backwards,
                compression,
            );
            self.merge_count += 1;
            self.temp_used = 0;
            self.unmerged_weight = 0.0;
            self.temp_mean = incoming_mean;
            self.temp_weight = incoming_weight;
            self.order = order;
            if self.data.is_some() {
                self.temp_data = Some(Vec::new());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn merge(
        &mut self,
        incoming_mean: &mut Vec<f64>,
        incoming_weight: &mut Vec<f64>,
        mut incoming_count: usize,
        incoming_data: Option<Vec<Vec<f64>>>,
        order: &mut Vec<usize>,
        unmerged_weight: f64,
        run_backwards: bool,
        compression: f64,
    ) {
        // retained centroids ride along with the incoming batch
        let needed = incoming_count + self.last_used_cell;
        if incoming_mean.len() < needed {
            incoming_mean.resize(needed, 0.0);
            incoming_weight.resize(needed, 0.0);
        }
        incoming_mean[incoming_count..needed].copy_from_slice(&self.mean[..self.last_used_cell]);
        incoming_weight[incoming_count..needed]
            .copy_from_slice(&self.weight[..self.last_used_cell]);
        incoming_count = needed;

        let mut incoming_data = incoming_data;
        if let Some(incoming_data) = &mut incoming_data {
            let data = self.data.as_mut().expect("recording state out of sync");
            incoming_data.extend(data.drain(..self.last_used_cell));
            data.clear();
        }

        if order.len() < incoming_count {
            order.resize(incoming_count, 0);
        }
        sort_index(order, incoming_mean, incoming_count);
        if run_backwards {
            order[..incoming_count].reverse();
        }

        self.total_weight += unmerged_weight;

        debug_assert!(incoming_count > 0);
        self.last_used_cell = 0;
        self.mean[0] = incoming_mean[order[0]];
        self.weight[0] = incoming_weight[order[0]];
        let mut w_so_far = 0.0;
        if let Some(data) = &mut self.data {
            let incoming = incoming_data.as_mut().expect("recording state out of sync");
            data.push(std::mem::take(&mut incoming[order[0]]));
        }

        let normalizer = self.scale.normalizer(compression, self.total_weight);
        let mut k1 = self.scale.k_norm(0.0, normalizer);
        let mut w_limit = self.total_weight * self.scale.q_norm(k1 + 1.0, normalizer);
        for i in 1..incoming_count {
            let ix = order[i];
            let proposed_weight = self.weight[self.last_used_cell] + incoming_weight[ix];
            let projected_w = w_so_far + proposed_weight;
            let add_this = if self.use_weight_limit {
                let q0 = w_so_far / self.total_weight;
                let q2 = (w_so_far + proposed_weight) / self.total_weight;
                let cap = self
                    .scale
                    .max_norm(q0, normalizer)
                    .min(self.scale.max_norm(q2, normalizer));
                proposed_weight <= self.total_weight * cap
            } else {
                projected_w <= w_limit
            };

            if add_this {
                // next point fits, merge into the open centroid
                let cell = self.last_used_cell;
                self.weight[cell] += incoming_weight[ix];
                self.mean[cell] +=
                    (incoming_mean[ix] - self.mean[cell]) * incoming_weight[ix] / self.weight[cell];
                incoming_weight[ix] = 0.0;
                if let Some(data) = &mut self.data {
                    let incoming = incoming_data.as_mut().expect("recording state out of sync");
                    while data.len() <= cell {
                        data.push(Vec::new());
                    }
                    data[cell].extend(std::mem::take(&mut incoming[ix]));
                }
            } else {
                // didn't fit, open the next output cell
                w_so_far += self.weight[self.last_used_cell];
                if !self.use_weight_limit {
                    k1 = self
                        .scale
                        .k_norm(w_so_far / self.total_weight, normalizer);
                    w_limit = self.total_weight * self.scale.q_norm(k1 + 1.0, normalizer);
                }
                self.last_used_cell += 1;
                self.mean[self.last_used_cell] = incoming_mean[ix];
                self.weight[self.last_used_cell] = incoming_weight[ix];
                incoming_weight[ix] = 0.0;
                if let Some(data) = &mut self.data {
                    let incoming = incoming_data.as_mut().expect("recording state out of sync");
                    debug_assert!(data.len() == self.last_used_cell);
                    data.push(std::mem::take(&mut incoming[ix]));
                }
            }
        }
        // points to the next empty cell from here on
        self.last_used_cell += 1;

        // integer-valued weights make this sum exact
        debug_assert!({
            let sum: f64 = self.weight[..self.last_used_cell].iter().sum();
            sum == self.total_weight
        });

        if run_backwards {
            self.mean[..self.last_used_cell].reverse();
            self.weight[..self.last_used_cell].reverse();
            if let Some(data) = &mut self.data {
                data.reverse();
            }
        }

        if self.total_weight > 0.0 {
            if self.mean[0] < self.min {
                self.min = self.mean[0];
            }
            if self.mean[self.last_used_cell - 1] > self.max {
                self.max = self.mean[self.last_used_cell - 1];
            }
        }
    }

    /// Merge pending inputs and squeeze down to the public compression.
    /// Loses a little precision, so it is best done only when results are
    /// about to leave the digest.
    pub fn compress(&mut self) {
        self.merge_new_values(true, self.public_compression);
    }

    /// Number of samples added so far.
    pub fn size(&self) -> i64 {
        (self.total_weight + self.unmerged_weight) as i64
    }

    /// Fraction of samples at or below `x`.
    pub fn cdf(&mut self, x: f64) -> f64 {
        self.merge_new_values(false, self.compression);

        if self.last_used_cell == 0 {
            return f64::NAN;
        }
        if self.last_used_cell == 1 {
            // one centroid should have max == min
            let width = self.max - self.min;
            return if x < self.min {
                0.0
            } else if x > self.max {
                1.0
            } else if x - self.min <= width {
                // min and max too close together for viable interpolation
                0.5
            } else {
                (x - self.min) / width
            };
        }
        let n = self.last_used_cell;
        if x < self.min {
            return 0.0;
        }
        if x > self.max {
            return 1.0;
        }

        // left tail
        if x < self.mean[0] {
            // mean[0] > min guarantees the division below is sound
            return if self.mean[0] - self.min > 0.0 {
                if x == self.min {
                    // one sample sits exactly at min
                    0.5 / self.total_weight
                } else {
                    (1.0 + (x - self.min) / (self.mean[0] - self.min)
                        * (self.weight[0] / 2.0 - 1.0))
                        / self.total_weight
                }
            } else {
                0.0
            };
        }
        debug_assert!(x >= self.mean[0]);

        // right tail
        if x > self.mean[n - 1] {
            return if self.max - self.mean[n - 1] > 0.0 {
                if x == self.max {
                    1.0 - 0.5 / self.total_weight
                } else {
                    // one sample sits exactly at max
                    let dq = (1.0
                        + (self.max - x) / (self.max - self.mean[n - 1])
                            * (self.weight[n - 1] / 2.0 - 1.0))
                        / self.total_weight;
                    1.0 - dq
                }
            } else {
                1.0
            };
        }

        // at least two centroids here, and mean[0] <= x <= mean[n-1]
        let mut weight_so_far = 0.0;
        let mut it = 0;
        while it < n - 1 {
            if self.mean[it] == x {
                // one or more centroids exactly at x are treated as one
                let mut dw = 0.0;
                while it < n && self.mean[it] == x {
                    dw += self.weight[it];
                    it += 1;
                }
                return (weight_so_far + dw / 2.0) / self.total_weight;
            } else if self.mean[it] <= x && x < self.mean[it + 1] {
                // landed between centroids; watch for equal means
                if self.mean[it + 1] - self.mean[it] > 0.0 {
                    // a singleton's whole weight sits exactly at its mean and
                    // is excluded from the interpolation
                    let mut left_excluded = 0.0;
                    let mut right_excluded = 0.0;
                    if self.weight[it] == 1.0 {
                        if self.weight[it + 1] == 1.0 {
                            // two singletons, no interpolation at all
                            return (weight_so_far + 1.0) / self.total_weight;
                        }
                        left_excluded = 0.5;
                    } else if self.weight[it + 1] == 1.0 {
                        right_excluded = 0.5;
                    }
                    let dw = (self.weight[it] + self.weight[it + 1]) / 2.0;
                    debug_assert!(dw > 1.0);
                    debug_assert!(left_excluded + right_excluded <= 0.5);
                    let left = self.mean[it];
                    let right = self.mean[it + 1];
                    let dw_no_singleton = dw - left_excluded - right_excluded;
                    debug_assert!(dw_no_singleton > dw / 2.0);
                    debug_assert!(right - left > 0.0);
                    let base = weight_so_far + self.weight[it] / 2.0 + left_excluded;
                    return (base + dw_no_singleton * (x - left) / (right - left))
                        / self.total_weight;
                } else {
                    // means too close for safe interpolation
                    let dw = (self.weight[it] + self.weight[it + 1]) / 2.0;
                    return (weight_so_far + dw) / self.total_weight;
                }
            } else {
                weight_so_far += self.weight[it];
            }
            it += 1;
        }
        debug_assert!(x == self.mean[n - 1]);
        1.0 - 0.5 / self.total_weight
    }

    /// Smallest value `x` such that about a `q` fraction of samples are at
    /// or below `x`.
    pub fn quantile(&mut self, q: f64) -> TdResult<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(TdError::QuantileOutOfRange);
        }
        self.merge_new_values(false, self.compression);

        if self.last_used_cell == 0 {
            return Ok(f64::NAN);
        }
        if self.last_used_cell == 1 {
            return Ok(self.mean[0]);
        }
        let n = self.last_used_cell;

        // the offset we would look up if samples were a sorted array
        let index = q * self.total_weight;

        if index < 1.0 {
            return Ok(self.min);
        }

        // a sample sits exactly at min, interpolate with reduced weight
        if self.weight[0] > 1.0 && index < self.weight[0] / 2.0 {
            return Ok(self.min
                + (index - 1.0) / (self.weight[0] / 2.0 - 1.0) * (self.mean[0] - self.min));
        }

        if index > self.total_weight - 1.0 {
            return Ok(self.max);
        }

        // likewise a sample sits exactly at max
        if self.weight[n - 1] > 1.0 && self.total_weight - index <= self.weight[n - 1] / 2.0 {
            return Ok(self.max
                - (self.total_weight - index - 1.0) / (self.weight[n - 1] / 2.0 - 1.0)
                    * (self.max - self.mean[n - 1]));
        }

        // between the extremes, interpolate between centroid centers
        let mut weight_so_far = self.weight[0] / 2.0;
        for i in 0..n - 1 {
            let dw = (self.weight[i] + self.weight[i + 1]) / 2.0;
            if weight_so_far + dw > index {
                // centroids i and i+1 bracket the point; singletons pin the
                // estimate to their mean inside their half-sample radius
                let mut left_unit = 0.0;
                if self.weight[i] == 1.0 {
                    if index - weight_so_far < 0.5 {
                        return Ok(self.mean[i]);
                    }
                    left_unit = 0.5;
                }
                let mut right_unit = 0.0;
                if self.weight[i + 1] == 1.0 {
                    if weight_so_far + dw - index <= 0.5 {
                        return Ok(self.mean[i + 1]);
                    }
                    right_unit = 0.5;
                }
                let z1 = index - weight_so_far - left_unit;
                let z2 = weight_so_far + dw - index - right_unit;
                return Ok(weighted_average(self.mean[i], z2, self.mean[i + 1], z1));
            }
            weight_so_far += dw;
        }
        // the trailing singleton case was handled above
        debug_assert!(self.weight[n - 1] > 1.0);
        debug_assert!(index >= self.total_weight - self.weight[n - 1] / 2.0);

        let z1 = index - self.total_weight - self.weight[n - 1] / 2.0;
        let z2 = self.weight[n - 1] / 2.0 - z1;
        Ok(weighted_average(self.mean[n - 1], z1, self.max, z2))
    }

    pub fn centroid_count(&mut self) -> usize {
        self.merge_new_values(false, self.compression);
        self.last_used_cell
    }

    /// Centroids in mean order, compressed to the public setting first.
    pub fn centroids(&mut self) -> Vec<Centroid> {
        self.compress();
        (0..self.last_used_cell)
            .map(|i| {
                Centroid::with_data(
                    self.mean[i],
                    self.weight[i] as i64,
                    i as i32,
                    self.data.as_ref().map(|d| d[i].clone()),
                )
            })
            .collect()
    }

    pub fn compression(&self) -> f64 {
        self.public_compression
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Size of the verbose serialized form.
    pub fn byte_size(&mut self) -> usize {
        self.compress();
        self.last_used_cell * 16 + 32
    }

    /// Size of the compact serialized form.
    pub fn small_byte_size(&mut self) -> usize {
        self.compress();
        self.last_used_cell * 8 + 30
    }

    pub(crate) fn cells(&self) -> (&[f64], &[f64]) {
        (
            &self.weight[..self.last_used_cell],
            &self.mean[..self.last_used_cell],
        )
    }

    pub(crate) fn mean_capacity(&self) -> usize {
        self.mean.len()
    }

    pub(crate) fn buffer_capacity(&self) -> usize {
        self.temp_mean.len()
    }

    pub(crate) fn set_min_max(&mut self, min: f64, max: f64) {
        self.min = min;
        self.max = max;
    }

    pub(crate) fn restore_cells(&mut self, weights: &[f64], means: &[f64]) -> TdResult<()> {
        debug_assert_eq!(weights.len(), means.len());
        if weights.len() > self.weight.len() {
            return Err(TdError::BadCount {
                what: "more centroids than the announced capacity",
            });
        }
        self.weight[..weights.len()].copy_from_slice(weights);
        self.mean[..means.len()].copy_from_slice(means);
        self.last_used_cell = weights.len();
        self.total_weight = weights.iter().sum();
        Ok(())
    }
}

impl fmt::Display for MergingDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MergingDigest-{:?}-{}-{}-{}",
            self.scale,
            if self.use_weight_limit {
                "weight"
            } else {
                "kSize"
            },
            if self.use_alternating_sort {
                "alternating"
            } else {
                "stable"
            },
            if self.use_two_level_compression {
                "twoLevel"
            } else {
                "oneLevel"
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tdigest::test_helpers::{assert_monotone_chain, assert_rel_close};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn uniform_digest(n: usize, compression: f64, seed: u64) -> (MergingDigest, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut digest = MergingDigest::new(compression);
        let mut samples = Vec::with_capacity(n);
        for _ in 0..n {
            let x: f64 = rng.random();
            digest.add(x).unwrap();
            samples.push(x);
        }
        samples.sort_by(|a, b| a.total_cmp(b));
        (digest, samples)
    }

    fn exact_quantile(sorted: &[f64], q: f64) -> f64 {
        let index = (q * (sorted.len() - 1) as f64).round() as usize;
        sorted[index]
    }

    #[test]
    fn empty_digest_answers_nan() {
        let mut digest = MergingDigest::new(100.0);
        assert!(digest.quantile(0.5).unwrap().is_nan());
        assert!(digest.cdf(1.0).is_nan());
        assert_eq!(digest.size(), 0);
        assert_eq!(digest.centroid_count(), 0);
    }

    #[test]
    fn compression_floor_is_ten() {
        let digest = MergingDigest::new(2.0);
        assert_eq!(digest.compression(), 10.0);
    }

    #[test]
    fn rejects_nan_and_bad_weights() {
        let mut digest = MergingDigest::new(100.0);
        assert!(matches!(
            digest.add(f64::NAN),
            Err(TdError::NanInput { .. })
        ));
        assert_eq!(digest.add_weighted(1.0, 0), Err(TdError::NonPositiveWeight));
        assert_eq!(digest.size(), 0);
    }

    #[test]
    fn quantile_rejects_out_of_range() {
        let mut digest = MergingDigest::new(100.0);
        digest.add(1.0).unwrap();
        assert_eq!(digest.quantile(2.0), Err(TdError::QuantileOutOfRange));
        assert_eq!(digest.quantile(-0.5), Err(TdError::QuantileOutOfRange));
    }

    #[test]
    fn single_value_is_exact() {
        let mut digest = MergingDigest::new(100.0);
        digest.add(42.0).unwrap();
        assert_eq!(digest.quantile(0.0).unwrap(), 42.0);
        assert_eq!(digest.quantile(0.5).unwrap(), 42.0);
        assert_eq!(digest.quantile(1.0).unwrap(), 42.0);
        assert_eq!(digest.cdf(41.0), 0.0);
        assert_eq!(digest.cdf(42.0), 0.5);
        assert_eq!(digest.cdf(43.0), 1.0);
    }

    #[test]
    fn min_and_max_are_exact() {
        let (mut digest, samples) = uniform_digest(10_000, 100.0, 101);
        assert_eq!(digest.quantile(0.0).unwrap(), samples[0]);
        assert_eq!(digest.quantile(1.0).unwrap(), *samples.last().unwrap());
    }

    #[test]
    fn uniform_quantiles_are_accurate() {
        let (mut digest, samples) = uniform_digest(50_000, 100.0, 7);
        for q in [0.001, 0.01, 0.1, 0.25, 0.5, 0.75, 0.9, 0.99, 0.999] {
            let estimate = digest.quantile(q).unwrap();
            let exact = exact_quantile(&samples, q);
            assert!(
                (estimate - exact).abs() < 0.01,
                "q={} estimate={} exact={}",
                q,
                estimate,
                exact
            );
        }
    }

    #[test]
    fn quantiles_are_monotone_in_q() {
        let (mut digest, _) = uniform_digest(20_000, 50.0, 13);
        let values: Vec<f64> = (0..=100)
            .map(|i| digest.quantile(i as f64 / 100.0).unwrap())
            .collect();
        assert_monotone_chain(&values);
    }

    #[test]
    fn cdf_is_monotone_and_bounded() {
        let (mut digest, _) = uniform_digest(20_000, 100.0, 19);
        let cdfs: Vec<f64> = (0..=100).map(|i| digest.cdf(i as f64 / 100.0)).collect();
        assert_monotone_chain(&cdfs);
        for &p in &cdfs {
            assert!((0.0..=1.0).contains(&p));
        }
        assert_rel_close(digest.cdf(0.5), 0.5, 0.05);
    }

    #[test]
    fn cdf_at_extremes_counts_half_a_sample() {
        let (mut digest, samples) = uniform_digest(1000, 100.0, 29);
        let n = samples.len() as f64;
        let min = digest.min();
        let max = digest.max();
        assert_eq!(digest.cdf(min), 0.5 / n);
        assert_eq!(digest.cdf(max), 1.0 - 0.5 / n);
        assert_eq!(digest.cdf(min - 1.0), 0.0);
        assert_eq!(digest.cdf(max + 1.0), 1.0);
    }

    #[test]
    fn compress_squeezes_to_public_compression() {
        let (mut digest, _) = uniform_digest(100_000, 100.0, 37);
        digest.compress();
        // merged at the public setting, the cell count is bounded by a small
        // multiple of the compression
        assert!(digest.centroid_count() <= 2 * 100 + 30);
        assert_eq!(digest.size(), 100_000);
    }

    #[test]
    fn weight_is_conserved_across_merges() {
        let (mut digest, _) = uniform_digest(12_345, 50.0, 53);
        digest.compress();
        let total: i64 = digest.centroids().iter().map(|c| c.count()).sum();
        assert_eq!(total, 12_345);
    }

    #[test]
    fn merge_digests_combines_distributions() {
        let (mut left, mut a) = uniform_digest(10_000, 100.0, 61);
        let (right, b) = uniform_digest(10_000, 100.0, 67);
        left.merge_digests(&mut [right]);
        a.extend_from_slice(&b);
        a.sort_by(|x, y| x.total_cmp(y));
        assert_eq!(left.size(), 20_000);
        for q in [0.01, 0.1, 0.5, 0.9, 0.99] {
            let estimate = left.quantile(q).unwrap();
            let exact = exact_quantile(&a, q);
            assert!(
                (estimate - exact).abs() < 0.015,
                "q={} estimate={} exact={}",
                q,
                estimate,
                exact
            );
        }
    }

    #[test]
    fn k_limit_mode_matches_weight_limit_roughly() {
        let mut rng = StdRng::seed_from_u64(71);
        let mut by_weight = MergingDigest::new(100.0);
        let mut by_k = MergingDigest::new(100.0);
        by_k.set_use_weight_limit(false);
        for _ in 0..20_000 {
            let x: f64 = rng.random();
            by_weight.add(x).unwrap();
            by_k.add(x).unwrap();
        }
        for q in [0.01, 0.1, 0.5, 0.9, 0.99] {
            let a = by_weight.quantile(q).unwrap();
            let b = by_k.quantile(q).unwrap();
            assert!((a - b).abs() < 0.02, "q={} a={} b={}", q, a, b);
        }
    }

    #[test]
    fn stable_sort_mode_still_works() {
        let mut digest = MergingDigest::new(100.0);
        digest.set_use_alternating_sort(false);
        for i in 0..50_000 {
            digest.add((i % 1000) as f64).unwrap();
        }
        let median = digest.quantile(0.5).unwrap();
        assert_rel_close(median, 500.0, 0.05);
    }

    #[test]
    fn repeated_values_collapse_but_keep_extremes() {
        let mut digest = MergingDigest::new(100.0);
        for _ in 0..3000 {
            digest.add(10.0).unwrap();
        }
        digest.add(20.0).unwrap();
        assert_eq!(digest.quantile(0.999).unwrap(), 10.0);
        assert_eq!(digest.quantile(1.0).unwrap(), 20.0);
    }

    #[test]
    fn recording_keeps_every_sample() {
        let mut digest = MergingDigest::new(50.0);
        digest.record_all_data();
        let mut rng = StdRng::seed_from_u64(83);
        for _ in 0..2000 {
            digest.add(rng.random::<f64>()).unwrap();
        }
        let recorded: usize = digest
            .centroids()
            .iter()
            .map(|c| c.data().map_or(0, |d| d.len()))
            .sum();
        assert_eq!(recorded as i64, digest.size());
    }

    #[test]
    #[should_panic(expected = "normalized scale function")]
    fn no_norm_scales_are_rejected() {
        let mut digest = MergingDigest::new(100.0);
        digest.set_scale_function(ScaleFunction::K2NoNorm);
    }

    #[test]
    fn weighted_adds_count_fully() {
        let mut digest = MergingDigest::new(100.0);
        digest.add_weighted(1.0, 10).unwrap();
        digest.add_weighted(2.0, 30).unwrap();
        assert_eq!(digest.size(), 40);
        // mass interpolates between the two centroid centers: half of
        // (10+30)/2 past the first center, so (5 + 10) / 40
        assert_eq!(digest.cdf(1.5), 0.375);
        assert_eq!(digest.cdf(0.5), 0.0);
        assert_eq!(digest.cdf(2.5), 1.0);
    }
}
