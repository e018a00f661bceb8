// src/tdigest/centroid.rs
//
// A centroid is a running weighted mean plus the number of samples behind it.
// The id breaks ties between centroids with equal means; it is process-local
// and never serialized.

use ordered_float::OrderedFloat;

/// A single centroid representing one or more absorbed samples.
#[derive(Debug, Clone)]
pub struct Centroid {
    mean: f64,
    count: i64,
    id: i32,
    /// Raw samples absorbed into this centroid; populated only when the
    /// owning digest has recording turned on.
    data: Option<Vec<f64>>,
}

impl Centroid {
    pub fn new(mean: f64, count: i64, id: i32) -> Self {
        Centroid {
            mean,
            count,
            id,
            data: None,
        }
    }

    pub fn with_data(mean: f64, count: i64, id: i32, data: Option<Vec<f64>>) -> Self {
        Centroid {
            mean,
            count,
            id,
            data,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn data(&self) -> Option<&[f64]> {
        self.data.as_deref()
    }

    pub fn take_data(&mut self) -> Option<Vec<f64>> {
        self.data.take()
    }

    /// Fold another sample into this centroid, keeping `mean` the exact
    /// running weighted average.
    pub fn add(&mut self, x: f64, w: i64) {
        if let Some(data) = &mut self.data {
            data.push(x);
        }
        self.count += w;
        self.mean += w as f64 * (x - self.mean) / self.count as f64;
    }

    pub fn insert_data(&mut self, x: f64) {
        self.data.get_or_insert_with(Vec::new).push(x);
    }
}

impl PartialEq for Centroid {
    fn eq(&self, other: &Self) -> bool {
        self.mean == other.mean && self.id == other.id
    }
}

impl Eq for Centroid {}

impl PartialOrd for Centroid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Centroid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // means entering a digest are never NaN, OrderedFloat just makes the
        // ordering total
        OrderedFloat(self.mean)
            .cmp(&OrderedFloat(other.mean))
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_mean_is_weighted_average() {
        let mut c = Centroid::new(10.0, 1, 0);
        c.add(20.0, 1);
        assert_eq!(c.mean(), 15.0);
        assert_eq!(c.count(), 2);
        // (10 + 20 + 30 + 30) / 4
        c.add(30.0, 2);
        assert_eq!(c.mean(), 22.5);
        assert_eq!(c.count(), 4);
    }

    #[test]
    fn order_is_mean_then_id() {
        let a = Centroid::new(1.0, 1, 0);
        let b = Centroid::new(1.0, 1, 1);
        let c = Centroid::new(2.0, 1, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, Centroid::new(1.0, 99, 0));
    }

    #[test]
    fn recording_keeps_raw_samples() {
        let mut c = Centroid::with_data(5.0, 1, 0, Some(vec![5.0]));
        c.add(7.0, 1);
        assert_eq!(c.data(), Some(&[5.0, 7.0][..]));
    }
}
