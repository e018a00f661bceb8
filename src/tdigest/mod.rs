pub mod avl_digest;
pub mod centroid;
pub mod centroid_tree;
pub mod io;
pub mod merging_digest;
pub mod scale;
pub mod test_helpers;
pub mod wire;

// Internal building blocks
mod sort;
mod tree;

// Public surface
pub use avl_digest::AvlTreeDigest;
pub use centroid::Centroid;
pub use merging_digest::MergingDigest;
pub use scale::ScaleFunction;

use crate::error::TdResult;
use io::BinaryOutput;

// Opt-in tracing (cheap unless env var set)
#[macro_export]
macro_rules! ttrace {
    ($($arg:tt)*) => {
        if std::env::var("TDIGEST_TRACE").is_ok() {
            eprintln!($($arg)*);
        }
    }
}

/// The operations both digest kinds share. Queries take `&mut self` because
/// the merging digest flushes its scratch buffer before answering.
pub trait Digest {
    fn add(&mut self, x: f64) -> TdResult<()>;
    fn add_weighted(&mut self, x: f64, w: i64) -> TdResult<()>;
    fn compress(&mut self);
    fn size(&self) -> i64;
    fn quantile(&mut self, q: f64) -> TdResult<f64>;
    fn cdf(&mut self, x: f64) -> f64;
    fn centroids(&mut self) -> Vec<Centroid>;
    fn centroid_count(&mut self) -> usize;
    fn compression(&self) -> f64;
    fn min(&self) -> f64;
    fn max(&self) -> f64;
    fn byte_size(&mut self) -> usize;
    fn small_byte_size(&mut self) -> usize;
    fn as_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()>;
    fn as_small_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()>;
    fn record_all_data(&mut self);
}

impl Digest for AvlTreeDigest {
    fn add(&mut self, x: f64) -> TdResult<()> {
        AvlTreeDigest::add(self, x)
    }
    fn add_weighted(&mut self, x: f64, w: i64) -> TdResult<()> {
        AvlTreeDigest::add_weighted(self, x, w)
    }
    fn compress(&mut self) {
        AvlTreeDigest::compress(self)
    }
    fn size(&self) -> i64 {
        AvlTreeDigest::size(self)
    }
    fn quantile(&mut self, q: f64) -> TdResult<f64> {
        AvlTreeDigest::quantile(self, q)
    }
    fn cdf(&mut self, x: f64) -> f64 {
        AvlTreeDigest::cdf(self, x)
    }
    fn centroids(&mut self) -> Vec<Centroid> {
        AvlTreeDigest::centroids(self)
    }
    fn centroid_count(&mut self) -> usize {
        AvlTreeDigest::centroid_count(self)
    }
    fn compression(&self) -> f64 {
        AvlTreeDigest::compression(self)
    }
    fn min(&self) -> f64 {
        AvlTreeDigest::min(self)
    }
    fn max(&self) -> f64 {
        AvlTreeDigest::max(self)
    }
    fn byte_size(&mut self) -> usize {
        AvlTreeDigest::byte_size(self)
    }
    fn small_byte_size(&mut self) -> usize {
        AvlTreeDigest::small_byte_size(self)
    }
    fn as_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        AvlTreeDigest::as_bytes(self, out)
    }
    fn as_small_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        AvlTreeDigest::as_small_bytes(self, out)
    }
    fn record_all_data(&mut self) {
        AvlTreeDigest::record_all_data(self)
    }
}

impl Digest for MergingDigest {
    fn add(&mut self, x: f64) -> TdResult<()> {
        MergingDigest::add(self, x)
    }
    fn add_weighted(&mut self, x: f64, w: i64) -> TdResult<()> {
        MergingDigest::add_weighted(self, x, w)
    }
    fn compress(&mut self) {
        MergingDigest::compress(self)
    }
    fn size(&self) -> i64 {
        MergingDigest::size(self)
    }
    fn quantile(&mut self, q: f64) -> TdResult<f64> {
        MergingDigest::quantile(self, q)
    }
    fn cdf(&mut self, x: f64) -> f64 {
        MergingDigest::cdf(self, x)
    }
    fn centroids(&mut self) -> Vec<Centroid> {
        MergingDigest::centroids(self)
    }
    fn centroid_count(&mut self) -> usize {
        MergingDigest::centroid_count(self)
    }
    fn compression(&self) -> f64 {
        MergingDigest::compression(self)
    }
    fn min(&self) -> f64 {
        MergingDigest::min(self)
    }
    fn max(&self) -> f64 {
        MergingDigest::max(self)
    }
    fn byte_size(&mut self) -> usize {
        MergingDigest::byte_size(self)
    }
    fn small_byte_size(&mut self) -> usize {
        MergingDigest::small_byte_size(self)
    }
    fn as_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        MergingDigest::as_bytes(self, out)
    }
    fn as_small_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        MergingDigest::as_small_bytes(self, out)
    }
    fn record_all_data(&mut self) {
        MergingDigest::record_all_data(self)
    }
}

/// The recommended digest for almost all uses.
pub fn create_digest(compression: f64) -> MergingDigest {
    merging_digest(compression)
}

pub fn merging_digest(compression: f64) -> MergingDigest {
    MergingDigest::new(compression)
}

pub fn avl_tree_digest(compression: f64) -> AvlTreeDigest {
    AvlTreeDigest::new(compression)
}

/// Weighted average of `x1` and `x2`, clamped to lie between them whatever
/// floating point does to the division.
pub(crate) fn weighted_average(x1: f64, w1: f64, x2: f64, w2: f64) -> f64 {
    if x1 <= x2 {
        weighted_average_sorted(x1, w1, x2, w2)
    } else {
        weighted_average_sorted(x2, w2, x1, w1)
    }
}

fn weighted_average_sorted(x1: f64, w1: f64, x2: f64, w2: f64) -> f64 {
    debug_assert!(x1 <= x2);
    let x = (x1 * w1 + x2 * w2) / (w1 + w2);
    x.clamp(x1, x2)
}
