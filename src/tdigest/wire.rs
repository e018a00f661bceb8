// src/tdigest/wire.rs
//
//! Serialization for both digest kinds.
//!
//! Each kind has a verbose encoding (tag 1, full doubles) and a small
//! encoding (tag 2). The small AVL form delta-codes means as f32 and writes
//! weights as varints; the small merging form drops everything to f32 and
//! records the buffer geometry so the digest can be rebuilt with the same
//! capacities. All fields are big-endian.
//!
//! Decoding validates the tag and every announced count, so a bad buffer
//! errors out instead of yielding a corrupt digest.

use super::avl_digest::AvlTreeDigest;
use super::io::{decode_varint, encode_varint, BinaryInput, BinaryOutput};
use super::merging_digest::MergingDigest;
use crate::error::{TdError, TdResult};

const VERBOSE_ENCODING: i32 = 1;
const SMALL_ENCODING: i32 = 2;

fn checked_i32(n: i64, what: &'static str) -> TdResult<i32> {
    i32::try_from(n).map_err(|_| TdError::BadCount { what })
}

fn checked_len(n: i32, what: &'static str) -> TdResult<usize> {
    usize::try_from(n).map_err(|_| TdError::BadCount { what })
}

impl AvlTreeDigest {
    /// Verbose encoding: full-precision means with i32 weights.
    pub fn as_bytes(&self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        let summary = self.summary();
        out.write_i32(VERBOSE_ENCODING);
        out.write_f64(self.min());
        out.write_f64(self.max());
        out.write_f64(self.compression() as f32 as f64);
        out.write_i32(checked_i32(
            summary.size() as i64,
            "too many centroids for the verbose encoding",
        )?);
        for node in summary.iter() {
            out.write_f64(summary.mean(node));
        }
        for node in summary.iter() {
            out.write_i32(checked_i32(
                summary.count(node),
                "centroid weight does not fit the verbose encoding",
            )?);
        }
        Ok(())
    }

    /// Small encoding: f32 delta-coded means with varint weights.
    pub fn as_small_bytes(&self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        let summary = self.summary();
        out.write_i32(SMALL_ENCODING);
        out.write_f64(self.min());
        out.write_f64(self.max());
        out.write_f64(self.compression());
        out.write_i32(checked_i32(
            summary.size() as i64,
            "too many centroids for the small encoding",
        )?);
        let mut x = 0.0;
        for node in summary.iter() {
            let mean = summary.mean(node);
            let delta = mean - x;
            x = mean;
            out.write_f32(delta as f32);
        }
        for node in summary.iter() {
            let count = checked_i32(
                summary.count(node),
                "centroid weight does not fit the small encoding",
            )?;
            encode_varint(out, count)?;
        }
        Ok(())
    }

    /// Exact size of the small encoding.
    pub fn small_byte_size(&mut self) -> usize {
        self.compress();
        let mut buf = Vec::new();
        self.as_small_bytes(&mut buf)
            .expect("sizing an in-memory digest cannot fail");
        buf.len()
    }

    pub fn from_bytes<R: BinaryInput>(input: &mut R) -> TdResult<AvlTreeDigest> {
        let encoding = input.read_i32()?;
        match encoding {
            VERBOSE_ENCODING => {
                let min = input.read_f64()?;
                let max = input.read_f64()?;
                let compression = input.read_f64()?;
                let n = checked_len(input.read_i32()?, "negative centroid count")?;
                let mut means = Vec::with_capacity(n);
                for _ in 0..n {
                    means.push(input.read_f64()?);
                }
                let mut digest = AvlTreeDigest::new(compression);
                digest.set_min_max(min, max);
                for mean in means {
                    let weight = input.read_i32()?;
                    digest.add_weighted(mean, weight as i64)?;
                }
                Ok(digest)
            }
            SMALL_ENCODING => {
                let min = input.read_f64()?;
                let max = input.read_f64()?;
                let compression = input.read_f64()?;
                let n = checked_len(input.read_i32()?, "negative centroid count")?;
                let mut means = Vec::with_capacity(n);
                let mut x = 0.0;
                for _ in 0..n {
                    x += input.read_f32()? as f64;
                    means.push(x);
                }
                let mut digest = AvlTreeDigest::new(compression);
                digest.set_min_max(min, max);
                for mean in means {
                    let weight = decode_varint(input)?;
                    digest.add_weighted(mean, weight as i64)?;
                }
                Ok(digest)
            }
            tag => Err(TdError::UnknownEncoding { tag }),
        }
    }
}

impl MergingDigest {
    /// Verbose encoding: (weight, mean) pairs at full precision.
    pub fn as_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        self.compress();
        out.write_i32(VERBOSE_ENCODING);
        out.write_f64(self.min());
        out.write_f64(self.max());
        out.write_f64(self.compression());
        let (weights, means) = self.cells();
        out.write_i32(checked_i32(
            weights.len() as i64,
            "too many centroids for the verbose encoding",
        )?);
        for (w, m) in weights.iter().zip(means) {
            out.write_f64(*w);
            out.write_f64(*m);
        }
        Ok(())
    }

    /// Small encoding: f32 pairs plus the buffer geometry.
    pub fn as_small_bytes(&mut self, out: &mut dyn BinaryOutput) -> TdResult<()> {
        self.compress();
        out.write_i32(SMALL_ENCODING);
        out.write_f64(self.min());
        out.write_f64(self.max());
        out.write_f32(self.compression() as f32);
        let capacity = checked_i32(self.mean_capacity() as i64, "centroid capacity too large")?;
        let buffer = checked_i32(self.buffer_capacity() as i64, "buffer capacity too large")?;
        let (weights, means) = self.cells();
        let used = weights.len() as i32;
        if capacity > i16::MAX as i32 || buffer > i16::MAX as i32 || used > i16::MAX as i32 {
            return Err(TdError::BadCount {
                what: "capacity does not fit the small encoding",
            });
        }
        out.write_i16(capacity as i16);
        out.write_i16(buffer as i16);
        out.write_i16(used as i16);
        for (w, m) in weights.iter().zip(means) {
            out.write_f32(*w as f32);
            out.write_f32(*m as f32);
        }
        Ok(())
    }

    pub fn from_bytes<R: BinaryInput>(input: &mut R) -> TdResult<MergingDigest> {
        let encoding = input.read_i32()?;
        match encoding {
            VERBOSE_ENCODING => {
                let min = input.read_f64()?;
                let max = input.read_f64()?;
                let compression = input.read_f64()?;
                let n = checked_len(input.read_i32()?, "negative centroid count")?;
                let mut weights = Vec::with_capacity(n);
                let mut means = Vec::with_capacity(n);
                for _ in 0..n {
                    weights.push(input.read_f64()?);
                    means.push(input.read_f64()?);
                }
                let mut digest = MergingDigest::new(compression);
                digest.set_min_max(min, max);
                digest.restore_cells(&weights, &means)?;
                Ok(digest)
            }
            SMALL_ENCODING => {
                let min = input.read_f64()?;
                let max = input.read_f64()?;
                let compression = input.read_f32()? as f64;
                let size = input.read_i16()?;
                let buffer_size = input.read_i16()?;
                let used = input.read_i16()?;
                if size < 0 || buffer_size < 0 || used < 0 || used > size {
                    return Err(TdError::BadCount {
                        what: "inconsistent cell counts",
                    });
                }
                let mut weights = Vec::with_capacity(used as usize);
                let mut means = Vec::with_capacity(used as usize);
                for _ in 0..used {
                    weights.push(input.read_f32()? as f64);
                    means.push(input.read_f32()? as f64);
                }
                let mut digest =
                    MergingDigest::with_capacity(compression, buffer_size as i32, size as i32);
                digest.set_min_max(min, max);
                digest.restore_cells(&weights, &means)?;
                Ok(digest)
            }
            tag => Err(TdError::UnknownEncoding { tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::io::SliceInput;
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_avl(n: usize) -> AvlTreeDigest {
        let mut rng = StdRng::seed_from_u64(5);
        let mut digest = AvlTreeDigest::new(100.0);
        for _ in 0..n {
            digest.add(rng.random::<f64>() * 100.0).unwrap();
        }
        digest
    }

    fn sample_merging(n: usize) -> MergingDigest {
        let mut rng = StdRng::seed_from_u64(5);
        let mut digest = MergingDigest::new(100.0);
        for _ in 0..n {
            digest.add(rng.random::<f64>() * 100.0).unwrap();
        }
        digest
    }

    #[test]
    fn avl_verbose_round_trip() {
        let digest = sample_avl(5000);
        let mut buf = Vec::new();
        digest.as_bytes(&mut buf).unwrap();

        let restored = AvlTreeDigest::from_bytes(&mut SliceInput::new(&buf)).unwrap();
        assert_eq!(restored.size(), digest.size());
        assert_eq!(restored.min(), digest.min());
        assert_eq!(restored.max(), digest.max());
        for q in [0.001, 0.01, 0.1, 0.5, 0.9, 0.99, 0.999] {
            let a = digest.quantile(q).unwrap();
            let b = restored.quantile(q).unwrap();
            assert!((a - b).abs() < 1e-5 * 100.0, "q={} {} vs {}", q, a, b);
        }
    }

    #[test]
    fn avl_small_round_trip() {
        let digest = sample_avl(5000);
        let mut verbose = Vec::new();
        digest.as_bytes(&mut verbose).unwrap();
        let mut small = Vec::new();
        digest.as_small_bytes(&mut small).unwrap();
        assert!(small.len() < verbose.len());

        let restored = AvlTreeDigest::from_bytes(&mut SliceInput::new(&small)).unwrap();
        assert_eq!(restored.size(), digest.size());
        for q in [0.01, 0.1, 0.5, 0.9, 0.99] {
            let a = digest.quantile(q).unwrap();
            let b = restored.quantile(q).unwrap();
            // f32 deltas accumulate a little rounding
            assert!((a - b).abs() < 1e-4 * 100.0, "q={} {} vs {}", q, a, b);
        }
    }

    #[test]
    fn avl_byte_size_bound_holds() {
        let mut digest = sample_avl(2000);
        let bound = digest.byte_size();
        let mut buf = Vec::new();
        digest.as_bytes(&mut buf).unwrap();
        assert!(buf.len() <= bound);
        assert!(digest.small_byte_size() <= bound);
    }

    #[test]
    fn merging_verbose_round_trip() {
        let mut digest = sample_merging(5000);
        let mut buf = Vec::new();
        digest.as_bytes(&mut buf).unwrap();
        assert_eq!(buf.len(), digest.byte_size());

        let mut restored = MergingDigest::from_bytes(&mut SliceInput::new(&buf)).unwrap();
        assert_eq!(restored.size(), digest.size());
        assert_eq!(restored.min(), digest.min());
        assert_eq!(restored.max(), digest.max());
        assert_eq!(restored.centroid_count(), digest.centroid_count());
        for q in [0.001, 0.01, 0.1, 0.5, 0.9, 0.99, 0.999] {
            let a = digest.quantile(q).unwrap();
            let b = restored.quantile(q).unwrap();
            assert!((a - b).abs() < 1e-9 * 100.0, "q={} {} vs {}", q, a, b);
        }
    }

    #[test]
    fn merging_small_round_trip() {
        let mut digest = sample_merging(5000);
        let mut small = Vec::new();
        digest.as_small_bytes(&mut small).unwrap();
        assert_eq!(small.len(), digest.small_byte_size());

        let mut restored = MergingDigest::from_bytes(&mut SliceInput::new(&small)).unwrap();
        assert_eq!(restored.size(), digest.size());
        for q in [0.01, 0.1, 0.5, 0.9, 0.99] {
            let a = digest.quantile(q).unwrap();
            let b = restored.quantile(q).unwrap();
            assert!((a - b).abs() < 1e-4 * 100.0, "q={} {} vs {}", q, a, b);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = Vec::new();
        buf.write_i32(77);
        buf.write_f64(0.0);
        assert_eq!(
            AvlTreeDigest::from_bytes(&mut SliceInput::new(&buf)).err(),
            Some(TdError::UnknownEncoding { tag: 77 })
        );
        assert!(matches!(
            MergingDigest::from_bytes(&mut SliceInput::new(&buf)),
            Err(TdError::UnknownEncoding { tag: 77 })
        ));
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let mut digest = sample_merging(1000);
        let mut buf = Vec::new();
        digest.as_bytes(&mut buf).unwrap();
        for cut in [3, 10, 30, buf.len() - 1] {
            assert!(
                matches!(
                    MergingDigest::from_bytes(&mut SliceInput::new(&buf[..cut])),
                    Err(TdError::Truncated { .. })
                ),
                "cut at {} not detected",
                cut
            );
        }

        let avl = sample_avl(1000);
        let mut buf = Vec::new();
        avl.as_small_bytes(&mut buf).unwrap();
        assert!(matches!(
            AvlTreeDigest::from_bytes(&mut SliceInput::new(&buf[..buf.len() / 2])),
            Err(TdError::Truncated { .. })
        ));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let mut buf = Vec::new();
        buf.write_i32(VERBOSE_ENCODING);
        buf.write_f64(0.0);
        buf.write_f64(1.0);
        buf.write_f64(100.0);
        buf.write_i32(-4);
        assert!(matches!(
            AvlTreeDigest::from_bytes(&mut SliceInput::new(&buf)),
            Err(TdError::BadCount { .. })
        ));
        assert!(matches!(
            MergingDigest::from_bytes(&mut SliceInput::new(&buf)),
            Err(TdError::BadCount { .. })
        ));
    }
}
