//! Wire-format round trips through the public API.

use tdigest_rs::tdigest::io::SliceInput;
use tdigest_rs::{AvlTreeDigest, Digest, MergingDigest, TdError};
use tdigest_testdata::{gen_dataset, DistKind};

fn grid() -> Vec<f64> {
    (0..=100).map(|i| i as f64 / 100.0).collect()
}

#[test]
fn avl_verbose_round_trip_preserves_quantiles() {
    let data = gen_dataset(DistKind::Mixture, 50_000, 21);
    let mut digest = AvlTreeDigest::new(100.0);
    for &x in &data {
        digest.add(x).unwrap();
    }

    // byte_size compresses, so take it first to make the sizes comparable
    let expected_len = digest.byte_size();
    let mut buf = Vec::new();
    Digest::as_bytes(&mut digest, &mut buf).unwrap();
    assert_eq!(buf.len(), expected_len);

    let restored = AvlTreeDigest::from_bytes(&mut SliceInput::new(&buf)).unwrap();
    assert_eq!(restored.size(), digest.size());
    assert_eq!(restored.min(), digest.min());
    assert_eq!(restored.max(), digest.max());
    for q in grid() {
        let a = digest.quantile(q).unwrap();
        let b = restored.quantile(q).unwrap();
        assert!((a - b).abs() < 1e-5, "q={q}: {a} vs {b}");
    }
}

#[test]
fn avl_small_round_trip_is_close_and_smaller() {
    let data = gen_dataset(DistKind::Uniform, 50_000, 22);
    let mut digest = AvlTreeDigest::new(100.0);
    for &x in &data {
        digest.add(x).unwrap();
    }

    let mut verbose = Vec::new();
    Digest::as_bytes(&mut digest, &mut verbose).unwrap();
    let mut small = Vec::new();
    Digest::as_small_bytes(&mut digest, &mut small).unwrap();
    assert!(small.len() < verbose.len());

    let restored = AvlTreeDigest::from_bytes(&mut SliceInput::new(&small)).unwrap();
    assert_eq!(restored.size(), digest.size());
    for q in grid() {
        let a = digest.quantile(q).unwrap();
        let b = restored.quantile(q).unwrap();
        // means travel as f32 deltas
        assert!((a - b).abs() < 1e-4, "q={q}: {a} vs {b}");
    }
}

#[test]
fn merging_verbose_round_trip_is_exact() {
    let data = gen_dataset(DistKind::LogNormal { sigma: 1.0 }, 50_000, 23);
    let mut digest = MergingDigest::new(100.0);
    for &x in &data {
        digest.add(x).unwrap();
    }

    let mut buf = Vec::new();
    digest.as_bytes(&mut buf).unwrap();
    assert_eq!(buf.len(), digest.byte_size());

    let mut restored = MergingDigest::from_bytes(&mut SliceInput::new(&buf)).unwrap();
    assert_eq!(restored.size(), digest.size());
    assert_eq!(restored.centroid_count(), digest.centroid_count());
    // cells travel as full f64, so answers match bit for bit
    for q in grid() {
        assert_eq!(
            digest.quantile(q).unwrap(),
            restored.quantile(q).unwrap(),
            "q={q}"
        );
    }
}

#[test]
fn merging_small_round_trip_is_close() {
    let data = gen_dataset(DistKind::Mixture, 50_000, 24);
    let mut digest = MergingDigest::new(100.0);
    for &x in &data {
        digest.add(x).unwrap();
    }

    let mut buf = Vec::new();
    digest.as_small_bytes(&mut buf).unwrap();
    assert_eq!(buf.len(), digest.small_byte_size());

    let mut restored = MergingDigest::from_bytes(&mut SliceInput::new(&buf)).unwrap();
    assert_eq!(restored.size(), digest.size());
    for q in grid() {
        let a = digest.quantile(q).unwrap();
        let b = restored.quantile(q).unwrap();
        assert!((a - b).abs() < 1e-4, "q={q}: {a} vs {b}");
    }
}

#[test]
fn decode_encode_is_stable() {
    let data = gen_dataset(DistKind::Normal, 20_000, 25);
    let mut digest = MergingDigest::new(50.0);
    // alternating merge passes flip direction per merge, so pin the order to
    // make re-encoding reproducible
    digest.set_use_alternating_sort(false);
    for &x in &data {
        digest.add(x).unwrap();
    }

    let mut first = Vec::new();
    digest.as_bytes(&mut first).unwrap();
    let mut restored = MergingDigest::from_bytes(&mut SliceInput::new(&first)).unwrap();
    restored.set_use_alternating_sort(false);
    let mut second = Vec::new();
    restored.as_bytes(&mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn garbage_and_truncation_are_reported() {
    // a tag neither codec knows
    let mut buf = Vec::new();
    buf.extend_from_slice(&99i32.to_be_bytes());
    assert!(matches!(
        AvlTreeDigest::from_bytes(&mut SliceInput::new(&buf)),
        Err(TdError::UnknownEncoding { tag: 99 })
    ));
    assert!(matches!(
        MergingDigest::from_bytes(&mut SliceInput::new(&buf)),
        Err(TdError::UnknownEncoding { tag: 99 })
    ));

    // a valid prefix cut off at every byte must never panic
    let mut digest = MergingDigest::new(50.0);
    for i in 0..100 {
        digest.add(i as f64).unwrap();
    }
    let mut full = Vec::new();
    digest.as_bytes(&mut full).unwrap();
    for cut in 0..full.len() {
        assert!(
            matches!(
                MergingDigest::from_bytes(&mut SliceInput::new(&full[..cut])),
                Err(TdError::Truncated { .. })
            ),
            "cut={cut}"
        );
    }
}
