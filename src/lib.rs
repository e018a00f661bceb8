pub mod error;
pub mod tdigest;

pub use error::{TdError, TdResult};
pub use tdigest::{
    avl_tree_digest, create_digest, merging_digest, AvlTreeDigest, Centroid, Digest,
    MergingDigest, ScaleFunction,
};
