//! Stable content hashing for datum input tuples.

use sha2::{Digest, Sha256};

use crate::datum::{DatumHash, Input};

/// Computes the stable content hash identifying a datum.
///
/// Implementations must be deterministic and collision-resistant over
/// distinct input tuples.
pub trait DatumHasher: Send + Sync {
    /// Hash a datum's input tuple.
    fn hash(&self, inputs: &[Input]) -> DatumHash;
}

/// SHA-256 hasher over the length-delimited fields of each input.
///
/// Length-delimiting keeps adjacent fields from colliding when their
/// boundary shifts (`("ab", "c")` vs `("a", "bc")`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl DatumHasher for Sha256Hasher {
    fn hash(&self, inputs: &[Input]) -> DatumHash {
        let mut digest = Sha256::new();
        for input in inputs {
            digest.update((input.name.len() as u64).to_be_bytes());
            digest.update(input.name.as_bytes());
            digest.update((input.path.len() as u64).to_be_bytes());
            digest.update(input.path.as_bytes());
            digest.update((input.hash.len() as u64).to_be_bytes());
            digest.update(&input.hash);
        }
        hex::encode(digest.finalize())
    }
}
