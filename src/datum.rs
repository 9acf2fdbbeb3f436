//! Datum input tuples and hash-keyed set primitives.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Stable content hash identifying a datum.
pub type DatumHash = String;

/// Unordered set of datum hashes with O(1) membership, union, and difference.
pub type DatumSet = HashSet<DatumHash>;

/// One member of a datum's input tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Name of the input this file came from.
    pub name: String,
    /// Path of the file within the input.
    pub path: String,
    /// Content hash of the file.
    pub hash: Vec<u8>,
}

impl Input {
    /// Create a new input.
    pub fn new(name: impl Into<String>, path: impl Into<String>, hash: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            hash: hash.into(),
        }
    }
}

/// Restartable, finite iterator over a job's declared datum sequence.
///
/// A datum is the input tuple returned by [`datum`](DatumIterator::datum);
/// the sequence order is the job's declared processing order.
pub trait DatumIterator: Send {
    /// Rewind to before the first datum.
    fn reset(&mut self);

    /// Total number of datums in the sequence.
    fn len(&self) -> usize;

    /// Whether the sequence is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance to the next datum. Returns false once the sequence is exhausted.
    fn next(&mut self) -> bool;

    /// The input tuple of the current datum.
    ///
    /// Only valid after a `next` call that returned true.
    fn datum(&self) -> &[Input];

    /// The input tuple of the datum at position `n`.
    fn datum_n(&self, n: usize) -> &[Input];
}

/// Supplier of a job's declared datum sequence.
pub trait JobData: Send + Sync {
    /// Produce an iterator over the job's declared datums.
    fn iterator(&self) -> Box<dyn DatumIterator>;
}

/// A [`DatumIterator`] over an owned list of input tuples.
#[derive(Debug, Clone)]
pub struct VecDatumIterator {
    inputs: Vec<Vec<Input>>,
    cursor: usize,
}

impl VecDatumIterator {
    /// Create an iterator over the given input tuples, one per datum.
    pub fn new(inputs: Vec<Vec<Input>>) -> Self {
        Self { inputs, cursor: 0 }
    }
}

impl DatumIterator for VecDatumIterator {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn len(&self) -> usize {
        self.inputs.len()
    }

    fn next(&mut self) -> bool {
        if self.cursor < self.inputs.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn datum(&self) -> &[Input] {
        &self.inputs[self.cursor - 1]
    }

    fn datum_n(&self, n: usize) -> &[Input] {
        &self.inputs[n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(path: &str) -> Vec<Input> {
        vec![Input::new("repo", path, path.as_bytes().to_vec())]
    }

    #[test]
    fn vec_iterator_walks_in_order() {
        let mut dit = VecDatumIterator::new(vec![tuple("a"), tuple("b"), tuple("c")]);
        assert_eq!(dit.len(), 3);
        assert!(!dit.is_empty());

        let mut seen = Vec::new();
        while dit.next() {
            seen.push(dit.datum()[0].path.clone());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(!dit.next());
    }

    #[test]
    fn vec_iterator_reset_restarts() {
        let mut dit = VecDatumIterator::new(vec![tuple("a"), tuple("b")]);
        assert!(dit.next());
        assert!(dit.next());
        assert!(!dit.next());

        dit.reset();
        assert!(dit.next());
        assert_eq!(dit.datum()[0].path, "a");
    }

    #[test]
    fn vec_iterator_random_access() {
        let dit = VecDatumIterator::new(vec![tuple("a"), tuple("b"), tuple("c")]);
        assert_eq!(dit.datum_n(0)[0].path, "a");
        assert_eq!(dit.datum_n(2)[0].path, "c");
    }

    #[test]
    fn empty_iterator() {
        let mut dit = VecDatumIterator::new(Vec::new());
        assert_eq!(dit.len(), 0);
        assert!(dit.is_empty());
        assert!(!dit.next());
    }
}
