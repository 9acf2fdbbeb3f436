//! Per-job streaming cursor over the datums a job must process.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chain::{JobChain, JobSeq, Step};
use crate::datum::Input;
use crate::error::{ChainError, Result};

/// Streaming cursor over the datums a job must process itself.
///
/// Produced by [`JobChain::start`]. Datums come out in the job's declared
/// input order among those currently yieldable; more become yieldable as
/// ancestor jobs finish. [`next`](JobDatumIterator::next) blocks until a
/// datum is available, the stream ends, or the cancellation token fires.
#[derive(Debug)]
pub struct JobDatumIterator {
    chain: Arc<JobChain>,
    seq: JobSeq,
    /// The job's declared input tuples, immutable after admission.
    inputs: Vec<Vec<Input>>,
    additive_only: bool,
    version: watch::Receiver<u64>,
    current: Option<usize>,
}

impl JobDatumIterator {
    pub(crate) fn new(
        chain: Arc<JobChain>,
        seq: JobSeq,
        inputs: Vec<Vec<Input>>,
        additive_only: bool,
    ) -> Self {
        let version = chain.subscribe();
        Self {
            chain,
            seq,
            inputs,
            additive_only,
            version,
            current: None,
        }
    }

    /// Advance to the next datum the job must process.
    ///
    /// Returns `Ok(true)` and stages the datum for [`datum`](Self::datum)
    /// when one is yieldable. Returns `Ok(false)` once no further datum will
    /// ever arrive: the job finished, or everything left was inherited from
    /// ancestors. Otherwise blocks until an ancestor completion changes the
    /// picture.
    ///
    /// The token is only consulted at the block point: available datums are
    /// yielded even through a cancelled token.
    ///
    /// # Errors
    ///
    /// `Canceled` when the token fires while blocked.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<bool> {
        loop {
            match self.chain.step(self.seq) {
                Step::Yield(pos) => {
                    self.current = Some(pos);
                    return Ok(true);
                }
                Step::Done => return Ok(false),
                Step::Blocked => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ChainError::Canceled),
                changed = self.version.changed() => {
                    if changed.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// The input tuple staged by the most recent successful
    /// [`next`](Self::next), or `None` before the first.
    pub fn datum(&self) -> Option<&[Input]> {
        self.current.map(|pos| self.inputs[pos].as_slice())
    }

    /// Snapshot count of datums yieldable right now without blocking.
    pub fn num_available(&self) -> usize {
        self.chain.available(self.seq)
    }

    /// Total number of datums the job declared.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether the job declared no datums at all.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Whether the job's datum set is a superset of its parent's, making it
    /// a pure extension that inherits every shared datum.
    pub fn additive_only(&self) -> bool {
        self.additive_only
    }
}
