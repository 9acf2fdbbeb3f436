//! Error types for the job chain.

use snafu::Snafu;

use crate::datum::DatumHash;

/// Result type for chain operations.
pub type Result<T, E = ChainError> = std::result::Result<T, E>;

/// Errors that can occur in the job chain.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ChainError {
    /// The chain has not been given its base datum set yet.
    #[snafu(display("job chain is not initialized"))]
    NotInitialized,

    /// The chain was initialized twice.
    #[snafu(display("job chain has already been initialized"))]
    AlreadyInitialized,

    /// The job was never admitted, or has been dropped from the chain.
    #[snafu(display("job is not tracked by this chain"))]
    UnknownJob,

    /// The job has already succeeded or failed.
    #[snafu(display("job has already finished"))]
    AlreadyFinished,

    /// The job was reported successful before its iterator was drained.
    #[snafu(display("job has {remaining} datums remaining"))]
    ItemsRemaining {
        /// Number of datums still to be yielded or released.
        remaining: usize,
    },

    /// The recovered set contains a datum the job never declared.
    #[snafu(display("recovered datum {hash} is not part of the job"))]
    InvalidRecovered {
        /// The offending datum hash.
        hash: DatumHash,
    },

    /// The same datum hash appears twice in one job's declared inputs.
    #[snafu(display("duplicate datum {hash} in job inputs"))]
    DuplicateDatum {
        /// The offending datum hash.
        hash: DatumHash,
    },

    /// Datum iteration was canceled externally.
    #[snafu(display("datum iteration was canceled"))]
    Canceled,
}
