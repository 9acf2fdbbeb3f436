//! Concurrency coordinator for incremental datum processing.
//!
//! A [`JobChain`] sequences overlapping data-processing jobs so that each
//! job only processes the datums whose outputs could differ from prior
//! jobs' outputs, while respecting the partial order between jobs: a job's
//! datums shared with older, still-running jobs are deferred until those
//! jobs succeed or fail.
//!
//! Jobs declare an ordered sequence of datums (input tuples identified by a
//! stable content hash). The chain computes, against the base set and every
//! prior job, which datums the new job must process itself; the caller
//! pulls those through a [`JobDatumIterator`], which releases more work as
//! ancestors complete.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use datum_chain::{JobChain, Sha256Hasher};
//! use tokio_util::sync::CancellationToken;
//!
//! let chain = JobChain::new(Arc::new(Sha256Hasher));
//! chain.initialize(base_datums)?;
//!
//! let mut jdi = chain.start(Arc::clone(&job_data))?;
//! let cancel = CancellationToken::new();
//! while jdi.next(&cancel).await? {
//!     process(jdi.datum().unwrap());
//! }
//! chain.succeed(&job_data, recovered_datums)?;
//! ```

#![warn(missing_docs)]

mod chain;
mod datum;
mod error;
mod hasher;
mod iterator;

pub use chain::{ChainConfig, JobChain};
pub use datum::{DatumHash, DatumIterator, DatumSet, Input, JobData, VecDatumIterator};
pub use error::{ChainError, Result};
pub use hasher::{DatumHasher, Sha256Hasher};
pub use iterator::JobDatumIterator;
