//! The job chain: admission, datum set algebra, lifecycle, cascade.
//!
//! A chain sequences overlapping datum-processing jobs. Each admitted job
//! declares an ordered datum sequence; the chain decides which datums the job
//! must process itself and which it inherits from prior jobs, then streams
//! the former through a [`JobDatumIterator`](crate::JobDatumIterator) as
//! ancestor jobs finish.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::datum::{DatumHash, DatumSet, JobData};
use crate::error::{ChainError, Result};
use crate::hasher::DatumHasher;
use crate::iterator::JobDatumIterator;

/// Admission sequence number identifying a job record within its chain.
pub(crate) type JobSeq = u64;

/// Configuration for a job chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Disable datum inheritance: every job processes its full datum set,
    /// still deferring datums shared with live prior jobs until those jobs
    /// finish.
    pub reprocess_all: bool,
}

/// How a deferred datum is released.
enum WaitState {
    /// Shared with the live parent at admission; the parent's outcome
    /// decides whether the datum is covered or must be processed here.
    Inherit {
        /// Admission sequence of the parent job.
        ancestor: JobSeq,
    },
    /// Must be processed by this job regardless of ancestor outcomes;
    /// yieldable once every blocker has finished.
    Reprocess {
        /// Live prior jobs whose datum sets contain this datum.
        blockers: BTreeSet<JobSeq>,
    },
}

/// Outcome recorded when a job succeeds.
struct SuccessOutcome {
    /// Datums the job authoritatively produced (`all \ recovered`).
    success_datums: DatumSet,
    /// Datums the job attempted but did not complete; descendants that
    /// declare them must process them again.
    recovered: DatumSet,
}

/// Per-job state tracked by the chain.
struct JobRecord {
    /// The caller's data handle; doubles as the job's identity for
    /// `succeed`/`fail` (pointer equality).
    data: Arc<dyn JobData>,
    seq: JobSeq,
    /// Declared input position of each datum hash.
    positions: HashMap<DatumHash, usize>,
    /// Set view of `hashes`. Immutable after admission.
    all: DatumSet,
    /// Input positions currently yieldable, drained in ascending order.
    ready: BTreeSet<usize>,
    /// Input positions already handed to the iterator.
    yielded: BTreeSet<usize>,
    /// Datums deferred on prior jobs.
    waiting: HashMap<DatumHash, WaitState>,
    finished: bool,
    /// Some on success, None while live or after failure.
    success: Option<SuccessOutcome>,
}

/// What the iterator should do next for its job.
pub(crate) enum Step {
    /// Yield the datum at this input position.
    Yield(usize),
    /// The stream is exhausted; no more datums will ever arrive.
    Done,
    /// Nothing yieldable yet; wait for an ancestor to finish.
    Blocked,
}

/// Chain state guarded by the single mutex.
struct ChainState {
    /// Datums considered already processed before any job runs.
    base: Option<DatumSet>,
    /// Job records in admission order, youngest last.
    jobs: Vec<JobRecord>,
    next_seq: JobSeq,
}

impl ChainState {
    fn index_of(&self, data: &Arc<dyn JobData>) -> Option<usize> {
        self.jobs.iter().position(|r| Arc::ptr_eq(&r.data, data))
    }
}

/// Decision for one deferred datum when an ancestor finishes.
enum Decision {
    /// The datum becomes yieldable now.
    Release,
    /// A prior output covers the datum; this job will never process it.
    Covered,
    /// The datum is re-homed onto other live prior jobs.
    Rehome(BTreeSet<JobSeq>),
    /// The finished job is removed from the datum's blocker set.
    Unblock,
}

/// Coordinator that sequences overlapping datum-processing jobs.
///
/// Admit jobs with [`start`](JobChain::start), pull their datums through the
/// returned iterator, then report [`succeed`](JobChain::succeed) or
/// [`fail`](JobChain::fail). Completion of one job releases or covers the
/// datums that younger jobs share with it.
///
/// All methods are non-blocking except [`JobDatumIterator::next`]; a single
/// mutex guards the chain and is never held across an await point.
///
/// # Example
///
/// ```ignore
/// let chain = JobChain::new(Arc::new(Sha256Hasher));
/// chain.initialize(base_datums)?;
///
/// let mut jdi = chain.start(job_data.clone())?;
/// while jdi.next(&cancel).await? {
///     process(jdi.datum().unwrap());
/// }
/// chain.succeed(&job_data, recovered)?;
/// ```
pub struct JobChain {
    hasher: Arc<dyn DatumHasher>,
    config: ChainConfig,
    state: Mutex<ChainState>,
    /// Bumped on every mutation that can change an iterator's yieldable
    /// state; blocked iterators watch it.
    version: watch::Sender<u64>,
}

impl fmt::Debug for JobChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JobChain")
            .field("initialized", &state.base.is_some())
            .field("jobs", &state.jobs.len())
            .finish()
    }
}

impl JobChain {
    /// Create a new chain with the default configuration.
    pub fn new(hasher: Arc<dyn DatumHasher>) -> Arc<Self> {
        Self::with_config(hasher, ChainConfig::default())
    }

    /// Create a new chain with the given configuration.
    pub fn with_config(hasher: Arc<dyn DatumHasher>, config: ChainConfig) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            hasher,
            config,
            state: Mutex::new(ChainState {
                base: None,
                jobs: Vec::new(),
                next_seq: 0,
            }),
            version,
        })
    }

    /// Fix the base datum set: datums considered already processed before
    /// any job runs.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` on a second call.
    pub fn initialize(&self, base_datums: DatumSet) -> Result<()> {
        let mut state = self.state.lock();
        if state.base.is_some() {
            return Err(ChainError::AlreadyInitialized);
        }
        info!(datums = base_datums.len(), "job chain initialized");
        state.base = Some(base_datums);
        Ok(())
    }

    /// Whether the base datum set has been fixed.
    pub fn initialized(&self) -> bool {
        self.state.lock().base.is_some()
    }

    /// Admit a job and return the iterator that streams its datums.
    ///
    /// The job's declared sequence is read and hashed up front. Datums not
    /// covered by the base or by prior jobs are yieldable immediately;
    /// datums shared with live prior jobs are deferred until those jobs
    /// finish.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before [`initialize`](JobChain::initialize);
    /// `DuplicateDatum` if the same hash appears twice in the sequence.
    pub fn start(self: &Arc<Self>, data: Arc<dyn JobData>) -> Result<JobDatumIterator> {
        let mut dit = data.iterator();
        dit.reset();
        let declared = dit.len();
        let mut inputs = Vec::with_capacity(declared);
        let mut hashes = Vec::with_capacity(declared);
        let mut positions = HashMap::with_capacity(declared);
        let mut all = DatumSet::with_capacity(declared);
        while dit.next() {
            let datum = dit.datum().to_vec();
            let hash = self.hasher.hash(&datum);
            if !all.insert(hash.clone()) {
                return Err(ChainError::DuplicateDatum { hash });
            }
            positions.insert(hash.clone(), inputs.len());
            hashes.push(hash);
            inputs.push(datum);
        }

        let mut state = self.state.lock();
        if state.base.is_none() {
            return Err(ChainError::NotInitialized);
        }

        // The parent is the youngest prior job (live or succeeded; failed
        // jobs are never retained as the tip), falling back to the base set.
        let parent_seq = state.jobs.last().map(|p| p.seq);
        let (parent_all, parent_live, parent_recovered) = match state.jobs.last() {
            Some(p) => (&p.all, !p.finished, p.success.as_ref().map(|o| &o.recovered)),
            None => (state.base.as_ref().expect("initialized"), false, None),
        };

        let additive_only =
            !self.config.reprocess_all && parent_all.iter().all(|hash| all.contains(hash));

        let mut ready = BTreeSet::new();
        let mut waiting = HashMap::new();
        if additive_only {
            // Novel datums yield immediately; datums shared with the parent
            // take its outcome: recovered ones are processed here, the rest
            // are inherited from its output.
            for (pos, hash) in hashes.iter().enumerate() {
                if !parent_all.contains(hash) {
                    ready.insert(pos);
                } else if parent_live {
                    let ancestor = parent_seq.expect("live parent is a job");
                    waiting.insert(hash.clone(), WaitState::Inherit { ancestor });
                } else if parent_recovered.is_some_and(|r| r.contains(hash)) {
                    ready.insert(pos);
                }
            }
        } else {
            // A job with a subtractive delta cannot extend any prior output:
            // it processes every declared datum itself, deferring only on
            // live prior jobs that contain the datum.
            for (pos, hash) in hashes.iter().enumerate() {
                let blockers: BTreeSet<JobSeq> = state
                    .jobs
                    .iter()
                    .filter(|p| !p.finished && p.all.contains(hash))
                    .map(|p| p.seq)
                    .collect();
                if blockers.is_empty() {
                    ready.insert(pos);
                } else {
                    waiting.insert(hash.clone(), WaitState::Reprocess { blockers });
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(
            job = seq,
            datums = hashes.len(),
            ready = ready.len(),
            deferred = waiting.len(),
            additive_only,
            "job admitted"
        );
        state.jobs.push(JobRecord {
            data,
            seq,
            positions,
            all,
            ready,
            yielded: BTreeSet::new(),
            waiting,
            finished: false,
            success: None,
        });
        drop(state);

        Ok(JobDatumIterator::new(
            Arc::clone(self),
            seq,
            inputs,
            additive_only,
        ))
    }

    /// Report a job as successfully completed.
    ///
    /// `recovered` names the declared datums the job attempted but did not
    /// complete; any younger job that declares them must process them again.
    ///
    /// # Errors
    ///
    /// `ItemsRemaining` while the job's iterator is not drained;
    /// `InvalidRecovered` if `recovered` names an undeclared datum;
    /// `AlreadyFinished` / `UnknownJob` for finished or dropped jobs.
    pub fn succeed(&self, data: &Arc<dyn JobData>, recovered: DatumSet) -> Result<()> {
        let mut state = self.state.lock();
        if state.base.is_none() {
            return Err(ChainError::NotInitialized);
        }
        let idx = state.index_of(data).ok_or(ChainError::UnknownJob)?;
        {
            let rec = &state.jobs[idx];
            if rec.finished {
                return Err(ChainError::AlreadyFinished);
            }
            let remaining = rec.ready.len() + rec.waiting.len();
            if remaining > 0 {
                return Err(ChainError::ItemsRemaining { remaining });
            }
            if let Some(hash) = recovered.iter().find(|h| !rec.all.contains(*h)) {
                return Err(ChainError::InvalidRecovered { hash: hash.clone() });
            }
        }

        let rec = &mut state.jobs[idx];
        let seq = rec.seq;
        let yielded = rec.yielded.len();
        let recovered_count = recovered.len();
        rec.finished = true;
        rec.success = Some(SuccessOutcome {
            success_datums: rec.all.difference(&recovered).cloned().collect(),
            recovered,
        });
        Self::cascade(&mut state, idx);
        Self::prune(&mut state);
        drop(state);

        self.version.send_modify(|v| *v = v.wrapping_add(1));
        info!(job = seq, yielded, recovered = recovered_count, "job succeeded");
        Ok(())
    }

    /// Report a job as failed. Legal at any point, even before its iterator
    /// was drained; remaining datums are abandoned and the iterator reports
    /// end-of-stream.
    ///
    /// # Errors
    ///
    /// `AlreadyFinished` / `UnknownJob` for finished or dropped jobs.
    pub fn fail(&self, data: &Arc<dyn JobData>) -> Result<()> {
        let mut state = self.state.lock();
        if state.base.is_none() {
            return Err(ChainError::NotInitialized);
        }
        let idx = state.index_of(data).ok_or(ChainError::UnknownJob)?;
        let rec = &mut state.jobs[idx];
        if rec.finished {
            return Err(ChainError::AlreadyFinished);
        }
        let seq = rec.seq;
        rec.finished = true;
        rec.success = None;
        rec.ready.clear();
        rec.waiting.clear();
        Self::cascade(&mut state, idx);
        Self::prune(&mut state);
        drop(state);

        self.version.send_modify(|v| *v = v.wrapping_add(1));
        warn!(job = seq, "job failed");
        Ok(())
    }

    /// Propagate a finished job's outcome to every live younger job.
    fn cascade(state: &mut ChainState, finished_idx: usize) {
        let finished_seq = state.jobs[finished_idx].seq;
        let recovered = state.jobs[finished_idx]
            .success
            .as_ref()
            .map(|o| o.recovered.clone());

        for j in finished_idx + 1..state.jobs.len() {
            if state.jobs[j].finished {
                continue;
            }
            // Decide every transition with the jobs list immutable, then
            // apply to the one record.
            let decisions: Vec<(DatumHash, Decision)> = {
                let jobs = &state.jobs;
                let base = state.base.as_ref().expect("initialized");
                jobs[j]
                    .waiting
                    .iter()
                    .filter_map(|(hash, wait)| {
                        let decision = match wait {
                            WaitState::Inherit { ancestor } if *ancestor == finished_seq => {
                                match &recovered {
                                    Some(recovered) if recovered.contains(hash) => Decision::Release,
                                    Some(_) => Decision::Covered,
                                    None => Self::redistribute(jobs, base, finished_idx, hash),
                                }
                            }
                            WaitState::Reprocess { blockers } if blockers.contains(&finished_seq) => {
                                if blockers.len() == 1 {
                                    Decision::Release
                                } else {
                                    Decision::Unblock
                                }
                            }
                            _ => return None,
                        };
                        Some((hash.clone(), decision))
                    })
                    .collect()
            };

            let released = decisions
                .iter()
                .filter(|(_, d)| matches!(d, Decision::Release))
                .count();
            let rec = &mut state.jobs[j];
            for (hash, decision) in decisions {
                match decision {
                    Decision::Release => {
                        rec.waiting.remove(&hash);
                        rec.ready.insert(rec.positions[&hash]);
                    }
                    Decision::Covered => {
                        rec.waiting.remove(&hash);
                    }
                    Decision::Rehome(blockers) => {
                        rec.waiting
                            .insert(hash, WaitState::Reprocess { blockers });
                    }
                    Decision::Unblock => {
                        if let Some(WaitState::Reprocess { blockers }) = rec.waiting.get_mut(&hash)
                        {
                            blockers.remove(&finished_seq);
                        }
                    }
                }
            }
            if released > 0 {
                debug!(
                    job = rec.seq,
                    ancestor = finished_seq,
                    released,
                    "datums released by ancestor completion"
                );
            }
        }
    }

    /// Re-home one datum a job inherited from a now-failed parent.
    ///
    /// The failed output is void, so the datum falls back to whatever older
    /// output would have held it: live older jobs containing it become
    /// outcome-independent blockers; otherwise the youngest finished older
    /// job decides by its success/recovered sets; otherwise the base covers
    /// it or the datum is released.
    fn redistribute(
        jobs: &[JobRecord],
        base: &DatumSet,
        failed_idx: usize,
        hash: &DatumHash,
    ) -> Decision {
        let blockers: BTreeSet<JobSeq> = jobs[..failed_idx]
            .iter()
            .filter(|p| !p.finished && p.all.contains(hash))
            .map(|p| p.seq)
            .collect();
        if !blockers.is_empty() {
            return Decision::Rehome(blockers);
        }
        for prior in jobs[..failed_idx].iter().rev() {
            if let Some(outcome) = &prior.success {
                if outcome.success_datums.contains(hash) {
                    return Decision::Covered;
                }
                if outcome.recovered.contains(hash) {
                    return Decision::Release;
                }
            }
        }
        if base.contains(hash) {
            return Decision::Covered;
        }
        Decision::Release
    }

    /// Drop job records nothing can reference anymore.
    ///
    /// Failed jobs go immediately: their outcome has already cascaded.
    /// Succeeded jobs stay while a younger live job may still need their
    /// sets for redistribution, or while they are the tip (the parent for
    /// the next admission).
    fn prune(state: &mut ChainState) {
        let before = state.jobs.len();
        state
            .jobs
            .retain(|r| !(r.finished && r.success.is_none()));

        let mut keep = vec![true; state.jobs.len()];
        let mut live_younger = false;
        for idx in (0..state.jobs.len()).rev() {
            if state.jobs[idx].finished {
                keep[idx] = live_younger || idx == state.jobs.len() - 1;
            } else {
                live_younger = true;
            }
        }
        let mut idx = 0;
        state.jobs.retain(|_| {
            let retained = keep[idx];
            idx += 1;
            retained
        });

        let removed = before - state.jobs.len();
        if removed > 0 {
            debug!(removed, remaining = state.jobs.len(), "pruned finished jobs");
        }
    }

    /// Advance the given job's cursor by one datum, if possible.
    pub(crate) fn step(&self, seq: JobSeq) -> Step {
        let mut state = self.state.lock();
        let Some(rec) = state.jobs.iter_mut().find(|r| r.seq == seq) else {
            // The job finished and was pruned while its iterator lived on.
            return Step::Done;
        };
        if let Some(pos) = rec.ready.pop_first() {
            rec.yielded.insert(pos);
            return Step::Yield(pos);
        }
        if rec.finished || rec.waiting.is_empty() {
            Step::Done
        } else {
            Step::Blocked
        }
    }

    /// Snapshot count of the given job's immediately yieldable datums.
    pub(crate) fn available(&self, seq: JobSeq) -> usize {
        let state = self.state.lock();
        state
            .jobs
            .iter()
            .find(|r| r.seq == seq)
            .map_or(0, |r| r.ready.len())
    }

    /// Subscribe to chain mutations; used by iterators to block.
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
