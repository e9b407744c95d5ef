//! Sharded execution runtime for the consent engine.
//!
//! The submission and invalidation workflows hand work to the runtime as
//! messages instead of calling the engine inline. Each shard is one worker
//! thread with a bounded queue, and every job for a given key is routed to the
//! same shard, so recomputes for one key run strictly in submission order while
//! other keys proceed on other shards.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consent::{ConsentId, ConsentKey, ConsentRecord};
use crate::engine::{ConsentEngine, SubmitOutcome};
use crate::error::{ConsentError, ConsentResult, ExecutionError, ValidationError};
use crate::status::PatientConsentStatus;

/// Chooses the shard that owns a key.
pub trait KeyRouter: Send + Sync {
    /// Returns a shard index in `0..shards`. Must be stable for a key.
    fn route(&self, key: &ConsentKey, shards: usize) -> usize;
}

/// Routes by hashing the key.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashRouter;

impl KeyRouter for HashRouter {
    fn route(&self, key: &ConsentKey, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let shards = shards.max(1) as u64;
        #[allow(clippy::cast_possible_truncation)]
        let shard = (hasher.finish() % shards) as usize;
        shard
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of shards (one worker thread each).
    pub shards: usize,
    /// Maximum queued jobs per shard.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Reject configurations that could never run a job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.shards == 0 {
            return Err(ValidationError::InvalidRuntimeConfig {
                reason: "shards must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidRuntimeConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

enum Job {
    Submit {
        record: ConsentRecord,
        reply: Sender<ConsentResult<SubmitOutcome>>,
    },
    Invalidate {
        consent_id: ConsentId,
        reply: Sender<ConsentResult<PatientConsentStatus>>,
    },
    Recompute {
        key: ConsentKey,
        reply: Sender<ConsentResult<PatientConsentStatus>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

impl Job {
    fn run(self, engine: &ConsentEngine) {
        // A dropped handle means nobody is waiting; the work itself is done.
        match self {
            Self::Submit { record, reply } => {
                let _ = reply.send(engine.submit_consent(record));
            }
            Self::Invalidate { consent_id, reply } => {
                let _ = reply.send(engine.invalidate(consent_id));
            }
            Self::Recompute { key, reply } => {
                let _ = reply.send(engine.recompute_key(key));
            }

            #[cfg(test)]
            Self::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

struct Shard {
    tx: Sender<Job>,
    worker: JoinHandle<()>,
    queue_capacity: usize,
}

impl Shard {
    fn start(index: usize, queue_capacity: usize, engine: Arc<ConsentEngine>) -> ConsentResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let worker = thread::Builder::new()
            .name(format!("consent-shard-{index}"))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job.run(&engine);
                }
                debug!(shard = index, "consent shard stopped");
            })
            .map_err(|e| ConsentError::internal(format!("failed to spawn consent shard {index}: {e}")))?;

        Ok(Self {
            tx,
            worker,
            queue_capacity,
        })
    }

    fn try_submit(&self, index: usize, job: Job) -> ConsentResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(shard = index, capacity = self.queue_capacity, "consent shard queue full");
                Err(ConsentError::Execution(ExecutionError::QueueFull {
                    shard: index,
                    capacity: self.queue_capacity,
                }))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(ConsentError::Execution(ExecutionError::Disconnected { shard: index }))
            }
        }
    }

    fn shutdown(self) {
        // Closing the channel lets the worker drain queued jobs, then exit.
        drop(self.tx);
        let _ = self.worker.join();
    }
}

/// Handle for a job queued on the runtime.
pub struct JobHandle<T> {
    shard: usize,
    rx: Receiver<ConsentResult<T>>,
}

impl<T> JobHandle<T> {
    /// Returns the shard the job was routed to.
    #[must_use]
    pub const fn shard(&self) -> usize {
        self.shard
    }

    /// Waits for the job to complete.
    pub fn join(self) -> ConsentResult<T> {
        self.rx
            .recv()
            .map_err(|_| ConsentError::Execution(ExecutionError::Disconnected { shard: self.shard }))?
    }

    /// Waits for the job to complete with a timeout.
    ///
    /// Timing out does not cancel the job; it still runs to completion.
    pub fn join_timeout(self, timeout: Duration) -> ConsentResult<T> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ConsentError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => {
                ConsentError::Execution(ExecutionError::Disconnected { shard: self.shard })
            }
        })?
    }
}

/// A sharded runtime that serializes work per key.
pub struct ConsentRuntime<R: KeyRouter = HashRouter> {
    router: R,
    engine: Arc<ConsentEngine>,
    shards: Vec<Shard>,
}

impl ConsentRuntime<HashRouter> {
    /// Create a runtime with the default router.
    pub fn new(engine: ConsentEngine, config: RuntimeConfig) -> ConsentResult<Self> {
        Self::with_router(engine, HashRouter, config)
    }
}

impl<R: KeyRouter> ConsentRuntime<R> {
    /// Create a runtime with a custom router.
    pub fn with_router(engine: ConsentEngine, router: R, config: RuntimeConfig) -> ConsentResult<Self> {
        config.validate()?;
        let engine = Arc::new(engine);
        let shards = (0..config.shards)
            .map(|index| Shard::start(index, config.queue_capacity, Arc::clone(&engine)))
            .collect::<ConsentResult<Vec<_>>>()?;
        Ok(Self {
            router,
            engine,
            shards,
        })
    }

    /// Returns the shard that owns a key.
    #[must_use]
    pub fn shard_for(&self, key: &ConsentKey) -> usize {
        self.router.route(key, self.shards.len()).min(self.shards.len() - 1)
    }

    fn dispatch<T>(&self, key: &ConsentKey, make: impl FnOnce(Sender<ConsentResult<T>>) -> Job) -> ConsentResult<JobHandle<T>> {
        let shard = self.shard_for(key);
        let (tx, rx) = bounded::<ConsentResult<T>>(1);
        self.shards[shard].try_submit(shard, make(tx))?;
        Ok(JobHandle { shard, rx })
    }

    /// Queue a consent submission on the record's shard.
    pub fn submit_consent_async(&self, record: ConsentRecord) -> ConsentResult<JobHandle<SubmitOutcome>> {
        let key = record.key();
        self.dispatch(&key, |reply| Job::Submit { record, reply })
    }

    /// Queue an invalidation on the shard of the record's key.
    pub fn invalidate_async(&self, consent_id: ConsentId) -> ConsentResult<JobHandle<PatientConsentStatus>> {
        let record = self
            .engine
            .consent_store()
            .get(consent_id)
            .map_err(ConsentEngine::storage_err)?
            .ok_or(ConsentError::Execution(ExecutionError::ConsentNotFound { id: consent_id }))?;
        self.dispatch(&record.key(), |reply| Job::Invalidate { consent_id, reply })
    }

    /// Queue a recompute on the key's shard.
    pub fn recompute_async(&self, key: ConsentKey) -> ConsentResult<JobHandle<PatientConsentStatus>> {
        self.dispatch(&key, |reply| Job::Recompute { key, reply })
    }

    /// Submit a consent and wait for its recompute.
    pub fn submit_consent(&self, record: ConsentRecord) -> ConsentResult<SubmitOutcome> {
        self.submit_consent_async(record)?.join()
    }

    /// Invalidate a consent and wait for its recompute.
    pub fn invalidate(&self, consent_id: ConsentId) -> ConsentResult<PatientConsentStatus> {
        self.invalidate_async(consent_id)?.join()
    }

    /// Recompute a key and wait for the result.
    pub fn recompute(&self, key: ConsentKey) -> ConsentResult<PatientConsentStatus> {
        self.recompute_async(key)?.join()
    }

    /// Returns a shared reference to the underlying engine.
    ///
    /// Reads (`get_status` and friends) go straight to the engine.
    #[must_use]
    pub fn engine(&self) -> &ConsentEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, shard: usize, duration: Duration) -> ConsentResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.shards[shard].try_submit(shard, Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl<R: KeyRouter> Drop for ConsentRuntime<R> {
    fn drop(&mut self) {
        for shard in std::mem::take(&mut self.shards) {
            shard.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use crate::consent::{ParentId, PatientId, ProgrammeId};
    use crate::status::ConsentStatus;
    use crate::storage::InMemoryStores;
    use crate::vaccine::VaccineMethod;

    /// Sends every key to one fixed shard.
    struct FixedRouter(usize);

    impl KeyRouter for FixedRouter {
        fn route(&self, _key: &ConsentKey, _shards: usize) -> usize {
            self.0
        }
    }

    fn engine() -> ConsentEngine {
        let stores = InMemoryStores::new();
        ConsentEngine::new(Arc::new(stores.consents), Arc::new(stores.statuses))
    }

    fn key() -> ConsentKey {
        ConsentKey::new(PatientId::new(), ProgrammeId::new())
    }

    fn given(key: ConsentKey) -> ConsentRecord {
        ConsentRecord::builder()
            .key(key)
            .parent(ParentId::new())
            .given([VaccineMethod::Injection])
            .build()
            .unwrap()
    }

    #[test]
    fn zero_shards_is_rejected() {
        let err = ConsentRuntime::new(
            engine(),
            RuntimeConfig {
                shards: 0,
                queue_capacity: 8,
            },
        )
        .err()
        .unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"shards": 2}"#).unwrap();
        assert_eq!(config.shards, 2);
        assert_eq!(config.queue_capacity, RuntimeConfig::default().queue_capacity);
    }

    #[test]
    fn hash_router_is_stable_and_in_range() {
        let router = HashRouter;
        let k = key();
        let shard = router.route(&k, 8);
        assert!(shard < 8);
        assert_eq!(router.route(&k, 8), shard);
        assert_eq!(router.route(&k, 1), 0);
    }

    #[test]
    fn submit_and_invalidate_through_runtime() {
        let runtime = ConsentRuntime::new(engine(), RuntimeConfig::default()).unwrap();
        let k = key();

        let outcome = runtime.submit_consent(given(k)).unwrap();
        assert_eq!(outcome.status.status, ConsentStatus::Given);

        let status = runtime.invalidate(outcome.consent_id).unwrap();
        assert_eq!(status.status, ConsentStatus::NoResponse);
        assert_eq!(
            runtime.engine().get_status(k.patient_id, k.programme_id).unwrap(),
            status
        );
    }

    #[test]
    fn invalidate_unknown_consent_fails_before_queueing() {
        let runtime = ConsentRuntime::new(engine(), RuntimeConfig::default()).unwrap();
        let err = runtime.invalidate_async(ConsentId::new()).err().unwrap();
        assert!(matches!(
            err,
            ConsentError::Execution(ExecutionError::ConsentNotFound { .. })
        ));
    }

    #[test]
    fn jobs_for_one_key_share_a_shard() {
        let runtime = ConsentRuntime::new(engine(), RuntimeConfig::default()).unwrap();
        let k = key();
        let a = runtime.submit_consent_async(given(k)).unwrap();
        let b = runtime.recompute_async(k).unwrap();
        assert_eq!(a.shard(), b.shard());
        assert_eq!(a.shard(), runtime.shard_for(&k));
        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn busy_shard_does_not_block_other_shards() {
        let runtime = ConsentRuntime::with_router(
            engine(),
            FixedRouter(1),
            RuntimeConfig {
                shards: 2,
                queue_capacity: 4,
            },
        )
        .unwrap();

        let sleep = runtime.submit_sleep(0, Duration::from_millis(200)).unwrap();

        let started = Instant::now();
        let status = runtime
            .recompute_async(key())
            .unwrap()
            .join_timeout(Duration::from_millis(100))
            .unwrap();
        assert_eq!(status.status, ConsentStatus::NoResponse);
        assert!(started.elapsed() < Duration::from_millis(150));

        sleep.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn full_queue_is_reported() {
        let runtime = ConsentRuntime::with_router(
            engine(),
            FixedRouter(0),
            RuntimeConfig {
                shards: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        // One job running, one queued: the next must be refused.
        let running = runtime.submit_sleep(0, Duration::from_millis(200)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let queued = runtime.submit_sleep(0, Duration::from_millis(1)).unwrap();

        let err = runtime.recompute_async(key()).err().unwrap();
        assert!(matches!(
            err,
            ConsentError::Execution(ExecutionError::QueueFull { shard: 0, capacity: 1 })
        ));
        assert!(err.is_retryable());

        running.recv_timeout(Duration::from_secs(1)).unwrap();
        queued.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<ConsentResult<PatientConsentStatus>>(1);
        drop(tx);

        let handle = JobHandle { shard: 2, rx };
        let err = handle.join().unwrap_err();
        let ConsentError::Execution(ExecutionError::Disconnected { shard }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(shard, 2);
    }

    #[test]
    fn join_timeout_reports_timeout_while_job_pending() {
        let (_tx, rx) = bounded::<ConsentResult<PatientConsentStatus>>(1);
        let handle = JobHandle { shard: 0, rx };
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            ConsentError::Execution(ExecutionError::Timeout { duration_ms: 10 })
        ));
    }
}
