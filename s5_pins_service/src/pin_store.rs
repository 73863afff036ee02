//! Persistent, bounded-concurrency scheduler for pin requests.
//!
//! Every pin request is written to the ledger as `queued` before any work
//! starts. Jobs are dispatched in FIFO order to at most
//! `PinStoreConfig::concurrency` workers. A worker either adds a reference
//! to content that is already pinned locally, or connects to the declared
//! origins, marks the record `pinning`, fetches the content and records the
//! outcome.
//!
//! Lock order is CID lock, then worker permit, then record lock. The CID lock
//! is held across the duplicate check, the fetch and every reference count
//! update for that CID. A job never holds a permit while it waits for a CID
//! lock.

use crate::config::PinStoreConfig;
use crate::locks::{KeyedLocks, ShardedLocks};
use anyhow::anyhow;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use s5_pins_core::listing::filter_records;
use s5_pins_core::origins::{MAX_DELEGATES, connect_with_policy};
use s5_pins_core::{
    Cid, ContentPins, Datastore, ListQuery, ListResult, Network, Pin, PinLedger, PinRecord,
    PinningError, PinningResult, Status,
};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

type JobKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Running,
    Abandoned,
}

/// In-memory handle of a queued or running pin request.
#[derive(Debug)]
struct Job {
    owner: String,
    id: String,
    cancel: CancellationToken,
    /// Cancelled once the worker stopped touching the record.
    done: CancellationToken,
    phase: Mutex<Phase>,
}

impl Job {
    fn key(&self) -> JobKey {
        (self.owner.clone(), self.id.clone())
    }

    /// Claims the job for a worker. Returns false if it was cancelled while
    /// waiting in the queue.
    fn begin(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == Phase::Abandoned || self.cancel.is_cancelled() {
            *phase = Phase::Abandoned;
            return false;
        }
        *phase = Phase::Running;
        true
    }

    /// Cancels the job and waits for its worker to settle.
    async fn abort(&self) {
        self.cancel.cancel();
        let running = {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            match *phase {
                Phase::Waiting => {
                    *phase = Phase::Abandoned;
                    false
                }
                Phase::Running => true,
                Phase::Abandoned => false,
            }
        };
        if running {
            self.done.cancelled().await;
        }
    }
}

/// Hands out strictly increasing creation timestamps in milliseconds.
#[derive(Debug, Default)]
struct Clock {
    last: Mutex<i64>,
}

impl Clock {
    fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = now.max(*last + 1);
        *last = next;
        next
    }

    fn observe(&self, created: i64) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if created > *last {
            *last = created;
        }
    }
}

#[derive(Debug)]
struct Inner {
    ledger: PinLedger,
    content: Arc<dyn ContentPins>,
    network: Arc<dyn Network>,
    config: PinStoreConfig,
    permits: Arc<Semaphore>,
    queue: mpsc::UnboundedSender<Arc<Job>>,
    pending_queue: Mutex<Option<mpsc::UnboundedReceiver<Arc<Job>>>>,
    jobs: DashMap<JobKey, Arc<Job>>,
    record_locks: ShardedLocks,
    cid_locks: KeyedLocks<Cid>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    clock: Clock,
}

/// The pinning service's job scheduler.
///
/// Cheap to clone; all clones share the same queue and workers.
#[derive(Debug, Clone)]
pub struct PinStore {
    inner: Arc<Inner>,
}

impl PinStore {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        content: Arc<dyn ContentPins>,
        network: Arc<dyn Network>,
        config: PinStoreConfig,
    ) -> Self {
        let (queue, pending_queue) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                ledger: PinLedger::new(datastore, config.datastore_prefix.clone()),
                content,
                network,
                permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
                config,
                queue,
                pending_queue: Mutex::new(Some(pending_queue)),
                jobs: DashMap::new(),
                record_locks: ShardedLocks::new(),
                cid_locks: KeyedLocks::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                clock: Clock::default(),
            }),
        }
    }

    /// Resumes every `queued` or `pinning` record found in the ledger and
    /// starts dispatching jobs. Calling it again has no effect.
    ///
    /// A store cannot be restarted once stopped, `start` then fails. A new
    /// store over the same datastore picks the unfinished records up.
    pub async fn start(&self) -> PinningResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(anyhow!("pin store was stopped and cannot be restarted").into());
        }
        let Some(queue) = self
            .inner
            .pending_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };
        let records = match self.inner.ledger.all().await {
            Ok(records) => records,
            Err(err) => {
                *self
                    .inner
                    .pending_queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(queue);
                return Err(err.into());
            }
        };

        if let Some(latest) = records.iter().map(|r| r.created).max() {
            self.inner.clock.observe(latest);
        }
        let mut unfinished: Vec<PinRecord> = records
            .into_iter()
            .filter(|r| matches!(r.status, Status::Queued | Status::Pinning))
            .collect();
        unfinished.sort_by_key(|r| r.created);
        info!(count = unfinished.len(), "resuming unfinished pin jobs");
        for record in &unfinished {
            self.inner.enqueue(&record.owner, &record.id);
        }

        self.inner.tracker.spawn(dispatch(
            Arc::downgrade(&self.inner),
            queue,
            self.inner.permits.clone(),
            self.inner.shutdown.clone(),
        ));
        Ok(())
    }

    /// Cancels all in-flight jobs and waits for them to settle. Ledger
    /// entries are left untouched, a new store over the same ledger resumes
    /// them on `start`. This store rejects any later `start`.
    pub async fn stop(&self) {
        info!("stopping pin store");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.jobs.clear();
    }

    /// Records a new pin request and queues it. The returned record is
    /// `queued`; progress is observed through `get` and `list`.
    pub async fn pin(&self, owner: &str, pin: Pin) -> PinningResult<PinRecord> {
        if self.inner.shutdown.is_cancelled() {
            return Err(anyhow!("pin store is stopped").into());
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        let record = PinRecord::new(id, owner.to_owned(), self.inner.clock.next(), pin);
        self.inner.ledger.put(&record).await?;
        debug!(owner, id = %record.id, cid = %record.pin.cid, "pin queued");
        self.inner.enqueue(owner, &record.id);
        Ok(record)
    }

    pub async fn get(&self, owner: &str, id: &str) -> PinningResult<Option<PinRecord>> {
        Ok(self.inner.ledger.get(owner, id).await?)
    }

    pub async fn list(&self, owner: &str, query: &ListQuery) -> PinningResult<ListResult<PinRecord>> {
        let records = self.inner.ledger.list_owner(owner).await?;
        Ok(filter_records(records, query))
    }

    /// Replaces the pin of an existing request.
    ///
    /// A different CID cancels the request and creates a new one with a new
    /// id. Otherwise name, origins and metadata are updated in place.
    pub async fn update(&self, owner: &str, id: &str, pin: Pin) -> PinningResult<PinRecord> {
        let Some(existing) = self.inner.ledger.get(owner, id).await? else {
            return Err(PinningError::NotFound);
        };
        if existing.pin.cid != pin.cid {
            self.cancel(owner, id).await?;
            return self.pin(owner, pin).await;
        }

        let _guard = self.inner.record_lock(owner, id).await;
        let Some(mut record) = self.inner.ledger.get(owner, id).await? else {
            return Err(PinningError::NotFound);
        };
        record.pin.name = pin.name;
        record.pin.origins = pin.origins;
        record.pin.meta = pin.meta;
        self.inner.ledger.put(&record).await?;
        Ok(record)
    }

    /// Cancels a request and removes its record.
    ///
    /// A running job is aborted and awaited first. If the record had reached
    /// `pinned`, one reference to its content is released. The record is
    /// deleted even if releasing the content fails. Cancelling an unknown id
    /// is a no-op.
    pub async fn cancel(&self, owner: &str, id: &str) -> PinningResult<()> {
        let key = (owner.to_owned(), id.to_owned());
        let job = self.inner.jobs.get(&key).map(|j| j.value().clone());
        if let Some(job) = job {
            job.abort().await;
            self.inner.jobs.remove_if(&key, |_, j| Arc::ptr_eq(j, &job));
        }

        // the job has settled, so only a pinned record needs the CID lock
        loop {
            let Some(record) = self.inner.ledger.get(owner, id).await? else {
                return Ok(());
            };
            let pinned = record.status == Status::Pinned;
            let _cid_guard = if pinned {
                Some(self.inner.cid_locks.lock(&record.pin.cid).await)
            } else {
                None
            };
            let _guard = self.inner.record_lock(owner, id).await;
            let Some(record) = self.inner.ledger.get(owner, id).await? else {
                return Ok(());
            };
            if (record.status == Status::Pinned) != pinned {
                continue;
            }

            if pinned && let Err(err) = self.inner.release(&record.pin.cid).await {
                warn!(owner, id, cid = %record.pin.cid, "failed to unpin content: {err:#}");
            }
            self.inner.ledger.delete(owner, id).await?;
            info!(owner, id, "pin request removed");
            return Ok(());
        }
    }

    /// Addresses clients should connect to, capped at the protocol limit.
    pub fn delegates(&self) -> Vec<String> {
        let mut addrs = self.inner.network.local_addrs();
        addrs.truncate(MAX_DELEGATES);
        addrs
    }
}

impl Inner {
    fn enqueue(&self, owner: &str, id: &str) {
        let job = Arc::new(Job {
            owner: owner.to_owned(),
            id: id.to_owned(),
            cancel: self.shutdown.child_token(),
            done: CancellationToken::new(),
            phase: Mutex::new(Phase::Waiting),
        });
        match self.jobs.entry(job.key()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(entry) => {
                entry.insert(job.clone());
            }
        }
        if self.queue.send(job).is_err() {
            warn!(owner, id, "pin queue is closed, job will resume on next start");
        }
    }

    async fn record_lock(&self, owner: &str, id: &str) -> OwnedMutexGuard<()> {
        self.record_locks.lock(&(owner, id)).await
    }

    async fn run_job(self: Arc<Self>, job: Arc<Job>, permit: OwnedSemaphorePermit) {
        let _done = job.done.clone().drop_guard();
        if let Err(err) = self.process(&job, permit).await {
            error!(owner = %job.owner, id = %job.id, "pin job could not be recorded: {err:#}");
        }
        self.jobs.remove_if(&job.key(), |_, j| Arc::ptr_eq(j, &job));
    }

    async fn process(&self, job: &Job, permit: OwnedSemaphorePermit) -> anyhow::Result<()> {
        if job.cancel.is_cancelled() {
            return Ok(());
        }
        let Some(record) = self.ledger.get(&job.owner, &job.id).await? else {
            debug!(owner = %job.owner, id = %job.id, "pin record vanished before its job ran");
            return Ok(());
        };
        let cid = record.pin.cid.clone();

        // a job waiting behind another fetch of the same CID gives its
        // worker slot back until it holds the lock
        let (_cid_guard, _permit) = match self.cid_locks.try_lock(&cid) {
            Some(guard) => (guard, permit),
            None => {
                drop(permit);
                debug!(owner = %job.owner, id = %job.id, %cid, "waiting for another job on the same cid");
                let guard = tokio::select! {
                    biased;
                    _ = job.cancel.cancelled() => return Ok(()),
                    guard = self.cid_locks.lock(&cid) => guard,
                };
                let permit = tokio::select! {
                    biased;
                    _ = job.cancel.cancelled() => return Ok(()),
                    permit = self.permits.clone().acquire_owned() => permit?,
                };
                (guard, permit)
            }
        };

        match self.content.get(&cid).await {
            Ok(Some(local)) => {
                let ref_count = local.ref_count + 1;
                if let Err(err) = self.content.set_ref_count(&cid, ref_count).await {
                    return self.fail(job, format!("{err:#}")).await;
                }
                debug!(%cid, ref_count, "content already pinned, added a reference");
                self.set_status(job, Status::Pinned, false, None).await?;
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => return self.fail(job, format!("{err:#}")).await,
        }

        if !record.pin.origins.is_empty() {
            match connect_with_policy(
                self.network.as_ref(),
                &record.pin.origins,
                self.config.on_connect_failure,
                &job.cancel,
            )
            .await
            {
                Ok(()) => {}
                Err(PinningError::Cancelled) => return Ok(()),
                Err(err) => return self.fail(job, err.to_string()).await,
            }
        }

        if !self.set_status(job, Status::Pinning, true, None).await? {
            return Ok(());
        }

        match self.content.add(&cid, 1, &job.cancel).await {
            Ok(()) => {
                // written even if cancelled meanwhile, `cancel` then unpins
                self.set_status(job, Status::Pinned, false, None).await?;
                info!(owner = %job.owner, id = %job.id, %cid, "pinned");
            }
            Err(_) if job.cancel.is_cancelled() => {
                debug!(owner = %job.owner, id = %job.id, "fetch aborted");
            }
            Err(err) => self.fail(job, format!("{err:#}")).await?,
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, reason: String) -> anyhow::Result<()> {
        warn!(owner = %job.owner, id = %job.id, "pin failed: {reason}");
        self.set_status(job, Status::Failed, true, Some(reason))
            .await
            .map(|_| ())
    }

    /// Read-modify-write of the record status under the record lock.
    /// Returns false if nothing was written.
    async fn set_status(
        &self,
        job: &Job,
        status: Status,
        unless_cancelled: bool,
        reason: Option<String>,
    ) -> anyhow::Result<bool> {
        let _guard = self.record_lock(&job.owner, &job.id).await;
        if unless_cancelled && job.cancel.is_cancelled() {
            return Ok(false);
        }
        let Some(mut record) = self.ledger.get(&job.owner, &job.id).await? else {
            return Ok(false);
        };
        record.status = status;
        if let Some(reason) = reason {
            record.info.insert("error".to_owned(), reason);
        }
        self.ledger.put(&record).await?;
        Ok(true)
    }

    /// Drops one reference to `cid`, unpinning it with the last one.
    /// Callers hold the CID lock.
    async fn release(&self, cid: &Cid) -> anyhow::Result<()> {
        match self.content.get(cid).await? {
            None => Ok(()),
            Some(local) if local.ref_count < 2 => {
                debug!(%cid, "last reference released, unpinning");
                self.content.rm(cid).await
            }
            Some(local) => self.content.set_ref_count(cid, local.ref_count - 1).await,
        }
    }
}

async fn dispatch(
    inner: Weak<Inner>,
    mut queue: mpsc::UnboundedReceiver<Arc<Job>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if !job.begin() {
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let worker = inner.clone();
        inner.tracker.spawn(async move {
            worker.run_job(job, permit).await;
        });
    }
    debug!("pin dispatcher stopped");
}
