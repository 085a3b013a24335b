//! Controller runtime.
//!
//! A fixed pool of workers drains the work queue while the main loop polls
//! the resource store for manifest changes, watches each resource's source
//! for new revisions and keeps the store lease alive.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::resource::{ResourceId, ResourceStore};
use crate::source::SourceProvider;
use crate::store::{ControllerLease, LEASE_EXPIRY_SECS};

use super::backoff::Backoff;
use super::queue::WorkQueue;
use super::reconciler::{Reconciler, Requeue};

/// Runs reconciliations for every resource in a store.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    resources: Arc<dyn ResourceStore>,
    sources: Arc<dyn SourceProvider>,
    queue: Arc<WorkQueue>,
    workers: usize,
    poll_interval: Duration,
    lease: Option<ControllerLease>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("resources", &self.resources.backend_type())
            .field("workers", &self.workers)
            .field("poll_interval", &self.poll_interval)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller with one worker and a 10s poll interval.
    #[must_use]
    pub fn new(
        reconciler: Arc<Reconciler>,
        resources: Arc<dyn ResourceStore>,
        backoff: Backoff,
    ) -> Self {
        Self {
            sources: reconciler.sources(),
            reconciler,
            resources,
            queue: Arc::new(WorkQueue::new(backoff)),
            workers: 1,
            poll_interval: Duration::from_secs(10),
            lease: None,
        }
    }

    /// Sets the number of concurrent workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets how often the resource store is polled for changes.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Holds a store lease for the lifetime of the controller.
    #[must_use]
    pub fn with_lease(mut self, lease: ControllerLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Returns the work queue.
    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Runs until `shutdown` resolves or the lease is lost.
    ///
    /// On shutdown no new passes start; passes already running finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease was taken over by another controller.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            reconciler,
            resources,
            sources,
            queue,
            workers,
            poll_interval,
            mut lease,
        } = self;

        info!("Starting controller with {workers} worker(s), polling every {poll_interval:?}");

        let mut tasks = JoinSet::new();
        for index in 0..workers {
            tasks.spawn(worker(index, Arc::clone(&reconciler), Arc::clone(&queue)));
        }

        let mut known = BTreeMap::new();
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut renew = tokio::time::interval(Duration::from_secs(
            LEASE_EXPIRY_SECS.unsigned_abs() / 3,
        ));
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renew.tick().await;

        tokio::pin!(shutdown);
        let mut result = Ok(());
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, waiting for running reconciliations");
                    break;
                }
                _ = poll.tick() => {
                    poll_resources(resources.as_ref(), sources.as_ref(), &queue, &mut known).await;
                }
                _ = renew.tick(), if lease.is_some() => {
                    if let Some(held) = lease.as_mut()
                        && let Err(e) = held.renew().await
                    {
                        error!("Lost the controller lease: {e}");
                        lease = None;
                        result = Err(e);
                        break;
                    }
                }
            }
        }

        queue.shut_down();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {e}");
            }
        }

        if let Some(held) = lease
            && let Err(e) = held.release().await
        {
            warn!("Failed to release the controller lease: {e}");
        }

        info!("Controller stopped");
        result
    }
}

async fn worker(index: usize, reconciler: Arc<Reconciler>, queue: Arc<WorkQueue>) {
    debug!("Worker {index} started");
    while let Some(id) = queue.get().await {
        match reconciler.reconcile(&id).await {
            Ok(outcome) => schedule(&queue, &id, outcome.requeue),
            Err(e) => {
                let delay = queue.add_rate_limited(id.clone());
                error!("Reconciliation of {id} failed, retrying in {delay:?}: {e}");
            }
        }
        queue.done(&id);
    }
    debug!("Worker {index} stopped");
}

fn schedule(queue: &WorkQueue, id: &ResourceId, requeue: Requeue) {
    match requeue {
        Requeue::Resync(interval) => {
            queue.forget(id);
            queue.add_after(id.clone(), interval);
        }
        Requeue::After(delay) => queue.add_after(id.clone(), delay),
        Requeue::Backoff => {
            let delay = queue.add_rate_limited(id.clone());
            info!("Retrying {id} in {delay:?} ({} failure(s))", queue.failures(id));
        }
        Requeue::Forget => queue.remove(id),
    }
}

/// What the last poll saw of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
    version: String,
    revision: Option<String>,
}

/// Queues every resource whose manifest version or source revision changed
/// since the last poll.
async fn poll_resources(
    resources: &dyn ResourceStore,
    sources: &dyn SourceProvider,
    queue: &WorkQueue,
    known: &mut BTreeMap<ResourceId, Observed>,
) {
    let current = match resources.list().await {
        Ok(current) => current,
        Err(e) => {
            warn!("Failed to list resources: {e}");
            return;
        }
    };

    let mut observed = BTreeMap::new();
    for (id, version) in current {
        let previous = known.get(&id);
        let revision = match source_revision(resources, sources, &id).await {
            Some(revision) => Some(revision),
            None => previous.and_then(|p| p.revision.clone()),
        };

        if previous.map(|p| &p.version) != Some(&version) {
            debug!("Resource {id} changed (version {version})");
            queue.add(id.clone());
        } else if revision.is_some()
            && previous.and_then(|p| p.revision.as_ref()) != revision.as_ref()
        {
            info!(
                "Source of {id} moved to {}",
                revision.as_deref().unwrap_or_default()
            );
            queue.add(id.clone());
        }
        observed.insert(id, Observed { version, revision });
    }

    for id in known.keys() {
        if !observed.contains_key(id) {
            info!("Resource {id} removed");
            queue.remove(id);
        }
    }
    *known = observed;
}

/// Current revision of a resource's source; `None` when unknown.
async fn source_revision(
    resources: &dyn ResourceStore,
    sources: &dyn SourceProvider,
    id: &ResourceId,
) -> Option<String> {
    let resource = resources.get(id).await.ok()?;
    match sources
        .artifact(&resource.spec.source_ref, &id.namespace)
        .await
    {
        Ok(artifact) => artifact.map(|a| a.revision),
        Err(e) => {
            debug!("Source lookup for {id} failed: {e}");
            None
        }
    }
}
