use crate::{
    metrics::{ControllerMetrics, Observed, Reconciled},
    queue::WorkQueue,
    store::{ConfigMapStore, StoreError},
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use keystone_auth_core::{PolicySet, SharedState, SyncConfig};
use keystone_auth_k8s_api::{
    parse_policy, parse_sync_config, ConfigKind, ConfigMap, ConfigMapError, ObjectKey,
    ResourceExt, TrackedConfigMaps,
};
use kube::runtime::watcher;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// The number of times a failing key is retried before it is dropped.
pub const MAX_RETRIES: usize = 5;

/// Keeps the shared policy and sync configuration converged with the tracked
/// ConfigMaps.
///
/// Watch events are turned into work items by an [`Intake`]; a single worker
/// re-reads each item's ConfigMap from the store and applies it.
pub struct Controller<S> {
    tracked: TrackedConfigMaps,
    state: SharedState,
    store: S,
    queue: WorkQueue<ObjectKey>,
    metrics: ControllerMetrics,
}

/// Turns watch events for tracked ConfigMaps into work items.
///
/// Remembers the last resource version observed for each tracked ConfigMap so
/// that redelivered snapshots are not reprocessed.
pub struct Intake {
    tracked: TrackedConfigMaps,
    queue: WorkQueue<ObjectKey>,
    metrics: ControllerMetrics,
    observed: HashMap<ObjectKey, String>,
    relist: Option<Relist>,
}

/// Tracked ConfigMaps seen since the watch last started a relist.
///
/// The cache only reflects a relist once it completes, so changed keys are
/// held back until then.
#[derive(Default)]
struct Relist {
    seen: HashSet<ObjectKey>,
    changed: Vec<ObjectKey>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ConfigMap(#[from] ConfigMapError),
}

// === impl Controller ===

impl<S: ConfigMapStore> Controller<S> {
    pub fn new(
        tracked: TrackedConfigMaps,
        state: SharedState,
        store: S,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            tracked,
            state,
            store,
            queue: WorkQueue::new(),
            metrics,
        }
    }

    /// Returns an intake feeding this controller's queue.
    pub fn intake(&self) -> Intake {
        Intake {
            tracked: self.tracked.clone(),
            queue: self.queue.clone(),
            metrics: self.metrics.clone(),
            observed: HashMap::new(),
            relist: None,
        }
    }

    /// Processes watch events until `shutdown` is signaled. Work items are
    /// processed once the store has synced. On shutdown, the items already
    /// queued are processed before the shutdown is released; if the store
    /// never synced, nothing is processed.
    pub async fn run<E>(self, mut intake: Intake, events: E, shutdown: drain::Watch)
    where
        S: 'static,
        E: Stream<Item = watcher::Event<ConfigMap>> + Send + 'static,
    {
        let controller = Arc::new(self);
        let worker = tokio::spawn({
            let controller = controller.clone();
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    () = controller.store.synced() => debug!("ConfigMap cache synced"),
                    _release = shutdown.signaled() => {
                        debug!("Shutdown before the ConfigMap cache synced");
                        return;
                    }
                }
                while controller.process_next().await {}
                debug!("Work queue drained");
            }
            .instrument(info_span!("worker"))
        });

        let events = events.fuse();
        tokio::pin!(events);
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);
        let release = loop {
            tokio::select! {
                biased;
                release = &mut shutdown => break release,
                ev = events.next() => match ev {
                    Some(ev) => intake.handle(ev),
                    None => {
                        debug!("Watch terminated");
                        break (&mut shutdown).await;
                    }
                },
            }
        };

        controller.queue.shut_down();
        if let Err(error) = release.release_after(worker).await {
            error!(%error, "Worker failed");
        }
    }

    /// Processes a single work item. Returns false once the queue has shut
    /// down and drained.
    pub async fn process_next(&self) -> bool {
        let key = match self.queue.get().await {
            Some(key) => key,
            None => return false,
        };

        match self.reconcile(&key).await {
            Ok(()) => {
                self.queue.forget(&key);
                self.metrics.reconciled(&key, Reconciled::Ok);
            }
            Err(error) => {
                let retries = self.queue.num_requeues(&key);
                if retries < MAX_RETRIES {
                    let delay = self.queue.add_rate_limited(key.clone());
                    warn!(%key, %error, retries, ?delay, "Failed to reconcile ConfigMap; retrying");
                    self.metrics.reconciled(&key, Reconciled::Retry);
                } else {
                    self.queue.forget(&key);
                    error!(%key, %error, "Dropping ConfigMap out of the queue");
                    self.metrics.reconciled(&key, Reconciled::Dropped);
                }
            }
        }

        self.queue.done(&key);
        true
    }

    /// Applies the current state of the ConfigMap identified by `key`.
    ///
    /// A missing policy ConfigMap resets the policy to the empty set, denying
    /// every request. A missing sync ConfigMap resets the sync configuration to
    /// its defaults. Shared state is left untouched when anything fails.
    #[instrument(skip_all, fields(%key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let kinds = self.tracked.kinds(key).collect::<Vec<_>>();
        if kinds.is_empty() {
            return Ok(());
        }

        let cm = self.store.fetch(key).await?;
        let Some(cm) = cm else {
            for kind in kinds {
                match kind {
                    ConfigKind::Policy => {
                        info!("Policy ConfigMap deleted; denying all requests");
                        self.state.set_policy(PolicySet::default());
                    }
                    ConfigKind::SyncConfig => {
                        info!("Sync ConfigMap deleted; using the default sync configuration");
                        self.state.set_sync_config(SyncConfig::default());
                    }
                }
            }
            return Ok(());
        };

        // Parse everything before touching shared state.
        let mut policy = None;
        let mut sync_config = None;
        for kind in kinds {
            match kind {
                ConfigKind::Policy => policy = Some(parse_policy(&cm)?),
                ConfigKind::SyncConfig => sync_config = Some(parse_sync_config(&cm)?),
            }
        }

        let version = cm.resource_version().unwrap_or_default();
        if let Some(policy) = policy {
            info!(rules = policy.len(), %version, "Updated policy");
            self.state.set_policy(policy);
        }
        if let Some(sync_config) = sync_config {
            info!(?sync_config, %version, "Updated sync configuration");
            self.state.set_sync_config(sync_config);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }
}

// === impl Intake ===

impl Intake {
    /// Marks ConfigMap versions as already applied, e.g. because they were
    /// read while bootstrapping.
    pub fn with_observed(mut self, observed: impl IntoIterator<Item = (ObjectKey, String)>) -> Self {
        for (key, version) in observed {
            if self.tracked.is_tracked(&key) {
                self.observed.insert(key, version);
            }
        }
        self
    }

    pub fn handle(&mut self, event: watcher::Event<ConfigMap>) {
        match event {
            watcher::Event::Init => {
                self.relist = Some(Relist::default());
            }
            watcher::Event::InitApply(cm) => {
                let Some(key) = self.observe(&cm) else {
                    return;
                };
                match self.relist.as_mut() {
                    Some(relist) => relist.changed.push(key),
                    None => self.enqueue(key),
                }
            }
            watcher::Event::Apply(cm) => {
                if let Some(key) = self.observe(&cm) {
                    self.enqueue(key);
                }
            }
            watcher::Event::Delete(cm) => {
                let key = ObjectKey::of(&cm);
                if self.tracked.is_tracked(&key) {
                    self.observed.remove(&key);
                    self.metrics.observed(Observed::Delete);
                    self.enqueue(key);
                }
            }
            watcher::Event::InitDone => {
                let Some(Relist { seen, changed }) = self.relist.take() else {
                    return;
                };
                for key in changed {
                    self.enqueue(key);
                }

                // Anything observed before the relist that did not reappear
                // was deleted while the watch was disconnected.
                let missing = self
                    .observed
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect::<Vec<_>>();
                for key in missing {
                    self.observed.remove(&key);
                    self.metrics.observed(Observed::Delete);
                    self.enqueue(key);
                }
            }
        }
    }

    /// Records the ConfigMap's resource version. Returns its key if it is
    /// tracked and has changed since it was last observed.
    fn observe(&mut self, cm: &ConfigMap) -> Option<ObjectKey> {
        let key = ObjectKey::of(cm);
        if !self.tracked.is_tracked(&key) {
            return None;
        }
        if let Some(relist) = self.relist.as_mut() {
            relist.seen.insert(key.clone());
        }

        let version = cm.resource_version().unwrap_or_default();
        if !version.is_empty() && self.observed.get(&key) == Some(&version) {
            debug!(%key, %version, "Skipping unchanged ConfigMap");
            self.metrics.observed(Observed::ResyncSkipped);
            return None;
        }

        self.observed.insert(key.clone(), version);
        self.metrics.observed(Observed::Apply);
        Some(key)
    }

    fn enqueue(&self, key: ObjectKey) {
        debug!(%key, "Enqueueing ConfigMap");
        self.metrics.enqueued();
        self.queue.add(key);
    }
}
