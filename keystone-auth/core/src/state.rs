use crate::{PolicySet, SyncConfig};
use parking_lot::RwLock;
use std::sync::Arc;

/// The policy set and sync configuration shared by the reconciliation
/// controller and request handlers.
///
/// Each value is held as an immutable snapshot and replaced wholesale, so
/// readers never observe a partial update. Locks are held only long enough to
/// clone or swap the snapshot pointer.
#[derive(Clone, Debug, Default)]
pub struct SharedState {
    policy: Arc<RwLock<Arc<PolicySet>>>,
    sync_config: Arc<RwLock<Arc<SyncConfig>>>,
}

impl SharedState {
    pub fn new(policy: PolicySet, sync_config: SyncConfig) -> Self {
        Self {
            policy: Arc::new(RwLock::new(Arc::new(policy))),
            sync_config: Arc::new(RwLock::new(Arc::new(sync_config))),
        }
    }

    pub fn policy(&self) -> Arc<PolicySet> {
        self.policy.read().clone()
    }

    pub fn set_policy(&self, policy: PolicySet) {
        let policy = Arc::new(policy);
        *self.policy.write() = policy;
    }

    pub fn sync_config(&self) -> Arc<SyncConfig> {
        self.sync_config.read().clone()
    }

    pub fn set_sync_config(&self, sync_config: SyncConfig) {
        let sync_config = Arc::new(sync_config);
        *self.sync_config.write() = sync_config;
    }
}
