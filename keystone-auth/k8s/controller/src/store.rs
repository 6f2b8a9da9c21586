use futures::prelude::*;
use keystone_auth_k8s_api::{ConfigMap, ObjectKey};
use kube::runtime::{
    reflector::{self, ObjectRef},
    watcher,
};
use std::sync::Arc;
use thiserror::Error;

/// Looks up the current state of ConfigMaps.
#[async_trait::async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// Returns `None` if the ConfigMap does not exist.
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Arc<ConfigMap>>, StoreError>;

    /// Completes once the store reflects an initial listing of the cluster.
    async fn synced(&self) {}
}

#[derive(Debug, Error)]
#[error("failed to fetch ConfigMap {key}: {source}")]
pub struct StoreError {
    pub key: ObjectKey,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl StoreError {
    pub fn new(
        key: ObjectKey,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            key,
            source: source.into(),
        }
    }
}

#[async_trait::async_trait]
impl<S: ConfigMapStore + ?Sized> ConfigMapStore for Arc<S> {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Arc<ConfigMap>>, StoreError> {
        (**self).fetch(key).await
    }

    async fn synced(&self) {
        (**self).synced().await
    }
}

/// Reads from the local watch cache.
#[async_trait::async_trait]
impl ConfigMapStore for reflector::Store<ConfigMap> {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Arc<ConfigMap>>, StoreError> {
        Ok(self.get(&ObjectRef::new(&key.name).within(&key.namespace)))
    }

    async fn synced(&self) {
        if let Err(error) = self.wait_until_ready().await {
            tracing::debug!(%error, "ConfigMap cache will never be ready");
        }
    }
}

/// Reads directly from the API server.
#[async_trait::async_trait]
impl ConfigMapStore for kube::Client {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Arc<ConfigMap>>, StoreError> {
        let api = kube::Api::<ConfigMap>::namespaced(self.clone(), &key.namespace);
        match api.get_opt(&key.name).await {
            Ok(cm) => Ok(cm.map(Arc::new)),
            Err(error) => Err(StoreError::new(key.clone(), error)),
        }
    }
}

/// Feeds watch events through a reflector so that the cache behind the
/// writer's [`reflector::Store`] tracks the watched ConfigMaps.
pub fn cache_events<S>(
    mut writer: reflector::store::Writer<ConfigMap>,
    events: S,
) -> impl Stream<Item = watcher::Event<ConfigMap>> + Send + 'static
where
    S: Stream<Item = watcher::Event<ConfigMap>> + Send + 'static,
{
    events.inspect(move |ev| writer.apply_watcher_event(ev))
}
