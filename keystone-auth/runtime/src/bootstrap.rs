use crate::files;
use anyhow::{anyhow, Context, Result};
use keystone_auth_core::{PolicySet, SyncConfig};
use keystone_auth_k8s_api::{
    parse_policy, parse_sync_config, ConfigKind, ConfigMap, ObjectKey, ResourceExt,
    TrackedConfigMaps,
};
use keystone_auth_k8s_controller::ConfigMapStore;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};

/// Where the initial policy and sync configuration come from.
#[derive(Clone, Debug, Default)]
pub struct Sources {
    pub tracked: TrackedConfigMaps,
    pub policy_file: Option<PathBuf>,
    pub sync_config_file: Option<PathBuf>,
}

/// The configuration the process starts with.
#[derive(Debug)]
pub struct Bootstrap {
    pub policy: PolicySet,
    pub sync_config: SyncConfig,

    /// The resource versions of the ConfigMaps that were read.
    pub observed: Vec<(ObjectKey, String)>,
}

/// Resolves the initial configuration.
///
/// A ConfigMap provides the baseline and a local file, when configured,
/// overrides it. Without either source the policy is empty and the sync
/// configuration takes its defaults. Any configured source that cannot be read
/// or parsed fails startup, as does an invalid sync configuration.
pub async fn resolve<S: ConfigMapStore>(sources: &Sources, store: Option<&S>) -> Result<Bootstrap> {
    let mut observed = Vec::new();

    let mut policy = None;
    if let Some(cm) = fetch(sources, ConfigKind::Policy, store, &mut observed).await? {
        let p = parse_policy(&cm)?;
        debug!(rules = p.len(), "Read policy ConfigMap");
        policy = Some(p);
    }
    if let Some(path) = sources.policy_file.as_deref() {
        let p = files::load_policy(path)?;
        info!(path = %path.display(), rules = p.len(), "Loaded policy file");
        policy = Some(p);
    }

    let mut sync_config = None;
    if let Some(cm) = fetch(sources, ConfigKind::SyncConfig, store, &mut observed).await? {
        let sc = parse_sync_config(&cm)?;
        debug!(?sc, "Read sync ConfigMap");
        sync_config = Some(sc);
    }
    if let Some(path) = sources.sync_config_file.as_deref() {
        let sc = files::load_sync_config(path)?;
        info!(path = %path.display(), "Loaded sync config file");
        sync_config = Some(sc);
    }

    let policy = policy.unwrap_or_else(|| {
        info!("No policy configured; all authorization requests will be denied");
        PolicySet::default()
    });
    let sync_config = sync_config.unwrap_or_default();
    sync_config
        .validate()
        .context("invalid sync configuration")?;

    Ok(Bootstrap {
        policy,
        sync_config,
        observed,
    })
}

async fn fetch<S: ConfigMapStore>(
    sources: &Sources,
    kind: ConfigKind,
    store: Option<&S>,
    observed: &mut Vec<(ObjectKey, String)>,
) -> Result<Option<Arc<ConfigMap>>> {
    let Some(key) = sources.tracked.key(kind) else {
        return Ok(None);
    };
    let store =
        store.ok_or_else(|| anyhow!("a cluster client is required to read ConfigMap {key}"))?;
    let cm = store
        .fetch(&key)
        .await?
        .ok_or_else(|| anyhow!("ConfigMap {key} not found"))?;
    if let Some(version) = cm.resource_version() {
        observed.push((key, version));
    }
    Ok(Some(cm))
}
