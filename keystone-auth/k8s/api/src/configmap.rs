use crate::{ObjectKey, CONFIGMAP_NAMESPACE, POLICY_DATA_KEY, SYNC_CONFIG_DATA_KEY};
use k8s_openapi::api::core::v1::ConfigMap;
use keystone_auth_core::{ParseError, PolicySet, SyncConfig};
use thiserror::Error;

/// What a tracked ConfigMap configures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Policy,
    SyncConfig,
}

/// The ConfigMaps (in [`CONFIGMAP_NAMESPACE`]) that configure the webhook.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackedConfigMaps {
    policy: Option<String>,
    sync_config: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigMapError {
    #[error("ConfigMap {key} has no {data_key:?} entry")]
    MissingData {
        key: ObjectKey,
        data_key: &'static str,
    },

    #[error("failed to parse {data_key:?} in ConfigMap {key}: {source}")]
    Parse {
        key: ObjectKey,
        data_key: &'static str,
        #[source]
        source: ParseError,
    },
}

// === impl TrackedConfigMaps ===

impl TrackedConfigMaps {
    /// Empty names are treated as unset.
    pub fn new(policy: Option<String>, sync_config: Option<String>) -> Self {
        Self {
            policy: policy.filter(|n| !n.is_empty()),
            sync_config: sync_config.filter(|n| !n.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.policy.is_none() && self.sync_config.is_none()
    }

    pub fn name(&self, kind: ConfigKind) -> Option<&str> {
        match kind {
            ConfigKind::Policy => self.policy.as_deref(),
            ConfigKind::SyncConfig => self.sync_config.as_deref(),
        }
    }

    pub fn key(&self, kind: ConfigKind) -> Option<ObjectKey> {
        self.name(kind)
            .map(|name| ObjectKey::new(CONFIGMAP_NAMESPACE, name))
    }

    /// Returns what the object identified by `key` configures. Nothing is
    /// returned for objects outside of the tracked namespace and names. A
    /// single ConfigMap may be configured to serve both purposes.
    pub fn kinds<'k>(&'k self, key: &'k ObjectKey) -> impl Iterator<Item = ConfigKind> + 'k {
        let in_namespace = key.namespace == CONFIGMAP_NAMESPACE;
        [ConfigKind::Policy, ConfigKind::SyncConfig]
            .into_iter()
            .filter(move |kind| in_namespace && self.name(*kind) == Some(key.name.as_str()))
    }

    pub fn is_tracked(&self, key: &ObjectKey) -> bool {
        self.kinds(key).next().is_some()
    }
}

/// Reads the policy list from a ConfigMap.
pub fn parse_policy(cm: &ConfigMap) -> Result<PolicySet, ConfigMapError> {
    let data = data(cm, POLICY_DATA_KEY)?;
    PolicySet::from_json(data).map_err(|source| ConfigMapError::Parse {
        key: ObjectKey::of(cm),
        data_key: POLICY_DATA_KEY,
        source,
    })
}

/// Reads and validates the sync configuration from a ConfigMap.
pub fn parse_sync_config(cm: &ConfigMap) -> Result<SyncConfig, ConfigMapError> {
    let data = data(cm, SYNC_CONFIG_DATA_KEY)?;
    SyncConfig::from_yaml(data)
        .and_then(|sc| {
            sc.validate()?;
            Ok(sc)
        })
        .map_err(|source| ConfigMapError::Parse {
            key: ObjectKey::of(cm),
            data_key: SYNC_CONFIG_DATA_KEY,
            source,
        })
}

fn data<'c>(cm: &'c ConfigMap, data_key: &'static str) -> Result<&'c str, ConfigMapError> {
    cm.data
        .as_ref()
        .and_then(|data| data.get(data_key))
        .map(String::as_str)
        .ok_or_else(|| ConfigMapError::MissingData {
            key: ObjectKey::of(cm),
            data_key,
        })
}
