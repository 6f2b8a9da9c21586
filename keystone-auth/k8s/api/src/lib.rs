#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod configmap;
mod object_key;

pub use self::{
    configmap::{parse_policy, parse_sync_config, ConfigKind, ConfigMapError, TrackedConfigMaps},
    object_key::ObjectKey,
};
pub use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
pub use kube::ResourceExt;

/// The namespace holding the policy and sync ConfigMaps.
pub const CONFIGMAP_NAMESPACE: &str = "kube-system";

/// The ConfigMap data entry holding the JSON policy list.
pub const POLICY_DATA_KEY: &str = "policies";

/// The ConfigMap data entry holding the YAML sync configuration.
pub const SYNC_CONFIG_DATA_KEY: &str = "syncConfig";
