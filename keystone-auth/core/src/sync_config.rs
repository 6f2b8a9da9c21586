use crate::ParseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Data types the group synchronizer knows how to copy into the cluster.
pub const ALLOWED_DATA_TYPES: [&str; 2] = ["projects", "role_assignments"];

const PROJECT_ID_PLACEHOLDER: &str = "%i";

/// Drives synchronization of identity-provider data into the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Which kinds of identity-provider data are synchronized.
    pub data_types_to_sync: Vec<String>,

    /// Template for the namespace created per project. `%i` expands to the
    /// project id, `%n` to its name, and `%d` to its domain.
    pub namespace_format: String,

    /// Project ids that are never synchronized.
    pub projects_black_list: Vec<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncConfigError {
    #[error("namespace format {0:?} must contain a %i substring (project id)")]
    MissingProjectId(String),

    #[error("unsupported data type to sync: {0:?}")]
    UnsupportedDataType(String),
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_types_to_sync: ALLOWED_DATA_TYPES.iter().map(ToString::to_string).collect(),
            namespace_format: PROJECT_ID_PLACEHOLDER.to_string(),
            projects_black_list: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Parses a YAML (or JSON) document. Omitted fields take their default
    /// values. The result is not validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ParseError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    pub fn validate(&self) -> Result<(), SyncConfigError> {
        if !self.namespace_format.contains(PROJECT_ID_PLACEHOLDER) {
            return Err(SyncConfigError::MissingProjectId(
                self.namespace_format.clone(),
            ));
        }

        if let Some(dt) = self
            .data_types_to_sync
            .iter()
            .find(|dt| !ALLOWED_DATA_TYPES.contains(&dt.as_str()))
        {
            return Err(SyncConfigError::UnsupportedDataType(dt.clone()));
        }

        Ok(())
    }

    pub fn syncs(&self, data_type: &str) -> bool {
        self.data_types_to_sync.iter().any(|dt| dt == data_type)
    }
}
