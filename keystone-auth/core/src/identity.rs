use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A subject validated by the identity provider.
///
/// Serializes to the `user` block of a TokenReview status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}
