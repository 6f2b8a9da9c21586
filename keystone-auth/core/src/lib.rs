#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod attributes;
mod identity;
mod policy;
mod state;
mod sync_config;

pub use self::{
    attributes::{
        AccessAttributes, AuthorizeError, Decision, NonResourceRequest, Request, ResourceRequest,
        Verdict,
    },
    identity::Identity,
    policy::{PolicySet, Rule},
    state::SharedState,
    sync_config::{SyncConfig, SyncConfigError, ALLOWED_DATA_TYPES},
};
use thiserror::Error;

/// Validates bearer tokens against the identity provider.
#[async_trait::async_trait]
pub trait Authenticator {
    /// Returns the identity a token belongs to, or `None` if the token is not
    /// accepted.
    async fn authenticate_token(&self, token: &str) -> anyhow::Result<Option<Identity>>;
}

/// Evaluates access requests against a policy set.
#[async_trait::async_trait]
pub trait Authorizer {
    /// Evaluates `attrs` against `policy`.
    ///
    /// The policy passed here is never empty; the webhook denies requests
    /// without consulting the authorizer when no rules are configured.
    async fn authorize(
        &self,
        policy: &PolicySet,
        attrs: &AccessAttributes,
    ) -> Result<Verdict, AuthorizeError>;
}

/// Errors produced while decoding configuration payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid policy: {0}")]
    Policy(#[from] serde_json::Error),

    #[error("invalid sync config: {0}")]
    SyncConfig(#[from] serde_yaml::Error),

    #[error(transparent)]
    Invalid(#[from] SyncConfigError),
}
