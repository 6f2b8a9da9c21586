//! A Kubernetes authentication and authorization webhook.
//!
//! The webhook answers `TokenReview` and `SubjectAccessReview` requests from
//! the API server by delegating to an [`Authenticator`] and an [`Authorizer`]
//! supplied by the embedding binary. The authorization policy and the sync
//! configuration are read from local files and/or ConfigMaps in
//! `kube-system`; changes to the ConfigMaps are applied while the webhook
//! keeps serving.
//!
//! A binary typically parses [`Args`] and passes a closure that builds its
//! collaborators from the [`Context`].

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use keystone_auth_runtime::{
    bootstrap, controller, core, files, k8s, webhook, Args, Context, Webhook, WebhookMetrics,
    WEBHOOK_PATH,
};
pub use keystone_auth_runtime::core::{
    AccessAttributes, Authenticator, AuthorizeError, Authorizer, Decision, Identity, PolicySet,
    SharedState, SyncConfig, Verdict,
};
