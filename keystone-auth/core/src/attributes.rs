use std::collections::BTreeMap;
use thiserror::Error;

/// A normalized request to be authorized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessAttributes {
    pub user: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
    pub request: Request,
}

/// What is being accessed: either an API resource or a raw URL path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Resource(ResourceRequest),
    NonResource(NonResourceRequest),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceRequest {
    pub verb: String,
    pub namespace: String,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonResourceRequest {
    pub verb: String,
    pub path: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    NoOpinion,
}

/// The outcome of an authorization check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: String,
}

/// Raised by an [`Authorizer`](crate::Authorizer) that could not reach a
/// decision. The reason is reported to the caller verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct AuthorizeError {
    pub reason: String,
}

// === impl AccessAttributes ===

impl AccessAttributes {
    pub fn verb(&self) -> &str {
        match &self.request {
            Request::Resource(r) => &r.verb,
            Request::NonResource(r) => &r.verb,
        }
    }

    pub fn is_resource_request(&self) -> bool {
        matches!(self.request, Request::Resource(_))
    }
}

// === impl Verdict ===

impl Verdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
        }
    }

    pub fn no_opinion(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::NoOpinion,
            reason: reason.into(),
        }
    }

    /// Only an explicit allow grants access; a deny and an abstention are
    /// reported identically.
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

// === impl AuthorizeError ===

impl AuthorizeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
