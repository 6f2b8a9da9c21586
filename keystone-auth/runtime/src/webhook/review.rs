use keystone_auth_core::{AccessAttributes, Identity, NonResourceRequest, Request, ResourceRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

static NULL: Value = Value::Null;

/// A TokenReview or SubjectAccessReview envelope.
///
/// Fields other than the discriminators and the spec are preserved so that they
/// can be echoed back in the response.
#[derive(Debug, Deserialize)]
pub(super) struct Review {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    spec: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenReviewSpec {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubjectAccessReviewSpec {
    user: String,
    #[serde(default, alias = "groups")]
    group: Option<Vec<String>>,
    #[serde(default)]
    extra: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    resource_attributes: Option<ResourceAttributes>,
    #[serde(default)]
    non_resource_attributes: Option<NonResourceAttributes>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourceAttributes {
    verb: String,
    namespace: String,
    group: String,
    version: String,
    resource: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NonResourceAttributes {
    verb: String,
    path: String,
}

#[derive(Debug, Serialize)]
pub(super) struct TokenReviewStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Identity>,
}

#[derive(Debug, Serialize)]
pub(super) struct SubjectAccessReviewStatus {
    pub allowed: bool,
}

// === impl Review ===

impl Review {
    /// Decodes the review's spec. A missing spec fails to decode.
    pub fn spec<'r, T: Deserialize<'r>>(&'r self) -> serde_json::Result<T> {
        match &self.spec {
            Some(spec) => T::deserialize(spec),
            None => T::deserialize(&NULL),
        }
    }

    /// Builds the response document: the original envelope with `status`
    /// set. The spec is echoed only if `keep_spec` is set.
    pub fn respond(self, keep_spec: bool, status: &impl Serialize) -> serde_json::Result<Value> {
        let Self {
            api_version,
            kind,
            spec,
            mut rest,
        } = self;
        rest.insert("apiVersion".to_string(), Value::String(api_version));
        rest.insert("kind".to_string(), Value::String(kind));
        if let Some(spec) = spec.filter(|_| keep_spec) {
            rest.insert("spec".to_string(), spec);
        }
        rest.insert("status".to_string(), serde_json::to_value(status)?);
        Ok(Value::Object(rest))
    }
}

// === impl SubjectAccessReviewSpec ===

impl SubjectAccessReviewSpec {
    /// Returns `None` if the spec describes neither a resource nor a
    /// non-resource request.
    pub fn into_attributes(self) -> Option<AccessAttributes> {
        let request = match (self.resource_attributes, self.non_resource_attributes) {
            (Some(ra), _) => Request::Resource(ResourceRequest {
                verb: ra.verb,
                namespace: ra.namespace,
                api_group: ra.group,
                api_version: ra.version,
                resource: ra.resource,
                name: ra.name,
            }),
            (None, Some(nra)) => Request::NonResource(NonResourceRequest {
                verb: nra.verb,
                path: nra.path,
            }),
            (None, None) => return None,
        };

        Some(AccessAttributes {
            user: self.user,
            groups: self.group.unwrap_or_default(),
            extra: self.extra.unwrap_or_default(),
            request,
        })
    }
}
