mod metrics;
mod review;

#[cfg(test)]
mod tests;

pub use self::metrics::WebhookMetrics;
use self::review::{
    Review, SubjectAccessReviewSpec, SubjectAccessReviewStatus, TokenReviewSpec, TokenReviewStatus,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{
    header,
    http::{self, StatusCode},
    Request, Response,
};
use keystone_auth_core::{Authenticator, Authorizer, SharedState};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// The only path served by the webhook.
pub const WEBHOOK_PATH: &str = "/webhook";

const AUTHENTICATION_API_VERSION: &str = "authentication.k8s.io/v1beta1";
const AUTHORIZATION_API_VERSION: &str = "authorization.k8s.io/v1beta1";

const TOKEN_REVIEW: &str = "TokenReview";
const SUBJECT_ACCESS_REVIEW: &str = "SubjectAccessReview";
const UNKNOWN: &str = "unknown";

/// Answers TokenReview and SubjectAccessReview requests from the API server.
pub struct Webhook<N, Z> {
    authn: Arc<N>,
    authz: Arc<Z>,
    state: SharedState,
    metrics: WebhookMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// A request the webhook refuses to answer with a review status.
#[derive(Debug)]
struct Rejection {
    status: StatusCode,
    reason: String,
}

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Webhook ===

impl<N, Z> Clone for Webhook<N, Z> {
    fn clone(&self) -> Self {
        Self {
            authn: self.authn.clone(),
            authz: self.authz.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<N, Z, B> tower::Service<Request<B>> for Webhook<N, Z>
where
    N: Authenticator + Send + Sync + 'static,
    Z: Authorizer + Send + Sync + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri());
        if req.method() != http::Method::POST || req.uri().path() != WEBHOOK_PATH {
            return Box::pin(future::ok(
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let webhook = self.clone();
        Box::pin(async move {
            let bytes = req
                .into_body()
                .collect()
                .await
                .map_err(|error| Error::Request(error.into()))?
                .to_bytes();
            Ok(webhook.review(&bytes).await)
        })
    }
}

impl<N, Z> Webhook<N, Z>
where
    N: Authenticator,
    Z: Authorizer,
{
    pub fn new(authn: Arc<N>, authz: Arc<Z>, state: SharedState, metrics: WebhookMetrics) -> Self {
        Self {
            authn,
            authz,
            state,
            metrics,
        }
    }

    /// Answers a review request body.
    pub async fn review(&self, body: &[u8]) -> Response<Body> {
        let review = match serde_json::from_slice::<Review>(body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse review");
                let rsp = Rejection::bad_request(error).into_response();
                self.metrics.request(UNKNOWN, rsp.status());
                return rsp;
            }
        };
        trace!(?review);

        let kind = match review.kind.as_str() {
            TOKEN_REVIEW => TOKEN_REVIEW,
            SUBJECT_ACCESS_REVIEW => SUBJECT_ACCESS_REVIEW,
            _ => UNKNOWN,
        };

        let rsp = match self.dispatch(review).await {
            Ok(rsp) => rsp,
            Err(rejection) => {
                debug!(status = %rejection.status, reason = %rejection.reason, "Rejected review");
                rejection.into_response()
            }
        };
        self.metrics.request(kind, rsp.status());
        rsp
    }

    async fn dispatch(&self, review: Review) -> Result<Response<Body>, Rejection> {
        if review.api_version != AUTHENTICATION_API_VERSION
            && review.api_version != AUTHORIZATION_API_VERSION
        {
            return Err(Rejection::bad_request(format_args!(
                "unknown apiVersion {:?}",
                review.api_version
            )));
        }

        match review.kind.as_str() {
            TOKEN_REVIEW => self.token_review(review).await,
            SUBJECT_ACCESS_REVIEW => self.subject_access_review(review).await,
            kind => Err(Rejection::bad_request(format_args!(
                "unknown kind/apiVersion {:?} {:?}",
                kind, review.api_version
            ))),
        }
    }

    async fn token_review(&self, review: Review) -> Result<Response<Body>, Rejection> {
        let TokenReviewSpec { token } = review.spec().map_err(Rejection::bad_request)?;

        let identity = match self.authn.authenticate_token(&token).await {
            Ok(identity) => identity,
            Err(error) => {
                warn!(%error, "Failed to authenticate token");
                None
            }
        };

        let (code, status) = match identity {
            Some(user) => {
                debug!(username = %user.username, uid = %user.uid, "Authenticated");
                (
                    StatusCode::OK,
                    TokenReviewStatus {
                        authenticated: true,
                        user: Some(user),
                    },
                )
            }
            None => {
                debug!("Token not authenticated");
                (
                    StatusCode::UNAUTHORIZED,
                    TokenReviewStatus {
                        authenticated: false,
                        user: None,
                    },
                )
            }
        };

        let rsp = review.respond(true, &status).map_err(Rejection::internal)?;
        json_response(code, &rsp)
    }

    async fn subject_access_review(&self, review: Review) -> Result<Response<Body>, Rejection> {
        let spec = review
            .spec::<SubjectAccessReviewSpec>()
            .map_err(Rejection::bad_request)?;
        let attrs = spec
            .into_attributes()
            .ok_or_else(|| Rejection::internal("unable to find attributes"))?;
        debug!(
            user = %attrs.user,
            verb = %attrs.verb(),
            resource = attrs.is_resource_request(),
            "Reviewing access"
        );
        trace!(?attrs);

        // The same snapshot is checked and evaluated, even if the policy is
        // replaced concurrently.
        let policy = self.state.policy();
        let allowed = if policy.is_empty() {
            debug!(user = %attrs.user, "No policy configured; denying");
            false
        } else {
            match self.authz.authorize(&policy, &attrs).await {
                Ok(verdict) => {
                    debug!(user = %attrs.user, decision = ?verdict.decision, reason = %verdict.reason, "Authorized");
                    verdict.is_allowed()
                }
                Err(error) => {
                    warn!(user = %attrs.user, %error, "Failed to authorize");
                    return Err(Rejection::internal(error.reason));
                }
            }
        };

        let rsp = review
            .respond(false, &SubjectAccessReviewStatus { allowed })
            .map_err(Rejection::internal)?;
        json_response(StatusCode::OK, &rsp)
    }
}

fn json_response(code: StatusCode, rsp: &serde_json::Value) -> Result<Response<Body>, Rejection> {
    let bytes = serde_json::to_vec_pretty(rsp).map_err(Rejection::internal)?;
    Ok(Response::builder()
        .status(code)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("review response must be valid"))
}

// === impl Rejection ===

impl Rejection {
    fn bad_request(reason: impl fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            reason: reason.to_string(),
        }
    }

    fn internal(reason: impl fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            reason: reason.to_string(),
        }
    }

    fn into_response(self) -> Response<Body> {
        Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
            .body(Body::from(format!("{}\n", self.reason)))
            .expect("rejection response must be valid")
    }
}
