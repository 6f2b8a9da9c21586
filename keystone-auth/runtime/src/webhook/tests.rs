use super::*;
use http_body_util::BodyExt;
use keystone_auth_core::{
    AccessAttributes, AuthorizeError, Identity, PolicySet, Request as AccessRequest,
    SyncConfig, Verdict,
};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};
use tower::ServiceExt;

#[derive(Default)]
struct MockAuthenticator {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate_token(&self, token: &str) -> anyhow::Result<Option<Identity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match token {
            "good" => Ok(Some(Identity {
                username: "alice".to_string(),
                uid: "8b0f1e4e".to_string(),
                groups: vec!["demo".to_string(), "admin".to_string()],
                extra: btreemap! {
                    "alpha.1/project-id".to_string() => vec!["p1".to_string()],
                },
            })),
            "broken" => anyhow::bail!("identity provider unreachable"),
            _ => Ok(None),
        }
    }
}

struct MockAuthorizer {
    calls: AtomicUsize,
    verdict: Result<Verdict, AuthorizeError>,
    seen: Mutex<Vec<AccessAttributes>>,
}

impl MockAuthorizer {
    fn new(verdict: Result<Verdict, AuthorizeError>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            verdict,
            seen: Default::default(),
        }
    }
}

#[async_trait::async_trait]
impl Authorizer for MockAuthorizer {
    async fn authorize(
        &self,
        policy: &PolicySet,
        attrs: &AccessAttributes,
    ) -> Result<Verdict, AuthorizeError> {
        assert!(!policy.rules().is_empty(), "authorizer must not see an empty policy");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("lock must not be poisoned")
            .push(attrs.clone());
        self.verdict.clone()
    }
}

struct Fixture {
    webhook: Webhook<MockAuthenticator, MockAuthorizer>,
    authn: Arc<MockAuthenticator>,
    authz: Arc<MockAuthorizer>,
    state: SharedState,
    metrics: WebhookMetrics,
}

fn fixture(verdict: Result<Verdict, AuthorizeError>) -> Fixture {
    let policy = PolicySet::from_json(
        r#"[{"resource": {"verbs": ["get"], "resources": ["pods"]}, "match": [{"type": "role", "values": ["member"]}]}]"#,
    )
    .expect("policy must parse");
    let state = SharedState::new(policy, SyncConfig::default());
    let authn = Arc::new(MockAuthenticator::default());
    let authz = Arc::new(MockAuthorizer::new(verdict));
    let metrics = WebhookMetrics::default();
    let webhook = Webhook::new(authn.clone(), authz.clone(), state.clone(), metrics.clone());
    Fixture {
        webhook,
        authn,
        authz,
        state,
        metrics,
    }
}

async fn review(webhook: &Webhook<MockAuthenticator, MockAuthorizer>, body: Value) -> (StatusCode, Vec<u8>) {
    let body = serde_json::to_vec(&body).expect("body must encode");
    let rsp = webhook.review(&body).await;
    let status = rsp.status();
    let bytes = rsp
        .into_body()
        .collect()
        .await
        .expect("body must be readable")
        .to_bytes();
    (status, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("response must be JSON")
}

fn text_body(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).expect("response must be UTF-8")
}

fn token_review(token: &str) -> Value {
    json!({
        "apiVersion": "authentication.k8s.io/v1beta1",
        "kind": "TokenReview",
        "metadata": {"creationTimestamp": null},
        "spec": {"token": token},
    })
}

fn subject_access_review(spec: Value) -> Value {
    json!({
        "apiVersion": "authorization.k8s.io/v1beta1",
        "kind": "SubjectAccessReview",
        "metadata": {"creationTimestamp": null},
        "spec": spec,
    })
}

fn pod_access() -> Value {
    json!({
        "user": "alice",
        "group": ["member"],
        "extra": {"alpha.1/project-id": ["p1"]},
        "resourceAttributes": {
            "namespace": "default",
            "verb": "get",
            "version": "v1",
            "resource": "pods",
        },
    })
}

#[tokio::test]
async fn authenticated_token() {
    let Fixture {
        webhook, metrics, ..
    } = fixture(Ok(Verdict::allow("")));

    let (status, body) = review(&webhook, token_review("good")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({
            "apiVersion": "authentication.k8s.io/v1beta1",
            "kind": "TokenReview",
            "metadata": {"creationTimestamp": null},
            "spec": {"token": "good"},
            "status": {
                "authenticated": true,
                "user": {
                    "username": "alice",
                    "uid": "8b0f1e4e",
                    "groups": ["demo", "admin"],
                    "extra": {"alpha.1/project-id": ["p1"]},
                },
            },
        })
    );
    assert_eq!(metrics.requests(TOKEN_REVIEW, StatusCode::OK), 1);
}

#[tokio::test]
async fn rejected_token() {
    let Fixture { webhook, .. } = fixture(Ok(Verdict::allow("")));

    let (status, body) = review(&webhook, token_review("bad")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body = json_body(&body);
    assert_eq!(body["status"], json!({"authenticated": false}));
    assert_eq!(body["spec"], json!({"token": "bad"}));
}

#[tokio::test]
async fn authenticator_error_is_not_authenticated() {
    let Fixture { webhook, authn, .. } = fixture(Ok(Verdict::allow("")));

    let (status, body) = review(&webhook, token_review("broken")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["status"], json!({"authenticated": false}));
    assert_eq!(authn.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn responses_are_pretty_printed() {
    let Fixture { webhook, .. } = fixture(Ok(Verdict::allow("")));

    let (_, body) = review(&webhook, token_review("bad")).await;
    let expected = serde_json::to_string_pretty(&json_body(&body)).expect("must encode");
    assert_eq!(text_body(&body), expected);
    assert!(text_body(&body).contains("\n  \"apiVersion\""));
}

#[tokio::test]
async fn allowed_access() {
    let Fixture {
        webhook, authz, ..
    } = fixture(Ok(Verdict::allow("matched")));

    let (status, body) = review(&webhook, subject_access_review(pod_access())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({
            "apiVersion": "authorization.k8s.io/v1beta1",
            "kind": "SubjectAccessReview",
            "metadata": {"creationTimestamp": null},
            "status": {"allowed": true},
        })
    );

    let seen = authz.seen.lock().expect("lock must not be poisoned");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].user, "alice");
    assert_eq!(seen[0].groups, vec!["member"]);
    assert_eq!(seen[0].extra["alpha.1/project-id"], vec!["p1"]);
    assert!(matches!(&seen[0].request, AccessRequest::Resource(r) if r.resource == "pods"));
}

#[tokio::test]
async fn denied_and_no_opinion_are_not_allowed() {
    for verdict in [Verdict::deny("forbidden"), Verdict::no_opinion("no rule matched")] {
        let decision = verdict.decision;
        let Fixture { webhook, .. } = fixture(Ok(verdict));

        let (status, body) = review(&webhook, subject_access_review(pod_access())).await;
        assert_eq!(status, StatusCode::OK, "{decision:?}");
        assert_eq!(
            json_body(&body)["status"],
            json!({"allowed": false}),
            "{decision:?}"
        );
    }
}

#[tokio::test]
async fn empty_policy_denies_without_authorizer() {
    let Fixture {
        webhook,
        authz,
        state,
        ..
    } = fixture(Ok(Verdict::allow("matched")));
    state.set_policy(PolicySet::default());

    let (status, body) = review(&webhook, subject_access_review(pod_access())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], json!({"allowed": false}));
    assert_eq!(authz.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_attributes_is_an_internal_error() {
    let Fixture {
        webhook,
        authz,
        metrics,
        ..
    } = fixture(Ok(Verdict::allow("matched")));

    let (status, body) = review(
        &webhook,
        subject_access_review(json!({"user": "alice", "group": ["member"]})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text_body(&body), "unable to find attributes\n");
    assert_eq!(authz.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        metrics.requests(SUBJECT_ACCESS_REVIEW, StatusCode::INTERNAL_SERVER_ERROR),
        1
    );
}

#[tokio::test]
async fn authorizer_error_is_an_internal_error() {
    let Fixture { webhook, authz, .. } =
        fixture(Err(AuthorizeError::new("policy evaluation failed")));

    let (status, body) = review(&webhook, subject_access_review(pod_access())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text_body(&body), "policy evaluation failed\n");
    assert_eq!(authz.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_resource_access() {
    let Fixture { webhook, authz, .. } = fixture(Ok(Verdict::allow("matched")));

    let (status, _) = review(
        &webhook,
        subject_access_review(json!({
            "user": "alice",
            "groups": ["member"],
            "nonResourceAttributes": {"verb": "get", "path": "/healthz"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let seen = authz.seen.lock().expect("lock must not be poisoned");
    assert!(matches!(
        &seen[0].request,
        AccessRequest::NonResource(r) if r.verb == "get" && r.path == "/healthz"
    ));
}

#[tokio::test]
async fn unknown_api_version() {
    let Fixture {
        webhook, authn, ..
    } = fixture(Ok(Verdict::allow("")));

    let mut body = token_review("good");
    body["apiVersion"] = json!("foo/v1");
    let (status, body) = review(&webhook, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text_body(&body), "unknown apiVersion \"foo/v1\"\n");
    assert_eq!(authn.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_kind() {
    let Fixture {
        webhook, metrics, ..
    } = fixture(Ok(Verdict::allow("")));

    let mut body = token_review("good");
    body["kind"] = json!("SelfSubjectReview");
    let (status, _) = review(&webhook, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(metrics.requests(UNKNOWN, StatusCode::BAD_REQUEST), 1);
}

#[tokio::test]
async fn either_api_version_carries_either_kind() {
    let Fixture { webhook, .. } = fixture(Ok(Verdict::allow("matched")));

    let mut body = token_review("good");
    body["apiVersion"] = json!(AUTHORIZATION_API_VERSION);
    let (status, _) = review(&webhook, body).await;
    assert_eq!(status, StatusCode::OK);

    let mut body = subject_access_review(pod_access());
    body["apiVersion"] = json!(AUTHENTICATION_API_VERSION);
    let (status, _) = review(&webhook, body).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let Fixture {
        webhook,
        authn,
        authz,
        ..
    } = fixture(Ok(Verdict::allow("matched")));

    let rsp = webhook.review(b"{not json").await;
    assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);

    let (status, _) = review(&webhook, json!({"kind": "TokenReview"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = token_review("good");
    body["spec"] = json!({"token": 42});
    let (status, _) = review(&webhook, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = review(
        &webhook,
        subject_access_review(json!({"user": ["alice"], "resourceAttributes": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(authn.calls.load(Ordering::SeqCst), 0);
    assert_eq!(authz.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn serves_only_post_to_webhook_path() {
    let Fixture { webhook, .. } = fixture(Ok(Verdict::allow("")));

    let rsp = webhook
        .clone()
        .oneshot(
            Request::builder()
                .method(http::Method::GET)
                .uri(WEBHOOK_PATH)
                .body(Body::default())
                .expect("request must be valid"),
        )
        .await
        .expect("service must not fail");
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);

    let rsp = webhook
        .clone()
        .oneshot(
            Request::builder()
                .method(http::Method::POST)
                .uri("/")
                .body(Body::default())
                .expect("request must be valid"),
        )
        .await
        .expect("service must not fail");
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);

    let body = serde_json::to_vec(&token_review("good")).expect("body must encode");
    let rsp = webhook
        .oneshot(
            Request::builder()
                .method(http::Method::POST)
                .uri(WEBHOOK_PATH)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .expect("request must be valid"),
        )
        .await
        .expect("service must not fail");
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(
        rsp.headers()[header::CONTENT_TYPE],
        "application/json"
    );
}
