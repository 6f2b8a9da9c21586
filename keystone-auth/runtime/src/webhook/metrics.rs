use hyper::http::StatusCode;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct WebhookMetrics {
    requests: Family<RequestLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    kind: &'static str,
    code: String,
}

impl WebhookMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let requests = Family::default();
        prom.register(
            "requests",
            "Count of review requests by kind and response status",
            requests.clone(),
        );
        Self { requests }
    }

    pub(super) fn request(&self, kind: &'static str, code: StatusCode) {
        self.requests
            .get_or_create(&RequestLabels {
                kind,
                code: code.as_u16().to_string(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(super) fn requests(&self, kind: &'static str, code: StatusCode) -> u64 {
        self.requests
            .get_or_create(&RequestLabels {
                kind,
                code: code.as_u16().to_string(),
            })
            .get()
    }
}
