use keystone_auth_k8s_api::ObjectKey;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Family<ReconcileLabels, Counter>,
    queue_adds: Counter,
    events: Family<EventLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    key: String,
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reconciled {
    Ok,
    Retry,
    Dropped,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Observed {
    Apply,
    Delete,
    ResyncSkipped,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconciles",
            "Count of ConfigMap reconciliations by outcome",
            reconciles.clone(),
        );

        let queue_adds = Counter::default();
        prom.register(
            "queue_adds",
            "Count of ConfigMap keys added to the work queue",
            queue_adds.clone(),
        );

        let events = Family::default();
        prom.register(
            "events",
            "Count of tracked ConfigMap watch events",
            events.clone(),
        );

        Self {
            reconciles,
            queue_adds,
            events,
        }
    }

    pub(crate) fn reconciled(&self, key: &ObjectKey, result: Reconciled) {
        let result = match result {
            Reconciled::Ok => "ok",
            Reconciled::Retry => "retry",
            Reconciled::Dropped => "dropped",
        };
        self.reconciles
            .get_or_create(&ReconcileLabels {
                key: key.to_string(),
                result,
            })
            .inc();
    }

    pub(crate) fn enqueued(&self) {
        self.queue_adds.inc();
    }

    pub(crate) fn observed(&self, event: Observed) {
        let kind = match event {
            Observed::Apply => "apply",
            Observed::Delete => "delete",
            Observed::ResyncSkipped => "resync_skipped",
        };
        self.events.get_or_create(&EventLabels { kind }).inc();
    }
}

#[cfg(test)]
impl ControllerMetrics {
    pub(crate) fn reconciles(&self, key: &ObjectKey, result: &'static str) -> u64 {
        self.reconciles
            .get_or_create(&ReconcileLabels {
                key: key.to_string(),
                result,
            })
            .get()
    }

    pub(crate) fn queue_adds(&self) -> u64 {
        self.queue_adds.get()
    }

    pub(crate) fn events(&self, kind: &'static str) -> u64 {
        self.events.get_or_create(&EventLabels { kind }).get()
    }
}
