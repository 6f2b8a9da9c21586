#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod metrics;
mod queue;
mod store;


pub use self::{
    controller::{Controller, Intake, ReconcileError, MAX_RETRIES},
    metrics::ControllerMetrics,
    queue::WorkQueue,
    store::{cache_events, ConfigMapStore, StoreError},
};
pub use kube::runtime::{reflector, watcher};
