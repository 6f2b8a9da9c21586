#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use keystone_auth_core as core;
pub use keystone_auth_k8s_api as k8s;
pub use keystone_auth_k8s_controller as controller;

mod args;
pub mod bootstrap;
pub mod files;
pub mod webhook;

pub use self::{
    args::{Args, Context},
    webhook::{Webhook, WebhookMetrics, WEBHOOK_PATH},
};
