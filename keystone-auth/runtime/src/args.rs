use crate::{
    bootstrap::{self, Sources},
    webhook::{Webhook, WebhookMetrics},
};
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use keystone_auth_core::{Authenticator, Authorizer, SharedState};
use keystone_auth_k8s_api::{ConfigMap, TrackedConfigMaps, CONFIGMAP_NAMESPACE};
use keystone_auth_k8s_controller::{
    cache_events, reflector, watcher, Controller, ControllerMetrics,
};
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "keystone-auth",
    about = "A Kubernetes authentication and authorization webhook"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "keystone_auth=info,warn",
        env = "KEYSTONE_AUTH_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Name of the ConfigMap in kube-system holding the authorization policy.
    #[clap(long, env = "KEYSTONE_AUTH_POLICY_CONFIGMAP_NAME")]
    policy_configmap_name: Option<String>,

    /// Name of the ConfigMap in kube-system holding the sync configuration.
    #[clap(long, env = "KEYSTONE_AUTH_SYNC_CONFIGMAP_NAME")]
    sync_configmap_name: Option<String>,

    /// Path of a JSON policy file. Takes precedence over the policy ConfigMap
    /// until the ConfigMap changes.
    #[clap(long)]
    policy_file: Option<PathBuf>,

    /// Path of a YAML sync configuration file. Takes precedence over the sync
    /// ConfigMap until the ConfigMap changes.
    #[clap(long)]
    sync_config_file: Option<PathBuf>,
}

/// What is available to build the authenticator and authorizer.
#[derive(Clone)]
pub struct Context {
    /// The policy and sync configuration, kept current by the controller.
    pub state: SharedState,

    /// Set when a ConfigMap is tracked.
    pub client: Option<kube::Client>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run<N, Z, F>(collaborators: F) -> Result<()>
    where
        N: Authenticator + Send + Sync + 'static,
        Z: Authorizer + Send + Sync + 'static,
        F: FnOnce(Context) -> Result<(N, Z)>,
    {
        Self::parse().run(collaborators).await
    }

    /// The ConfigMaps to read and watch. A cluster client is only built when
    /// this is not empty.
    pub fn tracked(&self) -> TrackedConfigMaps {
        TrackedConfigMaps::new(
            self.policy_configmap_name.clone(),
            self.sync_configmap_name.clone(),
        )
    }

    /// Runs the webhook until the process is signaled to shut down.
    ///
    /// `collaborators` is called once the initial configuration is resolved.
    pub async fn run<N, Z, F>(self, collaborators: F) -> Result<()>
    where
        N: Authenticator + Send + Sync + 'static,
        Z: Authorizer + Send + Sync + 'static,
        F: FnOnce(Context) -> Result<(N, Z)>,
    {
        let tracked = self.tracked();
        if tracked.is_empty() {
            self.run_standalone(collaborators).await
        } else {
            self.run_in_cluster(tracked, collaborators).await
        }
    }

    /// Serves with configuration from local files only, without a cluster
    /// client.
    async fn run_standalone<N, Z, F>(self, collaborators: F) -> Result<()>
    where
        N: Authenticator + Send + Sync + 'static,
        Z: Authorizer + Send + Sync + 'static,
        F: FnOnce(Context) -> Result<(N, Z)>,
    {
        let Self {
            admin,
            log_level,
            log_format,
            server,
            policy_file,
            sync_config_file,
            ..
        } = self;

        let mut prom = <Registry>::default();
        let webhook_metrics = WebhookMetrics::register(prom.sub_registry_with_prefix("webhook"));

        log_format.try_init(log_level)?;
        let (shutdown, shutdown_rx) = kubert::shutdown::sigint_or_sigterm()?;
        let admin = admin.into_builder().with_prometheus(prom).bind()?;

        let sources = Sources {
            tracked: TrackedConfigMaps::default(),
            policy_file,
            sync_config_file,
        };
        let bootstrap = bootstrap::resolve::<kube::Client>(&sources, None)
            .await
            .context("failed to resolve initial configuration")?;
        info!("No ConfigMaps configured; configuration will not be reloaded");
        let state = SharedState::new(bootstrap.policy, bootstrap.sync_config);
        let webhook = webhook(
            Context {
                state: state.clone(),
                client: None,
            },
            webhook_metrics,
            collaborators,
        )?;

        let server = server.bind().await?;
        info!(addr = %server.local_addr(), "Serving");
        server.spawn(webhook, shutdown_rx.clone());

        let ready = admin.readiness();
        ready.set(true);
        let _admin = admin.spawn();
        tokio::spawn(async move {
            drop(shutdown_rx.signaled().await);
            ready.set(false);
        });

        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }

    /// Serves with configuration kept current from ConfigMaps.
    async fn run_in_cluster<N, Z, F>(self, tracked: TrackedConfigMaps, collaborators: F) -> Result<()>
    where
        N: Authenticator + Send + Sync + 'static,
        Z: Authorizer + Send + Sync + 'static,
        F: FnOnce(Context) -> Result<(N, Z)>,
    {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            policy_file,
            sync_config_file,
            ..
        } = self;

        let sources = Sources {
            tracked: tracked.clone(),
            policy_file,
            sync_config_file,
        };

        let mut prom = <Registry>::default();
        let controller_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("controller"));
        let webhook_metrics = WebhookMetrics::register(prom.sub_registry_with_prefix("webhook"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        let client = runtime.client();
        let bootstrap = bootstrap::resolve(&sources, Some(&client))
            .await
            .context("failed to resolve initial configuration")?;
        let state = SharedState::new(bootstrap.policy, bootstrap.sync_config);
        let webhook = webhook(
            Context {
                state: state.clone(),
                client: Some(client),
            },
            webhook_metrics,
            collaborators,
        )?;

        let (store, writer) = reflector::store::<ConfigMap>();
        let events = cache_events(
            writer,
            runtime.watch_namespaced::<ConfigMap>(CONFIGMAP_NAMESPACE, watcher::Config::default()),
        );
        let controller = Controller::new(tracked, state, store.clone(), controller_metrics);
        let intake = controller.intake().with_observed(bootstrap.observed);
        tokio::spawn(
            controller
                .run(intake, events, runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Serve only once the cache reflects the cluster so that the first
        // requests see current configuration.
        store
            .wait_until_ready()
            .await
            .context("ConfigMap cache failed to sync")?;
        info!("ConfigMap cache synced");

        let runtime = runtime.spawn_server(webhook);

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn webhook<N, Z, F>(cx: Context, metrics: WebhookMetrics, collaborators: F) -> Result<Webhook<N, Z>>
where
    N: Authenticator,
    Z: Authorizer,
    F: FnOnce(Context) -> Result<(N, Z)>,
{
    let state = cx.state.clone();
    let (authn, authz) = collaborators(cx)?;
    Ok(Webhook::new(Arc::new(authn), Arc::new(authz), state, metrics))
}
