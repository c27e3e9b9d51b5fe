//! Cumulus controller - declarative AWS resource management for Kubernetes

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cumulus::controller::{
    error_policy, reconcile, ConnectionPublisher, ControllerOptions, KubeRegistry, ManagedContext,
};
use cumulus::crd::{LoadBalancer, ProviderConfig, Role, RolePolicyAttachment};
use cumulus::external::{
    AwsConfigResolver, LoadBalancerConnector, RoleConnector, RolePolicyAttachmentConnector,
};
use cumulus::reference::{KubeLookup, RoleNameResolver};
use cumulus::secrets::KubeSecretPublisher;
use cumulus::tagger::Tagger;

/// Cumulus - declarative AWS resource management for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "cumulus", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Seconds between steady-state reconciliation ticks
    #[arg(long, env = "CUMULUS_POLL_INTERVAL", default_value = "60")]
    poll_interval_secs: u64,

    /// Concurrent reconciles per kind
    #[arg(long, env = "CUMULUS_MAX_CONCURRENT_RECONCILES", default_value = "5")]
    max_concurrent_reconciles: usize,

    /// Also publish every connection secret into this store namespace
    #[arg(long, env = "CUMULUS_EXTERNAL_SECRET_STORE")]
    external_secret_store: Option<String>,

    /// Honor per-record management policies instead of fully managing
    /// every record
    #[arg(long, env = "CUMULUS_MANAGEMENT_POLICIES")]
    management_policies: bool,

    /// Owner identifier stamped as a tag on every external resource
    #[arg(long, env = "CUMULUS_OWNER", default_value = cumulus::DEFAULT_OWNER)]
    owner: String,

    /// Fallback namespace for connection secrets without an explicit one
    #[arg(long, env = "CUMULUS_NAMESPACE", default_value = "default")]
    namespace: String,
}

impl Cli {
    fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            external_secret_store: self.external_secret_store.is_some(),
            management_policies: self.management_policies,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for all managed kinds
        for crd in [
            Role::crd(),
            RolePolicyAttachment::crd(),
            LoadBalancer::crd(),
            ProviderConfig::crd(),
        ] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    run_controllers(cli).await
}

/// Ensure all Cumulus CRDs are installed
///
/// The controller installs its own CRDs on startup using server-side
/// apply, so the CRD versions always match the controller version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(cumulus::FIELD_MANAGER).force();

    for (name, crd) in [
        ("roles.aws.cumulus.dev", Role::crd()),
        (
            "rolepolicyattachments.aws.cumulus.dev",
            RolePolicyAttachment::crd(),
        ),
        ("loadbalancers.aws.cumulus.dev", LoadBalancer::crd()),
        ("providerconfigs.cumulus.dev", ProviderConfig::crd()),
    ] {
        tracing::info!(crd = name, "Installing CRD...");
        crds.patch(name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All Cumulus CRDs installed/updated");
    Ok(())
}

/// Run the three managed-resource controllers until shutdown
async fn run_controllers(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    ensure_crds_installed(&client).await?;

    let options = cli.controller_options();
    let configs = Arc::new(AwsConfigResolver::new(client.clone()));
    let tagger = Arc::new(Tagger::new(cli.owner.clone()));

    let primary_publisher: Arc<dyn ConnectionPublisher> = Arc::new(KubeSecretPublisher::new(
        client.clone(),
        cli.namespace.clone(),
    ));
    let store_publisher: Option<Arc<dyn ConnectionPublisher>> = cli
        .external_secret_store
        .as_ref()
        .map(|namespace| {
            Arc::new(KubeSecretPublisher::pinned(client.clone(), namespace.clone()))
                as Arc<dyn ConnectionPublisher>
        });

    let mut role_ctx = ManagedContext::builder(
        Arc::new(KubeRegistry::<Role>::new(client.clone())),
        Arc::new(RoleConnector::new(configs.clone())),
    )
    .initializer(tagger.clone())
    .publisher(primary_publisher.clone())
    .options(options.clone());
    if let Some(store) = &store_publisher {
        role_ctx = role_ctx.publisher(store.clone());
    }
    let role_ctx = Arc::new(role_ctx.build());

    let attachment_ctx = Arc::new(
        ManagedContext::builder(
            Arc::new(KubeRegistry::<RolePolicyAttachment>::new(client.clone())),
            Arc::new(RolePolicyAttachmentConnector::new(configs.clone())),
        )
        .initializer(Arc::new(RoleNameResolver::new(Arc::new(
            KubeLookup::<Role>::new(client.clone()),
        ))))
        .options(options.clone())
        .build(),
    );

    let mut lb_ctx = ManagedContext::builder(
        Arc::new(KubeRegistry::<LoadBalancer>::new(client.clone())),
        Arc::new(LoadBalancerConnector::new(configs.clone())),
    )
    .initializer(tagger.clone())
    .publisher(primary_publisher.clone())
    .options(options.clone());
    if let Some(store) = &store_publisher {
        lb_ctx = lb_ctx.publisher(store.clone());
    }
    let lb_ctx = Arc::new(lb_ctx.build());

    let roles: Api<Role> = Api::all(client.clone());
    let attachments: Api<RolePolicyAttachment> = Api::all(client.clone());
    let load_balancers: Api<LoadBalancer> = Api::all(client.clone());

    let controller_config = ControllerConfig::default().concurrency(cli.max_concurrent_reconciles as u16);

    tracing::info!("Starting Cumulus controllers...");
    tracing::info!("  - Role controller");
    tracing::info!("  - RolePolicyAttachment controller");
    tracing::info!("  - LoadBalancer controller");

    let role_controller = Controller::new(roles, WatcherConfig::default())
        .with_config(controller_config.clone())
        .shutdown_on_signal()
        .run(reconcile, error_policy, role_ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Role reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Role reconciliation error");
                }
            }
        });

    let attachment_controller = Controller::new(attachments, WatcherConfig::default())
        .with_config(controller_config.clone())
        .shutdown_on_signal()
        .run(reconcile, error_policy, attachment_ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "RolePolicyAttachment reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "RolePolicyAttachment reconciliation error");
                }
            }
        });

    let lb_controller = Controller::new(load_balancers, WatcherConfig::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, lb_ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "LoadBalancer reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "LoadBalancer reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = role_controller => {
            tracing::info!("Role controller completed");
        }
        _ = attachment_controller => {
            tracing::info!("RolePolicyAttachment controller completed");
        }
        _ = lb_controller => {
            tracing::info!("LoadBalancer controller completed");
        }
    }

    tracing::info!("Cumulus controller shutting down");
    Ok(())
}
