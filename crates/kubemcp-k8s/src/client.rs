//! Client construction strategies
//!
//! `ClientFactory` is the seam between resolution (which context, cached or
//! not) and construction (how credentials become a live client). Production
//! code uses `KubeClientFactory`; tests substitute counting fakes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kube::config::KubeConfigOptions;
use tracing::{debug, warn};

use crate::kubeconfig;

/// Where a client's credentials come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientTarget {
    /// Mounted service account, falling back to kubeconfig outside a pod
    ///
    /// The fallback reads `kubeconfig` when set, otherwise kube's default discovery.
    InCluster { kubeconfig: Option<PathBuf> },
    /// A kubeconfig context (None means the file's current-context)
    Kubeconfig {
        path: Option<PathBuf>,
        context: Option<String>,
    },
}

/// Builds API clients for resolved targets
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    fn build(&self, target: &ClientTarget) -> impl Future<Output = Result<Self::Client>> + Send;
}

/// Factory producing `kube::Client` instances
#[derive(Clone, Debug)]
pub struct KubeClientFactory {
    timeout: Duration,
}

impl KubeClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Resolve a target into a `kube::Config`
    ///
    /// In-cluster credentials are tried first; when they are missing (running
    /// outside a pod) the configured kubeconfig's current context is used instead.
    async fn config_for(&self, target: &ClientTarget) -> Result<kube::Config> {
        match target {
            ClientTarget::InCluster { kubeconfig } => match kube::Config::incluster() {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!(error = %e, "In-cluster config unavailable, falling back to kubeconfig");
                    from_kubeconfig(kubeconfig.as_deref(), None)
                        .await
                        .context("Failed to load fallback kubeconfig")
                }
            },
            ClientTarget::Kubeconfig { path, context } => {
                from_kubeconfig(path.as_deref(), context.clone()).await
            }
        }
    }
}

async fn from_kubeconfig(path: Option<&Path>, context: Option<String>) -> Result<kube::Config> {
    let kubeconfig = kubeconfig::load(path)?;
    let label = context.clone().unwrap_or_else(|| "<current>".to_string());

    kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &KubeConfigOptions {
            context,
            ..Default::default()
        },
    )
    .await
    .with_context(|| format!("Failed to create config for context: {}", label))
}

impl ClientFactory for KubeClientFactory {
    type Client = kube::Client;

    async fn build(&self, target: &ClientTarget) -> Result<kube::Client> {
        let mut config = self.config_for(target).await?;
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);

        debug!(cluster_url = %config.cluster_url, "Creating Kubernetes client");

        kube::Client::try_from(config).context("Failed to create Kubernetes client")
    }
}
