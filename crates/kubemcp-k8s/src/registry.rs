//! Process-wide entry point for the tool layer
//!
//! A `Registry` is built once at startup and shared by reference. It owns the
//! resolver, the CRD cache, the stateless switch and the single kubeconfig
//! watcher, so nothing in this crate relies on global state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use tracing::info;

use crate::client::{ClientFactory, KubeClientFactory};
use crate::config::ProviderConfig;
use crate::crd::{CrdCache, CrdProbe, ResolverCrdProbe};
use crate::error::Result;
use crate::resolver::ClientResolver;
use crate::stateless::StatelessMode;
use crate::watcher::{CallbackList, ChangeCallback, ConfigChangeWatcher};
use kubemcp_types::{ContextInfo, CrdSnapshot, EcosystemGroup};

/// Default concurrency for multi-cluster fan-out
pub const DEFAULT_FAN_OUT_LIMIT: usize = 8;

pub struct Registry<F = KubeClientFactory, P = ResolverCrdProbe>
where
    F: ClientFactory,
    P: CrdProbe,
{
    config: Arc<ProviderConfig>,
    stateless: StatelessMode,
    resolver: Arc<ClientResolver<F>>,
    crds: Arc<CrdCache<P>>,
    callbacks: CallbackList,
    watcher: tokio::sync::Mutex<Option<ConfigChangeWatcher>>,
}

impl Registry {
    /// Build the production registry from environment variables
    ///
    /// Starts the kubeconfig watcher when `MCP_KUBECONFIG_WATCH` is set.
    pub async fn from_environment() -> Result<Self> {
        Self::from_config(ProviderConfig::load_from_environment()).await
    }

    /// Build the production registry from an explicit configuration
    pub async fn from_config(config: ProviderConfig) -> Result<Self> {
        let factory = KubeClientFactory::new(config.timeout());
        let registry = Self::new(config, factory, ResolverCrdProbe::new)?;

        if registry.config.watch_kubeconfig {
            registry.enable_kubeconfig_watch(None).await;
        }

        Ok(registry)
    }
}

impl<F, P> Registry<F, P>
where
    F: ClientFactory,
    P: CrdProbe,
{
    /// Wire a registry from a client factory and a probe built over the resolver
    pub fn new<B>(config: ProviderConfig, factory: F, build_probe: B) -> Result<Self>
    where
        B: FnOnce(Arc<ClientResolver<F>>) -> P,
    {
        let config = Arc::new(config);
        let stateless = StatelessMode::new(config.stateless);
        let resolver = Arc::new(ClientResolver::new(
            Arc::clone(&config),
            factory,
            stateless.clone(),
        )?);
        let crds = Arc::new(CrdCache::new(build_probe(Arc::clone(&resolver))));

        if stateless.is_stateless() {
            info!("Stateless mode enabled, clients will not be cached");
        }

        Ok(Self {
            config,
            stateless,
            resolver,
            crds,
            callbacks: Arc::new(RwLock::new(Vec::new())),
            watcher: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ClientResolver<F>> {
        &self.resolver
    }

    pub fn crd_cache(&self) -> &Arc<CrdCache<P>> {
        &self.crds
    }

    // ------------------------------------------------------------------------
    // Client resolution
    // ------------------------------------------------------------------------

    pub async fn get_api_client(&self, context: &str) -> Result<Arc<F::Client>> {
        self.resolver.get_api_client(context).await
    }

    pub fn list_contexts(&self) -> Result<Vec<ContextInfo>> {
        self.resolver.list_contexts()
    }

    pub fn get_current_context(&self) -> Option<String> {
        self.resolver.get_current_context()
    }

    pub fn context_exists(&self, context: &str) -> bool {
        self.resolver.context_exists(context)
    }

    pub fn validate_context(&self, context: &str) -> Result<String> {
        self.resolver.validate_context(context)
    }

    pub fn clear_client_cache(&self, context: &str) {
        self.resolver.clear_client_cache(context);
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless.is_stateless()
    }

    pub fn set_stateless(&self, enabled: bool) {
        self.stateless.set_stateless(enabled);
        info!(enabled, "Stateless mode updated");
    }

    // ------------------------------------------------------------------------
    // Kubeconfig watching
    // ------------------------------------------------------------------------

    /// Start watching kubeconfig; returns false if a watcher is already running
    pub async fn enable_kubeconfig_watch(&self, interval: Option<Duration>) -> bool {
        let mut slot = self.watcher.lock().await;
        if slot.as_ref().is_some_and(|w| w.is_running()) {
            return false;
        }

        let mut watcher = ConfigChangeWatcher::new(
            self.config.watch_paths(),
            interval.unwrap_or(self.config.watch_interval),
        )
        .invalidates(self.resolver.clone())
        .invalidates(self.crds.clone())
        .with_callbacks(Arc::clone(&self.callbacks));

        watcher.start();
        *slot = Some(watcher);
        true
    }

    /// Stop the kubeconfig watcher if one is running
    pub async fn disable_kubeconfig_watch(&self) {
        let watcher = self.watcher.lock().await.take();
        if let Some(mut watcher) = watcher {
            watcher.stop().await;
        }
    }

    pub async fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| w.is_running())
    }

    /// Run `callback` after every detected kubeconfig change
    ///
    /// Callbacks run on tokio's blocking pool, never on an async worker.
    pub fn on_config_change<C>(&self, callback: C)
    where
        C: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: ChangeCallback = Arc::new(callback);
        self.callbacks.write().push(callback);
    }

    // ------------------------------------------------------------------------
    // CRD discovery
    // ------------------------------------------------------------------------

    pub async fn detect_crds(
        &self,
        context: &str,
        force_refresh: bool,
    ) -> std::collections::BTreeMap<EcosystemGroup, bool> {
        self.crds.detect_crds(context, force_refresh).await
    }

    pub async fn crd_snapshot(&self, context: &str, force_refresh: bool) -> CrdSnapshot {
        self.crds.snapshot(context, force_refresh).await
    }

    pub async fn crd_exists(&self, crd_name: &str, context: &str) -> bool {
        self.crds.crd_exists(crd_name, context).await
    }

    pub async fn get_enabled_toolsets(&self, context: &str) -> Vec<String> {
        self.crds.get_enabled_toolsets(context).await
    }

    pub async fn require_crd(&self, toolset: &str, crd_name: &str, context: &str) -> Result<()> {
        self.crds.require_crd(toolset, crd_name, context).await
    }

    pub async fn require_any_crd(
        &self,
        toolset: &str,
        crd_names: &[&str],
        context: &str,
    ) -> Result<()> {
        self.crds.require_any_crd(toolset, crd_names, context).await
    }

    // ------------------------------------------------------------------------
    // Multi-cluster fan-out
    // ------------------------------------------------------------------------

    /// Run `op` against each context with at most `limit` in flight
    ///
    /// Results come back in the order of `contexts`. A context that fails to
    /// resolve yields its error without affecting the others.
    pub async fn fan_out<T, Op, Fut>(
        &self,
        contexts: &[String],
        limit: usize,
        op: Op,
    ) -> Vec<(String, anyhow::Result<T>)>
    where
        Op: Fn(String, Arc<F::Client>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let op = &op;
        futures::stream::iter(contexts.iter().cloned())
            .map(|context| async move {
                let result = match self.get_api_client(&context).await {
                    Ok(client) => op(context.clone(), client).await,
                    Err(e) => Err(e.into()),
                };
                (context, result)
            })
            .buffered(limit.max(1))
            .collect()
            .await
    }
}
