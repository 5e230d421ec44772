//! CRD discovery with a per-cluster TTL cache
//!
//! One probe lists every CRD name installed in a cluster; ecosystem groups and
//! single-CRD existence checks are both answered from that snapshot. Probe
//! failures degrade to "nothing installed" and are not cached.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Api;
use kube::api::ListParams;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::resolver::ClientResolver;
use kubemcp_types::{CrdSnapshot, DEFAULT_CONTEXT_KEY, EcosystemGroup};

/// How long a probe result stays fresh
pub const CRD_CACHE_TTL: Duration = Duration::from_secs(300);

/// Upper bound on a single cluster probe
pub const CRD_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists the CRDs installed in a cluster
pub trait CrdProbe: Send + Sync + 'static {
    fn list_crd_names(
        &self,
        context: &str,
    ) -> impl Future<Output = anyhow::Result<BTreeSet<String>>> + Send;
}

/// Probe that lists CRD metadata through the resolver's cached client
pub struct ResolverCrdProbe {
    resolver: Arc<ClientResolver>,
}

impl ResolverCrdProbe {
    pub fn new(resolver: Arc<ClientResolver>) -> Self {
        Self { resolver }
    }
}

impl CrdProbe for ResolverCrdProbe {
    async fn list_crd_names(&self, context: &str) -> anyhow::Result<BTreeSet<String>> {
        let client = self.resolver.get_api_client(context).await?;
        let crds: Api<CustomResourceDefinition> = Api::all(client.as_ref().clone());

        let list = crds
            .list_metadata(&ListParams::default())
            .await
            .context("Failed to list CustomResourceDefinitions")?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect())
    }
}

/// TTL-bounded map from cluster context to installed CRDs
pub struct CrdCache<P: CrdProbe = ResolverCrdProbe> {
    probe: P,
    ttl: Duration,
    probe_timeout: Duration,
    snapshots: RwLock<HashMap<String, CrdSnapshot>>,
    /// Bumped on every invalidation; probes started before a bump are not cached
    generation: AtomicU64,
}

impl<P: CrdProbe> CrdCache<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            ttl: CRD_CACHE_TTL,
            probe_timeout: CRD_PROBE_TIMEOUT,
            snapshots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Installed flag per ecosystem group
    pub async fn detect_crds(
        &self,
        context: &str,
        force_refresh: bool,
    ) -> BTreeMap<EcosystemGroup, bool> {
        self.snapshot(context, force_refresh).await.installed
    }

    /// Whether a single CRD is installed, answered from the cached snapshot
    pub async fn crd_exists(&self, crd_name: &str, context: &str) -> bool {
        self.snapshot(context, false)
            .await
            .crd_names
            .contains(crd_name)
    }

    /// Toolsets whose backing CRDs are installed
    pub async fn get_enabled_toolsets(&self, context: &str) -> Vec<String> {
        self.snapshot(context, false).await.enabled_toolsets()
    }

    /// Fail with `FeatureNotInstalled` unless `crd_name` is installed
    pub async fn require_crd(&self, toolset: &str, crd_name: &str, context: &str) -> Result<()> {
        self.require_any_crd(toolset, &[crd_name], context).await
    }

    /// Fail with `FeatureNotInstalled` unless at least one of `crd_names` is installed
    pub async fn require_any_crd(
        &self,
        toolset: &str,
        crd_names: &[&str],
        context: &str,
    ) -> Result<()> {
        let snapshot = self.snapshot(context, false).await;
        if crd_names.iter().any(|crd| snapshot.crd_names.contains(*crd)) {
            return Ok(());
        }

        Err(CoreError::FeatureNotInstalled {
            toolset: toolset.to_string(),
            required_crds: crd_names.iter().map(|crd| crd.to_string()).collect(),
        })
    }

    /// Current snapshot for a context, probing the cluster when missing or stale
    pub async fn snapshot(&self, context: &str, force_refresh: bool) -> CrdSnapshot {
        let key = cache_key(context);

        if !force_refresh
            && let Some(cached) = self.cached(key)
        {
            debug!(context = %key, "CRD cache hit");
            return cached;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        match tokio::time::timeout(self.probe_timeout, self.probe.list_crd_names(context)).await {
            Ok(Ok(names)) => {
                let snapshot = CrdSnapshot::from_names(names);
                info!(
                    context = %key,
                    crds = snapshot.crd_names.len(),
                    toolsets = ?snapshot.enabled_toolsets(),
                    "Detected installed CRDs"
                );
                let mut snapshots = self.snapshots.write();
                if self.generation.load(Ordering::SeqCst) == generation {
                    snapshots.insert(key.to_string(), snapshot.clone());
                } else {
                    debug!(context = %key, "CRD cache invalidated during probe, result not cached");
                }
                snapshot
            }
            Ok(Err(e)) => {
                warn!(context = %key, error = %e, "CRD detection failed, treating as none installed");
                CrdSnapshot::empty()
            }
            Err(_) => {
                warn!(
                    context = %key,
                    timeout_secs = self.probe_timeout.as_secs(),
                    "CRD detection timed out, treating as none installed"
                );
                CrdSnapshot::empty()
            }
        }
    }

    /// Fresh cached snapshot, if any
    pub fn cached(&self, context: &str) -> Option<CrdSnapshot> {
        self.snapshots
            .read()
            .get(cache_key(context))
            .filter(|s| s.is_fresh(self.ttl))
            .cloned()
    }

    /// Drop the snapshot for one context
    pub fn invalidate(&self, context: &str) {
        let mut snapshots = self.snapshots.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        snapshots.remove(cache_key(context));
    }

    /// Drop every snapshot
    pub fn clear(&self) {
        let mut snapshots = self.snapshots.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        snapshots.clear();
    }
}

fn cache_key(context: &str) -> &str {
    if context.is_empty() {
        DEFAULT_CONTEXT_KEY
    } else {
        context
    }
}
