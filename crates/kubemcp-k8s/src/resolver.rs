//! Context resolution and per-context client caching

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::client::{ClientFactory, ClientTarget, KubeClientFactory};
use crate::config::ProviderConfig;
use crate::error::{CoreError, Result};
use crate::kubeconfig;
use crate::stateless::StatelessMode;
use kubemcp_types::{ContextInfo, DEFAULT_CONTEXT_KEY, IN_CLUSTER_CONTEXT, ProviderType};

/// One cache slot per context; the cell serializes construction for that key
type ClientSlot<C> = Arc<OnceCell<Arc<C>>>;

/// Resolves context names to cached API clients
pub struct ClientResolver<F: ClientFactory = KubeClientFactory> {
    config: Arc<ProviderConfig>,
    factory: F,
    stateless: StatelessMode,
    clients: Mutex<HashMap<String, ClientSlot<F::Client>>>,
    /// Active context as of the last kubeconfig read
    active_context: RwLock<Option<String>>,
    /// Cleared when kubeconfig changes on disk
    config_loaded: AtomicBool,
    /// Bumped by `invalidate`; a read that straddles a bump is not marked loaded
    generation: AtomicU64,
}

impl ClientResolver<KubeClientFactory> {
    /// Resolver producing `kube::Client` handles
    pub fn with_kube_factory(config: Arc<ProviderConfig>, stateless: StatelessMode) -> Result<Self> {
        let factory = KubeClientFactory::new(config.timeout());
        Self::new(config, factory, stateless)
    }
}

impl<F: ClientFactory> ClientResolver<F> {
    pub fn new(config: Arc<ProviderConfig>, factory: F, stateless: StatelessMode) -> Result<Self> {
        if config.provider_type == ProviderType::Single && config.context().is_none() {
            return Err(CoreError::Provider(
                "single provider requires MCP_K8S_CONTEXT to be set".to_string(),
            ));
        }

        info!(
            provider = %config.provider_type,
            kubeconfig = ?config.kubeconfig_path,
            qps = config.qps,
            burst = config.burst,
            "Initialized Kubernetes provider"
        );

        Ok(Self {
            config,
            factory,
            stateless,
            clients: Mutex::new(HashMap::new()),
            active_context: RwLock::new(None),
            config_loaded: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn stateless(&self) -> &StatelessMode {
        &self.stateless
    }

    /// List the contexts this provider can target
    ///
    /// In kubeconfig mode the file is re-read on every call.
    pub fn list_contexts(&self) -> Result<Vec<ContextInfo>> {
        match self.config.provider_type {
            ProviderType::InCluster => Ok(vec![ContextInfo::in_cluster()]),
            ProviderType::Single => {
                let name = self.config.default_context.as_str();
                let found = kubeconfig::load(self.config.kubeconfig_path.as_deref())
                    .map(|kc| kubeconfig::find_context(&kc, name));
                match found {
                    Ok(Some(context)) => Ok(vec![context]),
                    Ok(None) => {
                        warn!(context = %name, "Configured context not found in kubeconfig");
                        Ok(Vec::new())
                    }
                    Err(e) => {
                        warn!(context = %name, error = %e, "Failed to read kubeconfig");
                        Ok(Vec::new())
                    }
                }
            }
            ProviderType::Kubeconfig => {
                self.read_kubeconfig_contexts(self.generation.load(Ordering::SeqCst))
            }
        }
    }

    /// Read kubeconfig and record its active context
    ///
    /// The result is only marked loaded if no invalidation happened since
    /// `generation` was observed.
    fn read_kubeconfig_contexts(&self, generation: u64) -> Result<Vec<ContextInfo>> {
        let kubeconfig = kubeconfig::load(self.config.kubeconfig_path.as_deref())?;
        let active = self
            .config
            .context()
            .map(String::from)
            .or_else(|| kubeconfig.current_context.clone())
            .filter(|c| !c.is_empty());

        let contexts = kubeconfig::contexts(&kubeconfig, active.as_deref());

        let mut slot = self.active_context.write();
        *slot = active;
        if self.generation.load(Ordering::SeqCst) == generation {
            self.config_loaded.store(true, Ordering::SeqCst);
        } else {
            debug!("Kubeconfig changed during read, will re-read on next access");
        }

        Ok(contexts)
    }

    /// Current context name
    pub fn get_current_context(&self) -> Option<String> {
        match self.config.provider_type {
            ProviderType::InCluster => Some(IN_CLUSTER_CONTEXT.to_string()),
            ProviderType::Single => Some(self.config.default_context.clone()),
            ProviderType::Kubeconfig => {
                if !self.config_loaded.load(Ordering::SeqCst)
                    && let Err(e) = self.list_contexts()
                {
                    warn!(error = %e, "Failed to refresh kubeconfig, using last known context");
                }
                self.active_context.read().clone()
            }
        }
    }

    /// Whether a context name can be resolved
    pub fn context_exists(&self, context: &str) -> bool {
        match self.validate_context(context) {
            Ok(resolved) => !resolved.is_empty(),
            Err(_) => false,
        }
    }

    /// Resolve a requested context to the name used for client construction
    pub fn validate_context(&self, requested: &str) -> Result<String> {
        match self.config.provider_type {
            ProviderType::InCluster => Ok(IN_CLUSTER_CONTEXT.to_string()),
            ProviderType::Single => {
                let configured = &self.config.default_context;
                if !requested.is_empty() && requested != configured {
                    return Err(CoreError::UnknownContext {
                        requested: requested.to_string(),
                        available: vec![configured.clone()],
                    });
                }
                Ok(configured.clone())
            }
            ProviderType::Kubeconfig => {
                if requested.is_empty() {
                    return Ok(self.get_current_context().unwrap_or_default());
                }

                let available: Vec<String> =
                    self.list_contexts()?.into_iter().map(|c| c.name).collect();
                if available.iter().any(|name| name == requested) {
                    Ok(requested.to_string())
                } else {
                    Err(CoreError::UnknownContext {
                        requested: requested.to_string(),
                        available,
                    })
                }
            }
        }
    }

    /// Get an API client for a context, building and caching it on first use
    ///
    /// In stateless mode every call builds a fresh client and the cache is
    /// neither read nor written.
    pub async fn get_api_client(&self, context: &str) -> Result<Arc<F::Client>> {
        let resolved = self.validate_context(context)?;

        if self.stateless.is_stateless() {
            debug!(context = %resolved, "Stateless mode, building uncached client");
            return self.construct(&resolved).await.map(Arc::new);
        }

        let key = cache_key(&resolved).to_string();
        let slot = {
            let mut clients = self.clients.lock();
            Arc::clone(clients.entry(key).or_default())
        };

        let client = slot
            .get_or_try_init(|| async { self.construct(&resolved).await.map(Arc::new) })
            .await?;

        Ok(Arc::clone(client))
    }

    /// Drop the cached client for one context, or all clients if `context` is empty
    pub fn clear_client_cache(&self, context: &str) {
        let mut clients = self.clients.lock();
        if context.is_empty() {
            let count = clients.len();
            clients.clear();
            debug!(count, "Cleared all cached clients");
        } else if clients.remove(cache_key(context)).is_some() {
            debug!(context = %context, "Cleared cached client");
        }
    }

    /// Mark kubeconfig as changed and flush every cached client
    pub fn invalidate(&self) {
        {
            let _active = self.active_context.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.config_loaded.store(false, Ordering::SeqCst);
        }
        self.clear_client_cache("");
    }

    /// Names of contexts with a live cached client
    pub fn cached_contexts(&self) -> Vec<String> {
        let clients = self.clients.lock();
        let mut names: Vec<String> = clients
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    async fn construct(&self, resolved: &str) -> Result<F::Client> {
        let target = match self.config.provider_type {
            ProviderType::InCluster => ClientTarget::InCluster {
                kubeconfig: self.config.kubeconfig_path.clone(),
            },
            ProviderType::Single | ProviderType::Kubeconfig => ClientTarget::Kubeconfig {
                path: self.config.kubeconfig_path.clone(),
                context: Some(resolved.to_string()).filter(|c| !c.is_empty()),
            },
        };

        let client = self
            .factory
            .build(&target)
            .await
            .map_err(|source| CoreError::ClientConstruction {
                context: cache_key(resolved).to_string(),
                source,
            })?;

        info!(context = %cache_key(resolved), "Constructed Kubernetes client");
        Ok(client)
    }
}

fn cache_key(resolved: &str) -> &str {
    if resolved.is_empty() {
        DEFAULT_CONTEXT_KEY
    } else {
        resolved
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kubeconfig::tests::{DEV_PROD, write_kubeconfig};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    /// Client stand-in recording which target built it
    #[derive(Debug)]
    pub(crate) struct FakeClient {
        pub target: ClientTarget,
    }

    /// Factory counting builds; optionally failing every build
    #[derive(Clone, Default)]
    pub(crate) struct FakeFactory {
        pub builds: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl ClientFactory for FakeFactory {
        type Client = FakeClient;

        async fn build(&self, target: &ClientTarget) -> anyhow::Result<FakeClient> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(FakeClient {
                target: target.clone(),
            })
        }
    }

    pub(crate) fn kubeconfig_resolver(
        path: &std::path::Path,
        factory: FakeFactory,
    ) -> ClientResolver<FakeFactory> {
        let config = ProviderConfig {
            kubeconfig_path: Some(path.to_path_buf()),
            ..Default::default()
        };
        ClientResolver::new(Arc::new(config), factory, StatelessMode::default()).unwrap()
    }

    fn many_contexts_kubeconfig(count: usize) -> String {
        let mut yaml = String::from(
            "apiVersion: v1\nkind: Config\ncurrent-context: ctx0\nclusters:\n- name: c\n  cluster:\n    server: https://127.0.0.1:6443\nusers:\n- name: u\n  user:\n    token: t\ncontexts:\n",
        );
        for i in 0..count {
            yaml.push_str(&format!(
                "- name: ctx{i}\n  context:\n    cluster: c\n    user: u\n"
            ));
        }
        yaml
    }

    #[test]
    fn test_dev_prod_scenario() {
        let file = write_kubeconfig(DEV_PROD);
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());

        assert_eq!(resolver.get_current_context().as_deref(), Some("dev"));
        assert_eq!(resolver.validate_context("prod").unwrap(), "prod");

        match resolver.validate_context("staging") {
            Err(CoreError::UnknownContext {
                requested,
                available,
            }) => {
                assert_eq!(requested, "staging");
                assert_eq!(available, vec!["dev", "prod"]);
            }
            other => panic!("expected UnknownContext, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_request_resolves_to_current() {
        let file = write_kubeconfig(DEV_PROD);
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());

        assert_eq!(
            Some(resolver.validate_context("").unwrap()),
            resolver.get_current_context()
        );
    }

    #[test]
    fn test_list_contexts_rereads_file() {
        let file = write_kubeconfig(DEV_PROD);
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());
        assert_eq!(resolver.list_contexts().unwrap().len(), 2);

        std::fs::write(file.path(), many_contexts_kubeconfig(3)).unwrap();
        let contexts = resolver.list_contexts().unwrap();
        assert_eq!(contexts.len(), 3);
        assert!(contexts[0].is_active);
        assert_eq!(resolver.get_current_context().as_deref(), Some("ctx0"));
    }

    #[test]
    fn test_context_override_marks_active() {
        let file = write_kubeconfig(DEV_PROD);
        let config = ProviderConfig {
            kubeconfig_path: Some(file.path().to_path_buf()),
            default_context: "prod".into(),
            ..Default::default()
        };
        let resolver =
            ClientResolver::new(Arc::new(config), FakeFactory::default(), StatelessMode::default())
                .unwrap();

        let contexts = resolver.list_contexts().unwrap();
        assert!(contexts.iter().find(|c| c.name == "prod").unwrap().is_active);
        assert_eq!(resolver.validate_context("").unwrap(), "prod");
    }

    #[test]
    fn test_torn_kubeconfig_surfaces_error() {
        let file = write_kubeconfig("contexts: [\n");
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());

        assert!(matches!(
            resolver.list_contexts(),
            Err(CoreError::Kubeconfig { .. })
        ));
        assert!(matches!(
            resolver.validate_context("dev"),
            Err(CoreError::Kubeconfig { .. })
        ));
        assert!(!resolver.context_exists("dev"));
    }

    #[test]
    fn test_in_cluster_ignores_request() {
        let config = ProviderConfig {
            provider_type: ProviderType::InCluster,
            ..Default::default()
        };
        let resolver =
            ClientResolver::new(Arc::new(config), FakeFactory::default(), StatelessMode::default())
                .unwrap();

        assert_eq!(resolver.validate_context("anything").unwrap(), "in-cluster");
        assert_eq!(resolver.get_current_context().as_deref(), Some("in-cluster"));

        let contexts = resolver.list_contexts().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].name, "in-cluster");
        assert!(contexts[0].is_active);
    }

    #[tokio::test]
    async fn test_in_cluster_client_uses_in_cluster_key_and_target() {
        let config = ProviderConfig {
            provider_type: ProviderType::InCluster,
            kubeconfig_path: Some("/etc/kubemcp/kubeconfig".into()),
            ..Default::default()
        };
        let factory = FakeFactory::default();
        let resolver =
            ClientResolver::new(Arc::new(config), factory.clone(), StatelessMode::default())
                .unwrap();

        let client = resolver.get_api_client("prod").await.unwrap();
        assert_eq!(
            client.target,
            ClientTarget::InCluster {
                kubeconfig: Some("/etc/kubemcp/kubeconfig".into()),
            }
        );
        assert_eq!(resolver.cached_contexts(), vec!["in-cluster"]);

        let again = resolver.get_api_client("").await.unwrap();
        assert!(Arc::ptr_eq(&client, &again));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_straddling_invalidation_is_not_marked_loaded() {
        let file = write_kubeconfig(DEV_PROD);
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());

        let generation = resolver.generation.load(Ordering::SeqCst);
        resolver.invalidate();
        resolver.read_kubeconfig_contexts(generation).unwrap();

        std::fs::write(
            file.path(),
            DEV_PROD.replace("current-context: dev", "current-context: prod"),
        )
        .unwrap();
        assert_eq!(resolver.get_current_context().as_deref(), Some("prod"));
    }

    #[test]
    fn test_single_mode() {
        let file = write_kubeconfig(DEV_PROD);
        let config = ProviderConfig {
            provider_type: ProviderType::Single,
            kubeconfig_path: Some(file.path().to_path_buf()),
            default_context: "prod".into(),
            ..Default::default()
        };
        let resolver =
            ClientResolver::new(Arc::new(config), FakeFactory::default(), StatelessMode::default())
                .unwrap();

        assert_eq!(resolver.validate_context("").unwrap(), "prod");
        assert_eq!(resolver.validate_context("prod").unwrap(), "prod");
        match resolver.validate_context("dev") {
            Err(CoreError::UnknownContext { available, .. }) => {
                assert_eq!(available, vec!["prod"]);
            }
            other => panic!("expected UnknownContext, got {other:?}"),
        }

        let contexts = resolver.list_contexts().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].cluster, "prod-cluster");
    }

    #[test]
    fn test_single_mode_missing_kubeconfig_lists_nothing() {
        let config = ProviderConfig {
            provider_type: ProviderType::Single,
            kubeconfig_path: Some("/nonexistent/kubeconfig".into()),
            default_context: "prod".into(),
            ..Default::default()
        };
        let resolver =
            ClientResolver::new(Arc::new(config), FakeFactory::default(), StatelessMode::default())
                .unwrap();

        assert!(resolver.list_contexts().unwrap().is_empty());
        assert_eq!(resolver.validate_context("").unwrap(), "prod");
    }

    #[test]
    fn test_single_mode_requires_context() {
        let config = ProviderConfig {
            provider_type: ProviderType::Single,
            ..Default::default()
        };
        let result =
            ClientResolver::new(Arc::new(config), FakeFactory::default(), StatelessMode::default());
        assert!(matches!(result, Err(CoreError::Provider(_))));
    }

    #[tokio::test]
    async fn test_cached_client_is_reused() {
        let file = write_kubeconfig(DEV_PROD);
        let factory = FakeFactory::default();
        let resolver = kubeconfig_resolver(file.path(), factory.clone());

        let first = resolver.get_api_client("prod").await.unwrap();
        let second = resolver.get_api_client("prod").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            first.target,
            ClientTarget::Kubeconfig {
                path: Some(file.path().to_path_buf()),
                context: Some("prod".into()),
            }
        );
        assert_eq!(resolver.cached_contexts(), vec!["prod"]);
    }

    #[tokio::test]
    async fn test_empty_context_shares_current_entry() {
        let file = write_kubeconfig(DEV_PROD);
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());

        let implicit = resolver.get_api_client("").await.unwrap();
        let explicit = resolver.get_api_client("dev").await.unwrap();
        assert!(Arc::ptr_eq(&implicit, &explicit));
    }

    #[tokio::test]
    async fn test_stateless_mode_bypasses_cache() {
        let file = write_kubeconfig(DEV_PROD);
        let factory = FakeFactory::default();
        let resolver = kubeconfig_resolver(file.path(), factory.clone());

        let cached = resolver.get_api_client("dev").await.unwrap();
        resolver.stateless().set_stateless(true);

        let first = resolver.get_api_client("dev").await.unwrap();
        let second = resolver.get_api_client("dev").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&cached, &first));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);

        // Existing entries survive until explicitly cleared
        assert_eq!(resolver.cached_contexts(), vec!["dev"]);
        resolver.stateless().set_stateless(false);
        let again = resolver.get_api_client("dev").await.unwrap();
        assert!(Arc::ptr_eq(&cached, &again));
    }

    #[tokio::test]
    async fn test_clear_client_cache() {
        let file = write_kubeconfig(DEV_PROD);
        let resolver = kubeconfig_resolver(file.path(), FakeFactory::default());

        let dev = resolver.get_api_client("dev").await.unwrap();
        let prod = resolver.get_api_client("prod").await.unwrap();

        resolver.clear_client_cache("dev");
        assert_eq!(resolver.cached_contexts(), vec!["prod"]);
        assert!(!Arc::ptr_eq(&dev, &resolver.get_api_client("dev").await.unwrap()));
        assert!(Arc::ptr_eq(&prod, &resolver.get_api_client("prod").await.unwrap()));

        resolver.clear_client_cache("");
        assert!(resolver.cached_contexts().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_context_never_builds() {
        let file = write_kubeconfig(DEV_PROD);
        let factory = FakeFactory::default();
        let resolver = kubeconfig_resolver(file.path(), factory.clone());

        let err = resolver.get_api_client("staging").await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownContext { .. }));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_construction_failure_is_wrapped_and_not_cached() {
        let file = write_kubeconfig(DEV_PROD);
        let factory = FakeFactory {
            fail: true,
            ..Default::default()
        };
        let resolver = kubeconfig_resolver(file.path(), factory.clone());

        match resolver.get_api_client("prod").await {
            Err(CoreError::ClientConstruction { context, .. }) => assert_eq!(context, "prod"),
            other => panic!("expected ClientConstruction, got {other:?}"),
        }
        assert!(resolver.cached_contexts().is_empty());

        // The next request tries again
        assert!(resolver.get_api_client("prod").await.is_err());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_resolution_builds_one_client_per_context() {
        let file = write_kubeconfig(&many_contexts_kubeconfig(5));
        let factory = FakeFactory::default();
        let resolver = Arc::new(kubeconfig_resolver(file.path(), factory.clone()));

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move {
                    let context = format!("ctx{}", i % 5);
                    resolver.get_api_client(&context).await.unwrap()
                })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        let distinct: HashSet<usize> = handles
            .iter()
            .map(|h| Arc::as_ptr(h) as usize)
            .collect();
        assert_eq!(distinct.len(), 5);
        assert_eq!(factory.builds.load(Ordering::SeqCst), 5);
        assert_eq!(resolver.cached_contexts().len(), 5);
    }
}
