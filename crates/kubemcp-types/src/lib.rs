//! Shared types for kubemcp
//!
//! This crate contains data structures used across multiple kubemcp crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Context name used when running with in-cluster credentials
pub const IN_CLUSTER_CONTEXT: &str = "in-cluster";

/// Cache key used when no context name is available
pub const DEFAULT_CONTEXT_KEY: &str = "default";

/// Namespace reported for contexts that do not set one
pub const DEFAULT_NAMESPACE: &str = "default";

// ============================================================================
// Provider Types
// ============================================================================

/// Strategy used to obtain cluster credentials
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// Service account credentials mounted into the pod
    InCluster,
    /// One fixed context from kubeconfig
    Single,
    /// Every context in kubeconfig
    #[default]
    Kubeconfig,
}

impl ProviderType {
    /// Parse a provider name, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "kubeconfig" => Some(Self::Kubeconfig),
            "in-cluster" | "incluster" | "in_cluster" => Some(Self::InCluster),
            "single" => Some(Self::Single),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InCluster => "in-cluster",
            Self::Single => "single",
            Self::Kubeconfig => "kubeconfig",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Kubernetes Context Types
// ============================================================================

/// Kubernetes context information
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContextInfo {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: String,
    pub is_active: bool,
}

impl ContextInfo {
    pub fn new(
        name: String,
        cluster: String,
        user: String,
        namespace: Option<String>,
        is_active: bool,
    ) -> Self {
        Self {
            name,
            cluster,
            user,
            namespace: namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            is_active,
        }
    }

    /// Synthetic entry describing in-cluster credentials
    pub fn in_cluster() -> Self {
        Self::new(
            IN_CLUSTER_CONTEXT.to_string(),
            IN_CLUSTER_CONTEXT.to_string(),
            "serviceaccount".to_string(),
            None,
            true,
        )
    }
}

// ============================================================================
// Ecosystem CRD Types
// ============================================================================

/// Optional ecosystem projects detected by the CRDs they install
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcosystemGroup {
    Flux,
    ArgoCd,
    CertManager,
    Kyverno,
    Gatekeeper,
    Velero,
    Keda,
    Cilium,
    Istio,
    ArgoRollouts,
    KubeVirt,
    Capi,
}

impl EcosystemGroup {
    /// Every known group, in table order
    pub const ALL: [EcosystemGroup; 12] = [
        Self::Flux,
        Self::ArgoCd,
        Self::CertManager,
        Self::Kyverno,
        Self::Gatekeeper,
        Self::Velero,
        Self::Keda,
        Self::Cilium,
        Self::Istio,
        Self::ArgoRollouts,
        Self::KubeVirt,
        Self::Capi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flux => "flux",
            Self::ArgoCd => "argocd",
            Self::CertManager => "certmanager",
            Self::Kyverno => "kyverno",
            Self::Gatekeeper => "gatekeeper",
            Self::Velero => "velero",
            Self::Keda => "keda",
            Self::Cilium => "cilium",
            Self::Istio => "istio",
            Self::ArgoRollouts => "argorollouts",
            Self::KubeVirt => "kubevirt",
            Self::Capi => "capi",
        }
    }

    /// CRD full names whose presence marks the group as installed (any one suffices)
    pub fn crds(&self) -> &'static [&'static str] {
        match self {
            Self::Flux => &[
                "kustomizations.kustomize.toolkit.fluxcd.io",
                "helmreleases.helm.toolkit.fluxcd.io",
                "gitrepositories.source.toolkit.fluxcd.io",
            ],
            Self::ArgoCd => &["applications.argoproj.io", "appprojects.argoproj.io"],
            Self::CertManager => &[
                "certificates.cert-manager.io",
                "issuers.cert-manager.io",
                "clusterissuers.cert-manager.io",
            ],
            Self::Kyverno => &["clusterpolicies.kyverno.io", "policies.kyverno.io"],
            Self::Gatekeeper => &[
                "constrainttemplates.templates.gatekeeper.sh",
                "configs.config.gatekeeper.sh",
            ],
            Self::Velero => &[
                "backups.velero.io",
                "restores.velero.io",
                "schedules.velero.io",
            ],
            Self::Keda => &["scaledobjects.keda.sh", "scaledjobs.keda.sh"],
            Self::Cilium => &[
                "ciliumnetworkpolicies.cilium.io",
                "ciliumendpoints.cilium.io",
            ],
            Self::Istio => &[
                "virtualservices.networking.istio.io",
                "destinationrules.networking.istio.io",
                "gateways.networking.istio.io",
            ],
            Self::ArgoRollouts => &["rollouts.argoproj.io", "analysistemplates.argoproj.io"],
            Self::KubeVirt => &[
                "virtualmachines.kubevirt.io",
                "virtualmachineinstances.kubevirt.io",
            ],
            Self::Capi => &[
                "clusters.cluster.x-k8s.io",
                "machines.cluster.x-k8s.io",
                "machinedeployments.cluster.x-k8s.io",
            ],
        }
    }

    /// Name of the tool layer toolset this group enables
    pub fn toolset(&self) -> &'static str {
        match self {
            Self::Flux | Self::ArgoCd => "gitops",
            Self::CertManager => "certs",
            Self::Kyverno | Self::Gatekeeper => "policy",
            Self::Velero => "backup",
            Self::Keda => "keda",
            Self::Cilium => "cilium",
            Self::Istio => "istio",
            Self::ArgoRollouts => "rollouts",
            Self::KubeVirt => "kubevirt",
            Self::Capi => "capi",
        }
    }

    /// Whether any of this group's CRDs appear in the given name set
    pub fn is_installed_in(&self, crd_names: &BTreeSet<String>) -> bool {
        self.crds().iter().any(|crd| crd_names.contains(*crd))
    }
}

impl fmt::Display for EcosystemGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one CRD probe against a cluster
#[derive(Clone, Debug, Serialize)]
pub struct CrdSnapshot {
    /// Installed flag per ecosystem group
    pub installed: BTreeMap<EcosystemGroup, bool>,

    /// Every CRD name the cluster reported
    pub crd_names: BTreeSet<String>,

    /// When the probe completed
    pub fetched_at: DateTime<Utc>,
}

impl CrdSnapshot {
    /// Build a snapshot from the full set of installed CRD names
    pub fn from_names(crd_names: BTreeSet<String>) -> Self {
        let installed = EcosystemGroup::ALL
            .iter()
            .map(|group| (*group, group.is_installed_in(&crd_names)))
            .collect();

        Self {
            installed,
            crd_names,
            fetched_at: Utc::now(),
        }
    }

    /// Snapshot for a cluster where nothing could be detected
    pub fn empty() -> Self {
        Self::from_names(BTreeSet::new())
    }

    /// Age of the snapshot
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.fetched_at
    }

    /// Fresh iff younger than the given TTL
    pub fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.age() < ttl,
            Err(_) => true,
        }
    }

    /// Toolsets enabled by the installed groups, deduplicated in table order
    pub fn enabled_toolsets(&self) -> Vec<String> {
        let mut toolsets: Vec<String> = Vec::new();
        for group in EcosystemGroup::ALL {
            if self.installed.get(&group).copied().unwrap_or(false) {
                let toolset = group.toolset();
                if !toolsets.iter().any(|t| t == toolset) {
                    toolsets.push(toolset.to_string());
                }
            }
        }
        toolsets
    }
}
