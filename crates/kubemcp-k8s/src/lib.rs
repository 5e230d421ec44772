//! Kubernetes client resolution for kubemcp
//!
//! This crate decides which cluster a tool request targets, hands out cached
//! API clients per context, watches kubeconfig for external changes, and keeps
//! a TTL cache of which ecosystem CRDs each cluster has installed.

mod client;
mod config;
mod crd;
mod error;
mod kubeconfig;
mod registry;
mod resolver;
mod stateless;
mod watcher;

pub use client::{ClientFactory, ClientTarget, KubeClientFactory};
pub use config::{DEFAULT_WATCH_INTERVAL, ProviderConfig, is_truthy};
pub use crd::{CRD_CACHE_TTL, CRD_PROBE_TIMEOUT, CrdCache, CrdProbe, ResolverCrdProbe};
pub use error::{CoreError, Result};
pub use registry::{DEFAULT_FAN_OUT_LIMIT, Registry};
pub use resolver::ClientResolver;
pub use stateless::StatelessMode;
pub use watcher::{ChangeCallback, ConfigChangeWatcher, Invalidate, STOP_TIMEOUT};

// Re-export types that are used in our public API
pub use kubemcp_types::{
    ContextInfo, CrdSnapshot, DEFAULT_CONTEXT_KEY, EcosystemGroup, IN_CLUSTER_CONTEXT,
    ProviderType,
};
