//! Kubeconfig loading and context listing

use std::path::Path;

use kube::config::Kubeconfig;

use crate::error::{CoreError, Result};
use kubemcp_types::ContextInfo;

/// Read kubeconfig from an explicit path, or via kube's default discovery
///
/// Default discovery honours `KUBECONFIG` (merging multiple files) and falls
/// back to `~/.kube/config`. A file caught mid-write surfaces as a parse error.
pub fn load(path: Option<&Path>) -> Result<Kubeconfig> {
    let result = match path {
        Some(path) => Kubeconfig::read_from(path),
        None => Kubeconfig::read(),
    };

    result.map_err(|source| CoreError::Kubeconfig {
        path: path.map(Path::to_path_buf),
        source,
    })
}

/// Get all contexts from a kubeconfig, marking `active` as the current one
pub fn contexts(kubeconfig: &Kubeconfig, active: Option<&str>) -> Vec<ContextInfo> {
    kubeconfig
        .contexts
        .iter()
        .map(|ctx| {
            let context = ctx.context.as_ref();
            ContextInfo::new(
                ctx.name.clone(),
                context.map(|c| c.cluster.clone()).unwrap_or_default(),
                context.and_then(|c| c.user.clone()).unwrap_or_default(),
                context.and_then(|c| c.namespace.clone()),
                Some(ctx.name.as_str()) == active,
            )
        })
        .collect()
}

/// Look up a single context by name
pub fn find_context(kubeconfig: &Kubeconfig, name: &str) -> Option<ContextInfo> {
    contexts(kubeconfig, Some(name))
        .into_iter()
        .find(|c| c.name == name)
}
