//! Subcommand implementations; each prints one JSON document to stdout

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use kubemcp_k8s::Registry;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

pub fn contexts(registry: &Registry) -> Result<()> {
    let contexts = registry.list_contexts()?;
    print_json(&json!({
        "provider": registry.config().provider_type,
        "contexts": contexts,
    }))
}

pub fn current(registry: &Registry) -> Result<()> {
    print_json(&json!({ "context": registry.get_current_context() }))
}

pub fn validate(registry: &Registry, context: &str) -> Result<()> {
    let resolved = registry.validate_context(context)?;
    print_json(&json!({ "requested": context, "resolved": resolved }))
}

pub async fn crds(registry: &Registry, context: &str, refresh: bool) -> Result<()> {
    let snapshot = registry.crd_snapshot(context, refresh).await;
    print_json(&json!({
        "context": context,
        "installed": snapshot.installed,
        "toolsets": snapshot.enabled_toolsets(),
        "crd_count": snapshot.crd_names.len(),
        "fetched_at": snapshot.fetched_at,
    }))
}

pub async fn toolsets(registry: &Registry, context: &str) -> Result<()> {
    let resolved = registry.validate_context(context)?;
    let toolsets = registry.get_enabled_toolsets(&resolved).await;
    print_json(&json!({ "context": resolved, "toolsets": toolsets }))
}

pub async fn toolsets_all(registry: &Registry, concurrency: usize) -> Result<()> {
    let contexts: Vec<String> = registry
        .list_contexts()?
        .into_iter()
        .map(|c| c.name)
        .collect();

    let results = registry
        .fan_out(&contexts, concurrency, |context, _client| async move {
            Ok::<_, anyhow::Error>(registry.get_enabled_toolsets(&context).await)
        })
        .await;

    let report: BTreeMap<String, serde_json::Value> = results
        .into_iter()
        .map(|(context, result)| {
            let value = match result {
                Ok(toolsets) => json!({ "success": true, "toolsets": toolsets }),
                Err(e) => json!({ "success": false, "error": format!("{:#}", e) }),
            };
            (context, value)
        })
        .collect();

    print_json(&report)
}

pub async fn crd_exists(registry: &Registry, name: &str, context: &str) -> Result<()> {
    let exists = registry.crd_exists(name, context).await;
    print_json(&json!({ "crd": name, "context": context, "exists": exists }))
}

pub fn config(registry: &Registry) -> Result<()> {
    let out = toml::to_string_pretty(registry.config()).context("Failed to render config")?;
    print!("{}", out);
    Ok(())
}

pub async fn watch(registry: &Registry, interval: Option<Duration>) -> Result<()> {
    registry.on_config_change(|| {
        info!("Kubeconfig reloaded, cached clients dropped");
        Ok(())
    });

    registry.enable_kubeconfig_watch(interval).await;
    eprintln!(
        "Watching {:?} (Ctrl-C to stop)",
        registry.config().watch_paths()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    registry.disable_kubeconfig_watch().await;
    Ok(())
}
