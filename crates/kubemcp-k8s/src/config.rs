//! Provider configuration resolved from the environment
//!
//! All settings are read once at startup. Unknown or malformed values are
//! logged and replaced with their defaults so a typo never prevents startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use kubemcp_types::ProviderType;

pub const ENV_PROVIDER: &str = "MCP_K8S_PROVIDER";
pub const ENV_KUBECONFIG: &str = "MCP_K8S_KUBECONFIG";
pub const ENV_CONTEXT: &str = "MCP_K8S_CONTEXT";
pub const ENV_QPS: &str = "MCP_K8S_QPS";
pub const ENV_BURST: &str = "MCP_K8S_BURST";
pub const ENV_TIMEOUT: &str = "MCP_K8S_TIMEOUT";
pub const ENV_STATELESS: &str = "MCP_STATELESS_MODE";
pub const ENV_WATCH: &str = "MCP_KUBECONFIG_WATCH";
pub const ENV_WATCH_INTERVAL: &str = "MCP_KUBECONFIG_WATCH_INTERVAL";

const DEFAULT_QPS: f32 = 100.0;
const DEFAULT_BURST: u32 = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default poll interval for kubeconfig change detection
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Immutable provider configuration
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    /// Explicit kubeconfig file; None means kube's default discovery (`KUBECONFIG`, then ~/.kube/config)
    pub kubeconfig_path: Option<PathBuf>,
    /// Fixed context for single mode, active context override for kubeconfig mode
    pub default_context: String,
    pub qps: f32,
    pub burst: u32,
    pub timeout_seconds: u64,
    pub stateless: bool,
    pub watch_kubeconfig: bool,
    #[serde(with = "duration_secs")]
    pub watch_interval: Duration,
    /// Raw `KUBECONFIG` value, used to find files to watch
    #[serde(skip)]
    pub ambient_kubeconfig: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            kubeconfig_path: None,
            default_context: String::new(),
            qps: DEFAULT_QPS,
            burst: DEFAULT_BURST,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            stateless: false,
            watch_kubeconfig: false,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            ambient_kubeconfig: None,
        }
    }
}

impl ProviderConfig {
    /// Load configuration from the process environment
    pub fn load_from_environment() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider_type = match get(ENV_PROVIDER) {
            Some(raw) => ProviderType::parse(&raw).unwrap_or_else(|| {
                warn!(
                    value = %raw,
                    "Unknown {}, falling back to kubeconfig", ENV_PROVIDER
                );
                ProviderType::Kubeconfig
            }),
            None => ProviderType::default(),
        };

        Self {
            provider_type,
            kubeconfig_path: get(ENV_KUBECONFIG).map(PathBuf::from),
            default_context: get(ENV_CONTEXT).unwrap_or_default(),
            qps: parse_or(get(ENV_QPS), ENV_QPS, DEFAULT_QPS),
            burst: parse_or(get(ENV_BURST), ENV_BURST, DEFAULT_BURST),
            timeout_seconds: parse_or(get(ENV_TIMEOUT), ENV_TIMEOUT, DEFAULT_TIMEOUT_SECS),
            stateless: get(ENV_STATELESS).is_some_and(|v| is_truthy(&v)),
            watch_kubeconfig: get(ENV_WATCH).is_some_and(|v| is_truthy(&v)),
            watch_interval: get(ENV_WATCH_INTERVAL)
                .map(|v| Duration::from_secs(parse_or(Some(v), ENV_WATCH_INTERVAL, 5)))
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_WATCH_INTERVAL),
            ambient_kubeconfig: get("KUBECONFIG"),
        }
    }

    /// Request timeout applied to constructed clients
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Configured context, if any
    pub fn context(&self) -> Option<&str> {
        Some(self.default_context.as_str()).filter(|c| !c.is_empty())
    }

    /// Kubeconfig files whose modification should invalidate cached clients
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.kubeconfig_path {
            return vec![path.clone()];
        }

        if let Some(raw) = &self.ambient_kubeconfig {
            let paths: Vec<PathBuf> = std::env::split_paths(raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                return paths;
            }
        }

        dirs::home_dir()
            .map(|home| vec![home.join(".kube").join("config")])
            .unwrap_or_default()
    }
}

/// Interpret `true`, `1` or `yes` (any case) as enabled
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(value = %raw, "Invalid {}, using default", key);
            default
        }),
        None => default,
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
