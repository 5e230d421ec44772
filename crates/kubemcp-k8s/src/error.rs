use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to the tool layer
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested context is not present in the active configuration
    #[error("context '{requested}' not found; available contexts: [{}]", .available.join(", "))]
    UnknownContext {
        requested: String,
        available: Vec<String>,
    },

    /// Static configuration is unusable
    #[error("invalid provider configuration: {0}")]
    Provider(String),

    /// Building a live client failed
    #[error("failed to construct Kubernetes client for context '{context}'")]
    ClientConstruction {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Kubeconfig could not be read or parsed
    #[error("failed to load kubeconfig{}", .path.as_ref().map(|p| format!(" from {}", p.display())).unwrap_or_default())]
    Kubeconfig {
        path: Option<PathBuf>,
        #[source]
        source: kube::config::KubeconfigError,
    },

    /// A toolset needs CRDs that are not installed in the cluster
    #[error("{toolset} is not installed in this cluster (requires one of: {})", .required_crds.join(", "))]
    FeatureNotInstalled {
        toolset: String,
        required_crds: Vec<String>,
    },
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_context_message_lists_available() {
        let err = CoreError::UnknownContext {
            requested: "staging".into(),
            available: vec!["dev".into(), "prod".into()],
        };
        assert_eq!(
            err.to_string(),
            "context 'staging' not found; available contexts: [dev, prod]"
        );
    }

    #[test]
    fn test_feature_not_installed_message() {
        let err = CoreError::FeatureNotInstalled {
            toolset: "velero".into(),
            required_crds: vec!["backups.velero.io".into(), "restores.velero.io".into()],
        };
        assert!(err.to_string().contains("backups.velero.io, restores.velero.io"));
    }
}
