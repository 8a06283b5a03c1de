//! Orchestrator client module.
//!
//! # Purpose
//! Thin adapter over the external templating and cluster tools (`helm`,
//! `kubectl`). The control plane treats both as opaque command-line
//! collaborators: only the commands invoked and the output fields consumed
//! are modeled here.
//!
//! The lifecycle engine depends on the `Orchestrator` trait, not on the
//! concrete client, so tests substitute scripted fakes.
mod kube;

pub use kube::HelmKubeClient;

use async_trait::async_trait;
use thiserror::Error;

/// Result of a pod or ingress readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub reason: Option<String>,
}

impl Readiness {
    pub fn ready() -> Readiness {
        Readiness {
            ready: true,
            reason: None,
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Readiness {
        Readiness {
            ready: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("{command} timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("failed to parse {command} output: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Install/uninstall a store release and probe its readiness.
///
/// Readiness probes fold invocation errors into `ready = false` with the
/// error text as the reason; only install/uninstall surface hard errors,
/// which the lifecycle engine records as the store's failure reason.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn install(
        &self,
        id: &str,
        namespace: &str,
        host: &str,
    ) -> Result<(), OrchestratorError>;

    /// Tear down a release and its namespace. Uninstalling a release that no
    /// longer exists is success: the delete path must tolerate partial prior
    /// cleanup.
    async fn uninstall(&self, id: &str, namespace: &str) -> Result<(), OrchestratorError>;

    async fn check_pod_readiness(&self, namespace: &str) -> Readiness;

    async fn check_ingress_readiness(&self, namespace: &str, host: &str) -> Readiness;
}
