//! helm/kubectl command client.
//!
//! Commands are built argv-only; nothing is ever passed through a shell.
//! `id`, `namespace`, and `host` are derived internally and restricted to
//! `[a-z0-9-]` (hosts additionally allow dots), but every value is validated
//! again before it reaches an argv slot.
use super::{Orchestrator, OrchestratorError, Readiness};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Orchestrator client invoking `helm` and `kubectl`.
pub struct HelmKubeClient {
    chart_path: PathBuf,
    command_timeout: Duration,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl HelmKubeClient {
    pub fn new(chart_path: PathBuf, command_timeout: Duration) -> HelmKubeClient {
        HelmKubeClient {
            chart_path,
            command_timeout,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, OrchestratorError> {
        let rendered = format!("{program} {}", args.join(" "));
        debug!(command = %rendered, "invoking orchestrator command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OrchestratorError::Io {
                command: rendered.clone(),
                source,
            })?;

        match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(source)) => Err(OrchestratorError::Io {
                command: rendered,
                source,
            }),
            Err(_) => Err(OrchestratorError::Timeout {
                command: rendered,
                timeout_ms: self.command_timeout.as_millis() as u64,
            }),
        }
    }

    async fn kubectl_json<T>(&self, args: &[&str]) -> Result<T, OrchestratorError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let output = self.run("kubectl", args).await?;
        let rendered = format!("kubectl {}", args.join(" "));
        if !output.success {
            return Err(OrchestratorError::CommandFailed {
                command: rendered,
                stderr: output.stderr,
            });
        }
        serde_json::from_str(&output.stdout).map_err(|source| OrchestratorError::Parse {
            command: rendered,
            source,
        })
    }
}

#[async_trait]
impl Orchestrator for HelmKubeClient {
    async fn install(
        &self,
        id: &str,
        namespace: &str,
        host: &str,
    ) -> Result<(), OrchestratorError> {
        validate_label(id)?;
        validate_label(namespace)?;
        validate_hostname(host)?;

        let chart = self.chart_path.to_string_lossy().into_owned();
        let host_value = format!("ingress.host={host}");
        let args = [
            "install",
            id,
            chart.as_str(),
            "--namespace",
            namespace,
            "--create-namespace",
            "--set",
            host_value.as_str(),
        ];
        let output = self.run("helm", &args).await?;
        if !output.success {
            return Err(OrchestratorError::CommandFailed {
                command: format!("helm install {id}"),
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    async fn uninstall(&self, id: &str, namespace: &str) -> Result<(), OrchestratorError> {
        validate_label(id)?;
        validate_label(namespace)?;

        let output = self
            .run("helm", &["uninstall", id, "--namespace", namespace])
            .await?;
        if !output.success && !release_missing(&output.stderr) {
            return Err(OrchestratorError::CommandFailed {
                command: format!("helm uninstall {id}"),
                stderr: output.stderr,
            });
        }

        let output = self
            .run(
                "kubectl",
                &[
                    "delete",
                    "namespace",
                    namespace,
                    "--wait=false",
                    "--ignore-not-found",
                ],
            )
            .await?;
        if !output.success {
            return Err(OrchestratorError::CommandFailed {
                command: format!("kubectl delete namespace {namespace}"),
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    async fn check_pod_readiness(&self, namespace: &str) -> Readiness {
        if let Err(err) = validate_label(namespace) {
            return Readiness::not_ready(err.to_string());
        }
        match self
            .kubectl_json::<PodList>(&["get", "pods", "--namespace", namespace, "--output", "json"])
            .await
        {
            Ok(pods) => evaluate_pods(&pods),
            Err(err) => Readiness::not_ready(err.to_string()),
        }
    }

    async fn check_ingress_readiness(&self, namespace: &str, host: &str) -> Readiness {
        if let Err(err) = validate_label(namespace).and_then(|_| validate_hostname(host)) {
            return Readiness::not_ready(err.to_string());
        }
        match self
            .kubectl_json::<IngressList>(&[
                "get",
                "ingress",
                "--namespace",
                namespace,
                "--output",
                "json",
            ])
            .await
        {
            Ok(ingresses) => evaluate_ingresses(&ingresses, host),
            Err(err) => Readiness::not_ready(err.to_string()),
        }
    }
}

/// `helm uninstall` of a release that no longer exists is not a failure.
fn release_missing(stderr: &str) -> bool {
    stderr.contains("release: not found") || stderr.contains("Release not loaded")
}

fn validate_label(value: &str) -> Result<(), OrchestratorError> {
    let ok = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidIdentifier(value.to_string()))
    }
}

fn validate_hostname(value: &str) -> Result<(), OrchestratorError> {
    let ok = !value.is_empty()
        && value.len() <= 253
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidIdentifier(value.to_string()))
    }
}

// Only the fields the control plane consumes are modeled; everything else in
// the kubectl output is ignored.

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

fn evaluate_pods(pods: &PodList) -> Readiness {
    if pods.items.is_empty() {
        return Readiness::not_ready("No pods found");
    }
    let not_ready: Vec<&str> = pods
        .items
        .iter()
        .filter(|pod| {
            !pod.status
                .conditions
                .iter()
                .any(|condition| condition.kind == "Ready" && condition.status == "True")
        })
        .map(|pod| pod.metadata.name.as_str())
        .collect();
    if not_ready.is_empty() {
        Readiness::ready()
    } else {
        Readiness::not_ready(format!("Pods not ready: {}", not_ready.join(", ")))
    }
}

#[derive(Debug, Deserialize)]
struct IngressList {
    #[serde(default)]
    items: Vec<Ingress>,
}

#[derive(Debug, Deserialize)]
struct Ingress {
    #[serde(default)]
    spec: IngressSpec,
    #[serde(default)]
    status: IngressStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IngressSpec {
    #[serde(default)]
    rules: Vec<IngressRule>,
}

#[derive(Debug, Deserialize)]
struct IngressRule {
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngressStatus {
    #[serde(default)]
    load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancerStatus {
    #[serde(default)]
    ingress: Vec<serde_json::Value>,
}

fn evaluate_ingresses(ingresses: &IngressList, host: &str) -> Readiness {
    let matching = ingresses.items.iter().find(|ingress| {
        ingress
            .spec
            .rules
            .iter()
            .any(|rule| rule.host.as_deref() == Some(host))
    });
    match matching {
        None => Readiness::not_ready("Ingress not found"),
        Some(ingress) if ingress.status.load_balancer.ingress.is_empty() => {
            Readiness::not_ready("Ingress has no load balancer IP")
        }
        Some(_) => Readiness::ready(),
    }
}
