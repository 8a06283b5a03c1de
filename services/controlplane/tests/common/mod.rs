#![allow(dead_code)]

use async_trait::async_trait;
use controlplane::app::{build_router, AppState};
use controlplane::audit::AuditSink;
use controlplane::lifecycle::LifecycleConfig;
use controlplane::model::StoreStatus;
use controlplane::orchestrator::{Orchestrator, OrchestratorError, Readiness};
use controlplane::store::memory::InMemoryStore;
use controlplane::store::QuotaLimits;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tower::ServiceExt;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// Scripted stand-in for helm/kubectl.
///
/// Readiness is attempt-counted: pods (and then the ingress) report ready
/// once `ready_after_checks` pod probes have happened. `None` never becomes
/// ready, which drives the timeout and check-cap paths.
pub struct ScriptedOrchestrator {
    install_error: Option<String>,
    uninstall_error: Option<String>,
    uninstall_delay: Option<Duration>,
    ready_after_checks: Option<u32>,
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    pod_checks: u32,
    installs: Vec<String>,
    uninstalls: Vec<String>,
}

impl ScriptedOrchestrator {
    pub fn ready_after(checks: u32) -> ScriptedOrchestrator {
        ScriptedOrchestrator {
            install_error: None,
            uninstall_error: None,
            uninstall_delay: None,
            ready_after_checks: Some(checks),
            state: Mutex::default(),
        }
    }

    pub fn never_ready() -> ScriptedOrchestrator {
        ScriptedOrchestrator {
            install_error: None,
            uninstall_error: None,
            uninstall_delay: None,
            ready_after_checks: None,
            state: Mutex::default(),
        }
    }

    pub fn failing_install(stderr: &str) -> ScriptedOrchestrator {
        ScriptedOrchestrator {
            install_error: Some(stderr.to_string()),
            uninstall_error: None,
            uninstall_delay: None,
            ready_after_checks: Some(1),
            state: Mutex::default(),
        }
    }

    pub fn failing_uninstall(stderr: &str) -> ScriptedOrchestrator {
        ScriptedOrchestrator {
            install_error: None,
            uninstall_error: Some(stderr.to_string()),
            uninstall_delay: None,
            ready_after_checks: Some(1),
            state: Mutex::default(),
        }
    }

    /// Teardown that takes a while, so tests can observe `Deleting`.
    pub fn slow_uninstall(delay: Duration) -> ScriptedOrchestrator {
        ScriptedOrchestrator {
            install_error: None,
            uninstall_error: None,
            uninstall_delay: Some(delay),
            ready_after_checks: Some(1),
            state: Mutex::default(),
        }
    }

    pub fn pod_checks(&self) -> u32 {
        self.state.lock().expect("script state").pod_checks
    }

    pub fn installed(&self) -> Vec<String> {
        self.state.lock().expect("script state").installs.clone()
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.state.lock().expect("script state").uninstalls.clone()
    }
}

#[async_trait]
impl Orchestrator for ScriptedOrchestrator {
    async fn install(
        &self,
        id: &str,
        _namespace: &str,
        _host: &str,
    ) -> Result<(), OrchestratorError> {
        self.state
            .lock()
            .expect("script state")
            .installs
            .push(id.to_string());
        match &self.install_error {
            Some(stderr) => Err(OrchestratorError::CommandFailed {
                command: format!("helm install {id}"),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn uninstall(&self, id: &str, _namespace: &str) -> Result<(), OrchestratorError> {
        if let Some(delay) = self.uninstall_delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .expect("script state")
            .uninstalls
            .push(id.to_string());
        match &self.uninstall_error {
            Some(stderr) => Err(OrchestratorError::CommandFailed {
                command: format!("helm uninstall {id}"),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn check_pod_readiness(&self, _namespace: &str) -> Readiness {
        let checks = {
            let mut state = self.state.lock().expect("script state");
            state.pod_checks += 1;
            state.pod_checks
        };
        match self.ready_after_checks {
            Some(after) if checks >= after => Readiness::ready(),
            _ => Readiness::not_ready("Pods not ready: web-0"),
        }
    }

    async fn check_ingress_readiness(&self, _namespace: &str, _host: &str) -> Readiness {
        let ready = {
            let state = self.state.lock().expect("script state");
            matches!(self.ready_after_checks, Some(after) if state.pod_checks >= after)
        };
        if ready {
            Readiness::ready()
        } else {
            Readiness::not_ready("Ingress not found")
        }
    }
}

/// Readiness loop settings fast enough for tests.
pub fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        provisioning_timeout: Duration::from_secs(5),
        readiness_check_interval: Duration::from_millis(10),
        max_readiness_checks: 100,
    }
}

pub struct TestApp {
    pub router: axum::routing::RouterIntoService<axum::body::Body, ()>,
    pub store: Arc<InMemoryStore>,
    pub orchestrator: Arc<ScriptedOrchestrator>,
}

pub fn build_app(
    orchestrator: ScriptedOrchestrator,
    limits: QuotaLimits,
    lifecycle: LifecycleConfig,
) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Arc::new(orchestrator);
    let (audit, _audit_task) = AuditSink::spawn(store.clone(), 64);
    let state = AppState {
        store: store.clone(),
        orchestrator: orchestrator.clone(),
        audit,
        limits,
        lifecycle,
        dns_suffix: "stores.localhost".to_string(),
    };
    TestApp {
        router: build_router(state).into_service(),
        store,
        orchestrator,
    }
}

pub fn default_app(orchestrator: ScriptedOrchestrator) -> TestApp {
    build_app(orchestrator, QuotaLimits::default(), fast_lifecycle())
}

/// Poll `GET /stores/{id}` until the store reaches `expected` or the
/// deadline passes; returns the final store JSON.
pub async fn wait_for_status(
    app: &TestApp,
    tenant: &str,
    id: &str,
    expected: StoreStatus,
    deadline: Duration,
) -> serde_json::Value {
    let started = tokio::time::Instant::now();
    loop {
        let request = axum::http::Request::builder()
            .uri(format!("/stores/{id}"))
            .header("x-tenant-id", tenant)
            .body(axum::body::Body::empty())
            .expect("request");
        let response = app.router.clone().oneshot(request).await.expect("get");
        let payload = read_json(response).await;
        if payload["status"] == expected.as_str() {
            return payload;
        }
        if started.elapsed() > deadline {
            panic!(
                "store {id} did not reach {} within {deadline:?}, last: {payload}",
                expected.as_str()
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
