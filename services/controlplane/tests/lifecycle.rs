mod common;
mod http_helpers;

use axum::http::StatusCode;
use common::{build_app, read_json, wait_for_status, ScriptedOrchestrator, TestApp};
use controlplane::lifecycle::LifecycleConfig;
use controlplane::model::StoreStatus;
use controlplane::store::QuotaLimits;
use http_helpers::{bare_request, json_request};
use std::time::Duration;
use tower::ServiceExt;

fn app_with_lifecycle(
    orchestrator: ScriptedOrchestrator,
    lifecycle: LifecycleConfig,
) -> TestApp {
    build_app(orchestrator, QuotaLimits::default(), lifecycle)
}

async fn create(app: &TestApp) -> String {
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/stores", &[("x-tenant-id", "t1")]))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    read_json(response).await["id"]
        .as_str()
        .expect("id")
        .to_string()
}

#[tokio::test]
async fn install_failure_fails_the_store_with_stderr() {
    let app = app_with_lifecycle(
        ScriptedOrchestrator::failing_install("Error: chart not found"),
        common::fast_lifecycle(),
    );
    let id = create(&app).await;

    let failed =
        wait_for_status(&app, "t1", &id, StoreStatus::Failed, Duration::from_secs(2)).await;
    let reason = failed["failure_reason"].as_str().expect("reason");
    assert!(reason.contains("chart not found"), "{reason}");
}

#[tokio::test]
async fn stuck_pods_hit_the_provisioning_timeout() {
    let app = app_with_lifecycle(
        ScriptedOrchestrator::never_ready(),
        LifecycleConfig {
            provisioning_timeout: Duration::from_millis(150),
            readiness_check_interval: Duration::from_millis(20),
            max_readiness_checks: 1_000,
        },
    );
    let id = create(&app).await;

    let failed =
        wait_for_status(&app, "t1", &id, StoreStatus::Failed, Duration::from_secs(2)).await;
    assert_eq!(
        failed["failure_reason"].as_str(),
        Some("Provisioning timeout exceeded")
    );
}

#[tokio::test]
async fn check_cap_fails_after_exactly_max_attempts() {
    let app = app_with_lifecycle(
        ScriptedOrchestrator::never_ready(),
        LifecycleConfig {
            provisioning_timeout: Duration::from_secs(60),
            readiness_check_interval: Duration::from_millis(1),
            max_readiness_checks: 3,
        },
    );
    let id = create(&app).await;

    let failed =
        wait_for_status(&app, "t1", &id, StoreStatus::Failed, Duration::from_secs(2)).await;
    assert_eq!(
        failed["failure_reason"].as_str(),
        Some("Maximum readiness checks exceeded")
    );
    assert_eq!(app.orchestrator.pod_checks(), 3);
}

#[tokio::test]
async fn ingress_lag_only_delays_readiness() {
    // Readiness lands on the third probe; the loop keeps retrying the
    // earlier not-ready results rather than failing.
    let app = app_with_lifecycle(
        ScriptedOrchestrator::ready_after(3),
        common::fast_lifecycle(),
    );
    let id = create(&app).await;
    let ready = wait_for_status(&app, "t1", &id, StoreStatus::Ready, Duration::from_secs(2)).await;
    assert!(ready.get("ready_at").is_some());
    assert!(app.orchestrator.pod_checks() >= 3);
}

#[tokio::test]
async fn uninstall_failure_marks_delete_failed() {
    let app = app_with_lifecycle(
        ScriptedOrchestrator::failing_uninstall("Error: cluster unreachable"),
        common::fast_lifecycle(),
    );
    let id = create(&app).await;
    wait_for_status(&app, "t1", &id, StoreStatus::Ready, Duration::from_secs(2)).await;

    let response = app
        .router
        .clone()
        .oneshot(bare_request(
            "DELETE",
            &format!("/stores/{id}"),
            &[("x-tenant-id", "t1")],
        ))
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::OK);

    let failed =
        wait_for_status(&app, "t1", &id, StoreStatus::Failed, Duration::from_secs(2)).await;
    let reason = failed["failure_reason"].as_str().expect("reason");
    assert!(reason.starts_with("Deletion failed:"), "{reason}");
    assert!(reason.contains("cluster unreachable"), "{reason}");
}

#[tokio::test]
async fn failed_store_can_still_be_deleted() {
    let app = app_with_lifecycle(
        ScriptedOrchestrator::failing_install("Error: chart not found"),
        common::fast_lifecycle(),
    );
    let id = create(&app).await;
    wait_for_status(&app, "t1", &id, StoreStatus::Failed, Duration::from_secs(2)).await;

    let response = app
        .router
        .clone()
        .oneshot(bare_request(
            "DELETE",
            &format!("/stores/{id}"),
            &[("x-tenant-id", "t1")],
        ))
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::OK);

    let deleted =
        wait_for_status(&app, "t1", &id, StoreStatus::Deleted, Duration::from_secs(2)).await;
    assert!(deleted.get("deleted_at").is_some());
    // Deleting clears the failure reason along with the failed state.
    assert!(deleted.get("failure_reason").is_none());
}
