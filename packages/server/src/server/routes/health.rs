use std::future::Future;
use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::domains::account_merge::stale_in_progress_after;
use crate::kernel::Clock;
use crate::server::app::AppState;

/// Per-check bound so a wedged store cannot hang the endpoint
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Never written; reading it exercises the key-value table tokens and snapshots live in
const HEALTH_CHECK_KEY: &str = "health:check";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    key_value_store: CheckResult,
    merge_requests: MergeBacklog,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// IN_PROGRESS requests waiting on the recovery job
#[derive(Debug, Serialize)]
pub struct MergeBacklog {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stalled: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn bounded<T, F>(check: F) -> Result<T, String>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}s", CHECK_TIMEOUT.as_secs())),
    }
}

/// Health check endpoint
///
/// 503 when either store is unreachable. Stalled merges only downgrade the
/// status to "degraded"; the recovery job closes them.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let deps = &state.deps;

    let key_value_store = match bounded(deps.kv_store.get(HEALTH_CHECK_KEY)).await {
        Ok(_) => CheckResult {
            ok: true,
            error: None,
        },
        Err(error) => CheckResult {
            ok: false,
            error: Some(error),
        },
    };

    let cutoff = deps.clock.now() - stale_in_progress_after();
    let merge_requests = match bounded(deps.merge_requests.find_stale_in_progress(cutoff)).await {
        Ok(stale) => MergeBacklog {
            ok: true,
            stalled: Some(stale.len()),
            error: None,
        },
        Err(error) => MergeBacklog {
            ok: false,
            stalled: None,
            error: Some(error),
        },
    };

    let (status_code, status) = if !key_value_store.ok || !merge_requests.ok {
        tracing::warn!(?key_value_store, ?merge_requests, "health check failed");
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if merge_requests.stalled.unwrap_or(0) > 0 {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            key_value_store,
            merge_requests,
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, Router};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::domains::account_merge::models::{NewMergeRequest, StatusUpdate};
    use crate::domains::account_merge::{MergeRequestRepository, MergeRequestStatus};
    use crate::kernel::{Clock, TestDependencies};
    use crate::server::app::build_app;
    use crate::server::auth::JwtService;

    use super::*;

    fn app(test_deps: &TestDependencies) -> Router {
        let state = AppState {
            deps: Arc::new(test_deps.clone().into_deps()),
        };
        build_app(
            state,
            Arc::new(JwtService::new("health_secret", "identity-platform".to_string())),
        )
    }

    async fn check(app: Router) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_is_public_and_healthy() {
        let test_deps = TestDependencies::new();

        let (status, body) = check(app(&test_deps)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["key_value_store"]["ok"], true);
        assert_eq!(body["merge_requests"]["stalled"], 0);
    }

    #[tokio::test]
    async fn test_unreachable_key_value_store_is_unhealthy() {
        let test_deps = TestDependencies::new();
        test_deps.kv_store.get_failures.fail_always();

        let (status, body) = check(app(&test_deps)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["key_value_store"]["ok"], false);
        assert!(body["key_value_store"]["error"]
            .as_str()
            .unwrap()
            .contains("key_value_entries"));
    }

    #[tokio::test]
    async fn test_stalled_merge_degrades_health() {
        let test_deps = TestDependencies::new();
        let target = test_deps.identities.add_user("owner@example.com");
        let source = test_deps.identities.add_user("owner+github@example.com");
        let created = test_deps
            .merge_requests
            .create(
                &NewMergeRequest::builder()
                    .target_user_id(target.id)
                    .source_user_id(source.id)
                    .provider("github")
                    .provider_id("gh-1")
                    .created_at(test_deps.clock.now())
                    .build(),
            )
            .await
            .unwrap();
        test_deps
            .merge_requests
            .update_status(
                created.id,
                MergeRequestStatus::PendingEmailVerification,
                &StatusUpdate::InProgress {
                    email_verified_at: test_deps.clock.now(),
                },
            )
            .await
            .unwrap();
        test_deps.clock.advance(chrono::Duration::hours(2));

        let (status, body) = check(app(&test_deps)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["merge_requests"]["stalled"], 1);
    }
}
