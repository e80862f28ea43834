//! HTTP surface: `POST /checks/run` and `GET /healthz`.
//!
//! Thin adapter over [`heretix_pipeline::Pipeline`], following the teacher's
//! `tinyzkp_api` shape (`AppState` holding shared collaborators, one handler
//! per route, `Router::with_state` plus a tracing layer) scaled down to this
//! crate's two routes. Quota/auth are honored through the
//! [`heretix_gate::UsageGate`]/[`heretix_gate::CurrentUserProvider`] seam
//! before and after the pipeline runs, per the external-interfaces contract.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use heretix_error_reporter::{ErrorCategory, UserFriendlyError, report};
use heretix_gate::{CurrentUserProvider, UsageGate};
use heretix_llm::LlmBackend;
use heretix_pipeline::Pipeline;
use heretix_types::{Lens, RunConfig, RunRecord};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;

/// Collaborators shared across every request. Built once at startup and
/// cloned cheaply (every field is an `Arc`) into each handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub default_config: RunConfig,
    pub usage_gate: Arc<dyn UsageGate>,
    pub user_provider: Arc<dyn CurrentUserProvider>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/checks/run", post(run_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn healthz() -> impl IntoResponse {
    Json(Health { status: "ok" })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ModeField {
    Baseline,
    WebInformed,
}

impl ModeField {
    fn into_lens(self) -> Lens {
        match self {
            ModeField::Baseline => Lens::Rpl,
            ModeField::WebInformed => Lens::Both,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    claim: String,
    #[serde(default)]
    mode: Option<ModeField>,
    #[serde(default)]
    logical_model: Option<String>,
    #[serde(rename = "K", default)]
    k: Option<usize>,
    #[serde(rename = "R", default)]
    r: Option<usize>,
    #[serde(rename = "B", default)]
    b: Option<usize>,
    #[serde(default)]
    mock: Option<bool>,
}

#[derive(Serialize)]
struct RunResponse {
    execution_id: String,
    run_id: String,
    mock: bool,
    checks_allowed: u32,
    checks_used: u32,
    remaining: u32,
    #[serde(flatten)]
    record: RunRecord,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn status_for_category(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Execution => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn execution_id(claim: &str) -> String {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    let mut hasher = Sha256::new();
    hasher.update(claim.as_bytes());
    hasher.update(nonce);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(24);
    use std::fmt::Write;
    for b in &digest[..12] {
        write!(hex, "{:02x}", b).expect("writing to String cannot fail");
    }
    format!("exec-{hex}")
}

async fn run_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RunRequest>,
) -> impl IntoResponse {
    let session_token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let user = match state.user_provider.get_current_user(session_token).await {
        Ok(user) => user,
        Err(e) => {
            return (StatusCode::UNAUTHORIZED, Json(ErrorBody { error: e.to_string() })).into_response();
        }
    };

    let usage_state = match state.usage_gate.get_usage_state(session_token, user.as_ref()).await {
        Ok(state) => state,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response();
        }
    };

    if !usage_state.has_quota() {
        return (
            StatusCode::PAYMENT_REQUIRED,
            Json(ErrorBody { error: "monthly check quota exhausted".to_string() }),
        )
            .into_response();
    }

    let mut config = state.default_config.clone();
    if let Some(mode) = req.mode {
        config.lens = mode.into_lens();
    }
    if let Some(model) = &req.logical_model {
        config.model = model.clone();
    }
    if let Some(k) = req.k {
        config.k_templates = k;
    }
    if let Some(r) = req.r {
        config.r_replicates = r;
    }
    if let Some(b) = req.b {
        config.bootstrap_iters = b;
    }
    let mock = req.mock.unwrap_or(false);

    let pipeline: Arc<Pipeline> = if mock {
        Arc::new(state.pipeline.with_backend(Arc::new(heretix_llm::MockBackend::new()), true))
    } else {
        Arc::clone(&state.pipeline)
    };

    let exec_id = execution_id(&req.claim);
    let result = pipeline.run(&req.claim, &config).await;

    match result {
        Ok(record) => {
            let used = match state.usage_gate.increment_usage(session_token, user.as_ref(), usage_state).await {
                Ok(used) => used,
                Err(_) => usage_state.checks_used,
            };
            let run_id = exec_id.replacen("exec-", "run-", 1);
            let response = RunResponse {
                execution_id: exec_id,
                run_id,
                mock,
                checks_allowed: usage_state.checks_allowed,
                checks_used: used,
                remaining: usage_state.checks_allowed.saturating_sub(used),
                record,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            let (message, category) = report(&err, &exec_id, &exec_id);
            (status_for_category(category), Json(ErrorBody { error: message })).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use heretix_cache::SampleCache;
    use heretix_gate::{AnonymousUserProvider, UnlimitedUsageGate};
    use heretix_llm::MockBackend;
    use heretix_ratelimit::RateLimiter;
    use heretix_store::DisabledArtifactStore;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let backend: Arc<dyn LlmBackend> = Arc::new(MockBackend::new());
        let limiter = Arc::new(RateLimiter::new(6000));
        let store: Arc<dyn heretix_store::ArtifactStore> = Arc::new(DisabledArtifactStore);
        let pipeline = Arc::new(Pipeline::new(backend, limiter, None, None, store, true));
        AppState {
            pipeline,
            default_config: RunConfig { lens: Lens::Rpl, k_templates: 2, r_replicates: 2, bootstrap_iters: 100, ..RunConfig::default() },
            usage_gate: Arc::new(UnlimitedUsageGate),
            user_provider: Arc::new(AnonymousUserProvider),
        }
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = router(test_state());
        let response = app.oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn run_check_accepts_a_mock_request() {
        let app = router(test_state());
        let body = serde_json::json!({"claim": "the sky is blue", "mock": true}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/checks/run")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn run_check_rejects_an_empty_claim() {
        let app = router(test_state());
        let body = serde_json::json!({"claim": "   "}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/checks/run")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
