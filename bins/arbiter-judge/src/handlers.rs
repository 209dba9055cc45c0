// HTTP route handlers for the judge service

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use arbiter_common::types::{ExecutionRequest, TestCase};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/judge/run", post(run_submission))
        .route("/status", get(health_check))
        .with_state(state)
}

/// Body sent by the submissions service. Fields are optional here so that
/// any shape problem maps to the same 400 response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub code: Option<String>,
    pub language: Option<String>,
    pub problem_id: Option<Value>,
    pub test_cases: Option<Value>,
}

impl RunRequest {
    fn into_execution_request(self) -> Option<(String, ExecutionRequest)> {
        let code = self.code.filter(|c| !c.is_empty())?;
        let language = self.language.filter(|l| !l.is_empty())?;
        let problem_id = self.problem_id.filter(is_present)?;
        let test_cases: Vec<TestCase> = match self.test_cases {
            Some(cases @ Value::Array(_)) => serde_json::from_value(cases).ok()?,
            _ => return None,
        };

        let problem_id = match problem_id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Some((problem_id, ExecutionRequest::new(language, code, test_cases)))
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

fn invalid_body() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "message": "Invalid request body" })),
    )
        .into_response()
}

/// POST /judge/run - Judge a submission and return the whole result
pub async fn run_submission(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable request body");
            return invalid_body();
        }
    };

    let Some((problem_id, request)) = body.into_execution_request() else {
        warn!("Request body missing code/language/problemId/testCases");
        return invalid_body();
    };

    info!(
        problem_id = %problem_id,
        language = %request.language,
        test_cases = request.test_cases.len(),
        source_size = request.code.len(),
        "Received submission"
    );

    let result = state.orchestrator.execute(&request).await;

    info!(
        problem_id = %problem_id,
        verdict = %result.verdict,
        time_ms = result.time_ms,
        "Submission judged"
    );
    (StatusCode::OK, Json(result)).into_response()
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
