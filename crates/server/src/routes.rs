//! HTTP endpoints
//!
//! REST surface for chat and evaluation. Chat streaming is delivered as
//! server-sent events; evaluation endpoints return JSON envelopes with a
//! `success` flag, matching what the dashboard consumes.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use bookwise_config::ServerConfig;
use bookwise_core::Error;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/api/ai/chat", get(chat))
        .route("/api/ai/stream", post(stream_chat))
        .route("/api/evaluation/generate-test-set", post(generate_test_set))
        .route("/api/evaluation/run-batch-test", post(run_batch_test))
        .route(
            "/api/evaluation/run-full-evaluation",
            post(run_full_evaluation),
        )
        .route("/api/evaluation/report", get(get_report))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());

    if server.cors_permissive {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::EmptyInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct ChatParams {
    prompt: String,
}

/// Synchronous chat: plain completion, plain-text response
async fn chat(State(state): State<AppState>, Query(params): Query<ChatParams>) -> String {
    match state.answerer.respond(&params.prompt).await {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "chat request failed");
            format!("Error: {e}")
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamRequest {
    prompt: String,
}

/// Basic retrieval-augmented streaming chat over SSE
///
/// Serves the plain path: direct vector search with `[Chunk k]` context
/// labels and no dialogue memory. The full hybrid pipeline with memory is
/// what the evaluator drives.
async fn stream_chat(
    State(state): State<AppState>,
    Json(request): Json<StreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cancel = state.request_token();
    let stream = async_stream::stream! {
        match state.answerer.answer_basic(&request.prompt, &cancel).await {
            Ok(answer) => {
                let mut fragments = answer.stream;
                while let Some(fragment) = fragments.next().await {
                    match fragment {
                        Ok(delta) => yield Ok(Event::default().data(delta)),
                        Err(e) => {
                            error!(error = %e, "answer stream failed");
                            yield Ok(Event::default().data(format!("Error: {e}")));
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "answer setup failed");
                yield Ok(Event::default().data(format!("Error: {e}")));
            }
        }
    };

    Sse::new(stream)
}

#[derive(Debug, Deserialize)]
struct NumQuestionsParams {
    #[serde(rename = "numQuestions", default = "default_num_questions")]
    num_questions: i64,
}

fn default_num_questions() -> i64 {
    10
}

/// Generate and persist a test set
async fn generate_test_set(
    State(state): State<AppState>,
    Query(params): Query<NumQuestionsParams>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .evaluator
        .generate_test_set(params.num_questions, &cancel)
        .await
    {
        Ok(questions) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "test set generated",
                "numQuestions": questions.len(),
            })),
        ),
        Err(e) => {
            error!(error = %e, "test-set generation failed");
            (
                error_status(&e),
                Json(serde_json::json!({
                    "success": false,
                    "message": format!("test-set generation failed: {e}"),
                })),
            )
        }
    }
}

/// Run the persisted test set through the pipeline
async fn run_batch_test(State(state): State<AppState>) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.evaluator.run_batch_test(&cancel).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "batch test complete",
                "numResults": summary.num_questions,
                "averageScores": summary.average_scores,
                "reportPath": summary.report_path,
            })),
        ),
        Err(e) => {
            error!(error = %e, "batch test failed");
            (
                error_status(&e),
                Json(serde_json::json!({
                    "success": false,
                    "message": format!("batch test failed: {e}"),
                })),
            )
        }
    }
}

/// Generate a fresh test set, evaluate it, and write all outputs
async fn run_full_evaluation(
    State(state): State<AppState>,
    Query(params): Query<NumQuestionsParams>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .evaluator
        .run_full_evaluation(params.num_questions, &cancel)
        .await
    {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "full evaluation complete",
                "numResults": summary.num_questions,
                "averageScores": summary.average_scores,
                "testSetPath": summary.test_set_path,
                "reportPath": summary.report_path,
                "historyPath": summary.history_path,
            })),
        ),
        Err(e) => {
            error!(error = %e, "full evaluation failed");
            (
                error_status(&e),
                Json(serde_json::json!({
                    "success": false,
                    "message": format!("full evaluation failed: {e}"),
                })),
            )
        }
    }
}

/// Return the Markdown report wrapped in JSON
async fn get_report(State(state): State<AppState>) -> impl IntoResponse {
    match state.evaluator.read_report() {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "report": report,
            })),
        ),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "success": false,
                "message": format!("{e}"),
            })),
        ),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
