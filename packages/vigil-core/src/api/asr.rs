//! ASR intake router.
//!
//! A small HTTP surface, served on its own port, through which the external
//! speech-recognition collaborator posts user questions. Questions land in
//! the at-most-one [`QuestionRegistry`] slot and bind to the next dispatched
//! inference.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::response::{api_data, api_error};
use crate::protocol_constants::APP_NAME;
use crate::scheduler::QuestionRegistry;

/// Request body for `POST /asr`.
#[derive(Debug, Deserialize)]
struct AsrRequest {
    question: String,
}

/// Builds the ASR intake router.
pub fn asr_router(questions: Arc<QuestionRegistry>) -> Router {
    Router::new()
        .route("/asr", post(submit_question))
        .route("/question/current", get(current_question))
        .route("/question/clear", post(clear_question))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(questions)
}

async fn submit_question(
    State(questions): State<Arc<QuestionRegistry>>,
    Json(request): Json<AsrRequest>,
) -> impl IntoResponse {
    match questions.submit(&request.question) {
        Ok(entry) => api_data(json!({
            "status": "accepted",
            "message": "question will bind to the next inference",
            "question": entry.question,
            "timestamp": entry.created_at_ms,
        }))
        .into_response(),
        Err(reason) => api_error(StatusCode::BAD_REQUEST, reason).into_response(),
    }
}

async fn current_question(State(questions): State<Arc<QuestionRegistry>>) -> impl IntoResponse {
    match questions.current() {
        Some(entry) => api_data(json!({
            "question": entry.question,
            "timestamp": entry.created_at_ms,
        }))
        .into_response(),
        None => api_data(json!({ "question": "" })).into_response(),
    }
}

async fn clear_question(State(questions): State<Arc<QuestionRegistry>>) -> impl IntoResponse {
    let cleared = questions.clear();
    api_data(json!({ "cleared": cleared }))
}

async fn health() -> impl IntoResponse {
    api_data(json!({ "status": "ok", "service": format!("{} ASR intake", APP_NAME) }))
}

async fn stats(State(questions): State<Arc<QuestionRegistry>>) -> impl IntoResponse {
    api_data(questions.stats())
}

/// Binds and serves the intake router until the task is dropped.
pub async fn start_asr_server(
    questions: Arc<QuestionRegistry>,
    port: u16,
) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[ASR] Intake listening on http://0.0.0.0:{}", port);
    axum::serve(listener, asr_router(questions)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::QuestionConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn registry() -> Arc<QuestionRegistry> {
        Arc::new(QuestionRegistry::new(QuestionConfig::default()))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_then_get_round_trips() {
        let questions = registry();
        let router = asr_router(Arc::clone(&questions));

        let response = router
            .clone()
            .oneshot(
                Request::post("/asr")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"question":"how many people"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["question"], "how many people");

        let response = router
            .oneshot(Request::get("/question/current").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["question"], "how many people");
    }

    #[tokio::test]
    async fn empty_question_is_bad_request() {
        let router = asr_router(registry());
        let response = router
            .oneshot(
                Request::post("/asr")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"question":"  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn clear_empties_the_slot() {
        let questions = registry();
        questions.submit("anything there?").unwrap();
        let router = asr_router(Arc::clone(&questions));

        let response = router
            .clone()
            .oneshot(Request::post("/question/clear").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["cleared"], true);

        let response = router
            .oneshot(Request::get("/question/current").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["question"], "");
    }

    #[tokio::test]
    async fn stats_reflect_intake_activity() {
        let questions = registry();
        questions.submit("q1").unwrap();
        let _ = questions.submit("");
        let router = asr_router(Arc::clone(&questions));

        let response = router
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["accepted"], 1);
        assert_eq!(body["data"]["rejected"], 1);
    }
}
