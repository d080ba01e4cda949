use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use grounded_qa_core::{ErrorKind, PipelineError, SupportingDocument, VectorIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub retrieved_documents: Vec<SupportingDocument>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Pipeline(error) if error.kind() == ErrorKind::InvalidQuestion => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Dropping the pipeline future on timeout or disconnect abandons its in-flight calls.
async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let answer = tokio::time::timeout(
        state.request_timeout,
        state.pipeline.answer(&request.question),
    )
    .await
    .map_err(|_| {
        warn!(timeout = ?state.request_timeout, "question exceeded request deadline");
        ApiError::Timeout(state.request_timeout)
    })??;

    let retrieved_documents = answer.supporting_documents();
    Ok(Json(AskResponse {
        answer: answer.text,
        retrieved_documents,
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "documents": state.pipeline.index().document_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SharedEmbedder, SharedIndex, SharedModel};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use grounded_qa_core::stores::{IndexFile, StoredDocument};
    use grounded_qa_core::{
        EmbeddingProvider, HashingEmbedder, LanguageModel, LocalIndex, Metadata, MetadataValue,
        ModelError, PipelineConfig, QueryPipeline,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const DIMENSIONS: usize = 32;

    struct ParisModel {
        delay: Duration,
    }

    #[async_trait]
    impl LanguageModel for ParisModel {
        fn model(&self) -> &str {
            "paris"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            tokio::time::sleep(self.delay).await;
            if prompt.starts_with("Given the following question and context") {
                Ok("Paris is the capital of France.".to_string())
            } else {
                Ok("The capital of France is Paris.".to_string())
            }
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        fn model(&self) -> &str {
            "down"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Timeout {
                provider: "ollama".to_string(),
                elapsed: Duration::from_secs(60),
            })
        }
    }

    fn state(embedder: SharedEmbedder, delay: Duration, timeout: Duration) -> Arc<AppState> {
        let mut metadata = Metadata::new();
        metadata.insert("page".to_string(), MetadataValue::from("1"));
        metadata.insert("source".to_string(), MetadataValue::from("doc.pdf"));
        let text = "Paris is the capital of France. The Eiffel Tower is in Paris.";
        let index = LocalIndex::from_file(IndexFile {
            dimension: DIMENSIONS,
            embedding_model: None,
            documents: vec![StoredDocument {
                id: "doc-1".to_string(),
                text: text.to_string(),
                metadata,
                embedding: HashingEmbedder::new(DIMENSIONS).embed_text(text),
            }],
        })
        .unwrap();

        let index: SharedIndex = Arc::new(index);
        let model: SharedModel = Arc::new(ParisModel { delay });
        let pipeline =
            QueryPipeline::new(embedder, index, model, PipelineConfig::default()).unwrap();
        Arc::new(AppState {
            pipeline,
            request_timeout: timeout,
        })
    }

    fn healthy_state() -> Arc<AppState> {
        state(
            Arc::new(HashingEmbedder::new(DIMENSIONS)),
            Duration::ZERO,
            Duration::from_secs(5),
        )
    }

    async fn post_ask(state: Arc<AppState>, body: &str) -> (StatusCode, Value) {
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ask")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn ask_returns_answer_and_documents() {
        let (status, body) =
            post_ask(healthy_state(), r#"{"question": "What is the capital of France?"}"#).await;

        assert_eq!(status, StatusCode::OK);
        let response: AskResponse = serde_json::from_value(body).unwrap();
        assert!(response.answer.contains("Paris"));
        assert_eq!(
            response.retrieved_documents,
            vec![SupportingDocument {
                page: "1".to_string(),
                link: "doc.pdf".to_string(),
                snippet: "Paris is the capital of France.".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn blank_question_is_a_bad_request() {
        let (status, body) = post_ask(healthy_state(), r#"{"question": "  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("question is empty"));
    }

    #[tokio::test]
    async fn embedding_failure_is_a_500_with_detail() {
        let state = state(Arc::new(DownEmbedder), Duration::ZERO, Duration::from_secs(5));
        let (status, body) =
            post_ask(state, r#"{"question": "What is the capital of France?"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.starts_with("embedding stage failed"));
    }

    #[tokio::test]
    async fn slow_pipeline_hits_the_request_deadline() {
        let state = state(
            Arc::new(HashingEmbedder::new(DIMENSIONS)),
            Duration::from_millis(500),
            Duration::from_millis(50),
        );
        let (status, body) =
            post_ask(state, r#"{"question": "What is the capital of France?"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_by_the_extractor() {
        let (status, _) = post_ask(healthy_state(), r#"{"query": "wrong field"}"#).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn health_reports_document_count() {
        let response = router(healthy_state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["documents"], 1);
    }
}
