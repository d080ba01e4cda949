use crate::traits::EmbeddingProvider;
use crate::{ModelError, PipelineError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_HASHING_DIMENSIONS: usize = 128;
pub const HASHING_EMBEDDER_MODEL: &str = "hashing-trigram";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Local character-trigram embedder. Deterministic and offline; only useful
/// against an index that was built with the same embedder.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let bucket = (fnv1a(window) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vector.iter_mut().for_each(|value| *value /= magnitude);
        }
        vector
    }
}

fn fnv1a(window: &[char]) -> u64 {
    let mut hash = 1469598103934665603u64;
    let mut buffer = [0u8; 4];
    for ch in window {
        for byte in ch.encode_utf8(&mut buffer).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model(&self) -> &str {
        HASHING_EMBEDDER_MODEL
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Embeddings from an Ollama server (`POST /api/embeddings`).
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let base = Url::parse(base_url).map_err(|error| {
            PipelineError::InvalidConfig(format!("embedding url `{base_url}`: {error}"))
        })?;
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            PipelineError::InvalidConfig(format!("embedding http client: {error}"))
        })?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", base.as_str().trim_end_matches('/')),
            model: model.into(),
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|error| ModelError::from_reqwest("ollama", self.timeout, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                provider: "ollama".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|error| ModelError::from_reqwest("ollama", self.timeout, error))?;

        if parsed.embedding.is_empty() {
            return Err(ModelError::malformed("ollama", "response has no embedding"));
        }

        debug!(model = %self.model, dimension = parsed.embedding.len(), "embedded text");
        Ok(parsed.embedding)
    }
}
