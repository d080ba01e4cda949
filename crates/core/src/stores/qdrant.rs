use crate::stores::local::rank_order;
use crate::traits::VectorIndex;
use crate::{BootstrapError, Candidate, Document, Metadata, MetadataValue, PipelineError, Stage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Remote index backed by a Qdrant collection, searched through its REST API.
///
/// Points carry the passage under `payload.text` (or `payload.page_content`)
/// and its metadata under `payload.metadata`.
pub struct QdrantIndex {
    endpoint: String,
    collection: String,
    client: Client,
    dimension: usize,
}

impl QdrantIndex {
    /// `timeout` bounds every request made to Qdrant, startup checks included.
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            PipelineError::InvalidConfig(format!("qdrant http client: {error}"))
        })?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
            dimension,
        })
    }

    /// Checks the collection exists and stores vectors of the configured dimension.
    pub async fn verify(&self) -> Result<(), BootstrapError> {
        let response = self
            .client
            .get(format!("{}/collections/{}", self.endpoint, self.collection))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BootstrapError::IndexUnavailable(format!(
                "qdrant collection {} returned {}",
                self.collection,
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let size = parsed
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                BootstrapError::IndexUnavailable(format!(
                    "qdrant collection {} does not declare a single vector size",
                    self.collection
                ))
            })?;

        if size as usize != self.dimension {
            return Err(BootstrapError::IndexUnavailable(format!(
                "qdrant collection {} stores {}-dimensional vectors, configured {}",
                self.collection, size, self.dimension
            )));
        }

        info!(
            collection = %self.collection,
            dimension = self.dimension,
            "verified qdrant collection"
        );
        Ok(())
    }
}

fn parse_hit(hit: &Value) -> (f32, Document) {
    let id = match hit.pointer("/id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };
    let text = hit
        .pointer("/payload/text")
        .or_else(|| hit.pointer("/payload/page_content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = hit
        .pointer("/payload/metadata")
        .and_then(Value::as_object)
        .map(|entries| parse_metadata(&id, entries))
        .unwrap_or_default();
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;

    (score, Document { id, text, metadata })
}

/// Keeps the string and number entries; anything else is skipped with a warning.
fn parse_metadata(id: &str, entries: &serde_json::Map<String, Value>) -> Metadata {
    entries
        .iter()
        .filter_map(|(key, value)| {
            match serde_json::from_value::<MetadataValue>(value.clone()) {
                Ok(parsed) => Some((key.clone(), parsed)),
                Err(_) => {
                    warn!(point = %id, key = %key, "skipping unsupported qdrant metadata value");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>, PipelineError> {
        if vector.len() != self.dimension {
            return Err(PipelineError::ProviderMismatch {
                stage: Stage::Retrieval,
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|error| PipelineError::IndexUnavailable(format!("qdrant: {error}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::IndexUnavailable(format!(
                "qdrant search returned {}",
                response.status()
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| PipelineError::IndexUnavailable(format!("qdrant: {error}")))?;
        let mut hits: Vec<(f32, Document)> = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().map(parse_hit).collect())
            .unwrap_or_default();

        hits.sort_by(|(left_score, left), (right_score, right)| {
            rank_order((*left_score, &left.id), (*right_score, &right.id))
        });

        Ok(hits
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(rank, (score, document))| Candidate {
                document,
                rank,
                score,
            })
            .collect())
    }
}
