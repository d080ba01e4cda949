use crate::traits::VectorIndex;
use crate::{BootstrapError, Candidate, Document, Metadata, PipelineError, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

pub const INDEX_FILE_NAME: &str = "index.json";

/// On-disk layout of `<index_dir>/index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub dimension: usize,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub documents: Vec<StoredDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

#[derive(Debug)]
struct Entry {
    document: Document,
    embedding: Vec<f32>,
    norm: f32,
}

/// Index held fully in memory, loaded once at startup and never mutated.
#[derive(Debug)]
pub struct LocalIndex {
    dimension: usize,
    embedding_model: Option<String>,
    entries: Vec<Entry>,
}

impl LocalIndex {
    pub async fn load(dir: &Path) -> Result<Self, BootstrapError> {
        let path = dir.join(INDEX_FILE_NAME);
        if !tokio::fs::try_exists(&path).await? {
            return Err(BootstrapError::IndexUnavailable(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        let file: IndexFile =
            serde_json::from_slice(&bytes).map_err(|error| BootstrapError::CorruptIndex {
                path: path.display().to_string(),
                details: error.to_string(),
            })?;

        let index = Self::from_file(file).map_err(|details| BootstrapError::CorruptIndex {
            path: path.display().to_string(),
            details,
        })?;

        info!(
            path = %path.display(),
            documents = index.entries.len(),
            dimension = index.dimension,
            "loaded local index"
        );
        Ok(index)
    }

    pub fn from_file(file: IndexFile) -> Result<Self, String> {
        if file.dimension == 0 {
            return Err("declared dimension is 0".to_string());
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(file.documents.len());
        for stored in file.documents {
            if stored.embedding.len() != file.dimension {
                return Err(format!(
                    "document {} has embedding dimension {} but index declares {}",
                    stored.id,
                    stored.embedding.len(),
                    file.dimension
                ));
            }
            if !seen.insert(stored.id.clone()) {
                return Err(format!("duplicate document id {}", stored.id));
            }

            let norm = l2_norm(&stored.embedding);
            entries.push(Entry {
                document: Document {
                    id: stored.id,
                    text: stored.text,
                    metadata: stored.metadata,
                },
                embedding: stored.embedding,
                norm,
            });
        }

        Ok(Self {
            dimension: file.dimension,
            embedding_model: file.embedding_model,
            entries,
        })
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    /// Fails when the index records a different embedding model than the configured one.
    pub fn check_embedding_model(&self, configured: &str) -> Result<(), BootstrapError> {
        match self.embedding_model() {
            Some(indexed) if indexed != configured => Err(BootstrapError::ProviderMismatch {
                configured: configured.to_string(),
                indexed: indexed.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn cosine(left: &[f32], left_norm: f32, right: &[f32], right_norm: f32) -> f32 {
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    dot / (left_norm * right_norm)
}

/// Descending score, then ascending document id.
pub(crate) fn rank_order(left: (f32, &str), right: (f32, &str)) -> Ordering {
    right.0.total_cmp(&left.0).then_with(|| left.1.cmp(right.1))
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn document_count(&self) -> Option<usize> {
        Some(self.entries.len())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>, PipelineError> {
        if vector.len() != self.dimension {
            return Err(PipelineError::ProviderMismatch {
                stage: Stage::Retrieval,
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<(f32, &Entry)> = self
            .entries
            .iter()
            .map(|entry| (cosine(&entry.embedding, entry.norm, vector, query_norm), entry))
            .collect();

        scored.sort_by(|(left_score, left), (right_score, right)| {
            rank_order(
                (*left_score, &left.document.id),
                (*right_score, &right.document.id),
            )
        });

        Ok(scored
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(rank, (score, entry))| Candidate {
                document: entry.document.clone(),
                rank,
                score,
            })
            .collect())
    }
}
