use crate::{Candidate, ModelError, PipelineError};
use async_trait::async_trait;
use std::sync::Arc;

/// Turns text into a vector in the same space as the stored index vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Read-only nearest-neighbour lookup over the prebuilt index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored vector and every query vector must have.
    fn dimension(&self) -> usize;

    /// Number of stored documents, when the backend knows it cheaply.
    fn document_count(&self) -> Option<usize> {
        None
    }

    /// At most `k` candidates by descending similarity, ties by ascending document id.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>, PipelineError>;
}

/// Prompt in, generated text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        (**self).embed(text).await
    }
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Arc<T> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn document_count(&self) -> Option<usize> {
        (**self).document_count()
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>, PipelineError> {
        (**self).query(vector, k).await
    }
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).generate(prompt).await
    }
}
