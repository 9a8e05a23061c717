//! Text embedding backends: local FastEmbed and hosted OpenAI embeddings.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HomeMatchError, Result};
use crate::openai::OpenAiClient;

/// Output width of `AllMiniLML6V2`.
pub const FASTEMBED_DIMENSIONS: usize = 384;

/// Turns text into vectors for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds every text, preserving order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Length of the vectors this embedder produces.
    fn dimensions(&self) -> usize;

    /// Embeds a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()])
            .await?
            .pop()
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| HomeMatchError::Embedding("model returned no query vector".to_string()))
    }
}

/// Local ONNX embedding model run on the blocking thread pool.
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
}

impl FastEmbedder {
    /// Loads `AllMiniLML6V2`, downloading it on first use.
    pub fn new(show_download_progress: bool) -> Result<Self> {
        let start_time = Instant::now();
        let model = TextEmbedding::try_new(InitOptions {
            model_name: EmbeddingModel::AllMiniLML6V2,
            show_download_progress,
            ..Default::default()
        })
        .map_err(|err| {
            HomeMatchError::Embedding(format!("failed to initialize FastEmbed model: {err}"))
        })?;
        info!(elapsed = ?start_time.elapsed(), "embedding model initialized");
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let start_time = Instant::now();
        let count = texts.len();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await?
            .map_err(|err| HomeMatchError::Embedding(err.to_string()))?;
        debug!(count, elapsed = ?start_time.elapsed(), "generated embeddings");
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        FASTEMBED_DIMENSIONS
    }
}

/// Hosted embeddings from an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    dimensions: usize,
    request_dimensions: bool,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// `dimensions` is sent to the API only when `request_dimensions` is set;
    /// otherwise it must match the model's native width.
    pub fn new(
        client: OpenAiClient,
        model: impl Into<String>,
        dimensions: usize,
        request_dimensions: bool,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            request_dimensions,
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.request_dimensions.then_some(self.dimensions),
        };
        let parsed: EmbeddingResponse = self
            .client
            .post_json("embeddings", &request, "OpenAI embeddings")
            .await?;
        parsed.into_vectors(inputs.len())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let start_time = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        debug!(count = out.len(), elapsed = ?start_time.elapsed(), "generated embeddings");
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl EmbeddingResponse {
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        if self.data.len() != expected {
            return Err(HomeMatchError::InvalidResponse(format!(
                "OpenAI returned {} embeddings for {} inputs",
                self.data.len(),
                expected
            )));
        }
        self.data.sort_by_key(|entry| entry.index);
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
