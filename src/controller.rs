use std::time::Instant;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointId, PointStruct, ScalarQuantizationBuilder,
    SearchParamsBuilder, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{HomeMatchError, Result};
use crate::listing::{ListingDocument, ListingMetadata};

/// Payload key holding the document text next to the metadata fields.
const CONTENT_KEY: &str = "description";

/// Points sent per upsert request.
const UPSERT_CHUNK: usize = 256;

/// A stored document and its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: ListingDocument,
    pub score: f32,
}

/// Storage and nearest-neighbor lookup for embedded listing documents.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Makes sure the collection exists with cosine distance over
    /// `dimensions`-wide vectors.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - Vector width; must match the embedder's output.
    /// * `recreate` - Drop any existing collection (and its points) first.
    ///
    /// # Example
    ///
    /// ```
    /// index.ensure_collection(embedder.dimensions(), true).await?;
    /// ```
    async fn ensure_collection(&self, dimensions: usize, recreate: bool) -> Result<()>;

    /// Stores `documents[i]` under `vectors[i]`.
    ///
    /// # Arguments
    ///
    /// * `documents` - Listing documents; metadata and text become the payload.
    /// * `vectors` - One embedding per document, in the same order.
    ///
    /// # Returns
    ///
    /// An error if the two lengths differ or the store rejects the write.
    async fn upsert(&self, documents: &[ListingDocument], vectors: Vec<Vec<f32>>) -> Result<()>;

    /// Nearest-neighbor search.
    ///
    /// # Arguments
    ///
    /// * `vector` - The query embedding.
    /// * `k` - Maximum number of documents to return.
    ///
    /// # Returns
    ///
    /// Up to `k` documents with their similarity scores, most similar first.
    ///
    /// # Example
    ///
    /// ```
    /// let query = embedder.embed_query("detached house in cul de sac").await?;
    /// for hit in index.search(query, 3).await? {
    ///     println!("{:.3} {}", hit.score, hit.document.page_content);
    /// }
    /// ```
    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredDocument>>;
}

/// Qdrant-backed listing collection.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    /// Connects to a Qdrant server and binds the client to one collection.
    ///
    /// No request is sent yet; an unreachable server surfaces on the first
    /// collection call.
    ///
    /// # Arguments
    ///
    /// * `url` - The Qdrant gRPC endpoint, e.g. `http://localhost:6334`.
    /// * `api_key` - Optional API key for Qdrant Cloud or secured servers.
    /// * `collection` - Name of the collection holding the listings.
    ///
    /// # Returns
    ///
    /// The index, or a `HomeMatchError::Qdrant` if the client cannot be built.
    ///
    /// # Example
    ///
    /// ```
    /// let index = QdrantIndex::connect("http://localhost:6334", None, "real_estate_listings")?;
    /// index.ensure_collection(384, true).await?;
    /// ```
    pub fn connect(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
    ) -> Result<Self> {
        let mut config = Qdrant::from_url(url);
        if let Some(key) = api_key {
            config = config.api_key(key);
        }
        let client = config.build()?;
        Ok(Self {
            client,
            collection: collection.into(),
        })
    }

    /// Name of the collection this index reads and writes.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dimensions: usize, recreate: bool) -> Result<()> {
        let exists = self.client.collection_exists(self.collection.as_str()).await?;
        if exists && !recreate {
            debug!(collection = %self.collection, "collection already exists");
            return Ok(());
        }
        if exists {
            info!(collection = %self.collection, "dropping existing collection");
            self.client.delete_collection(self.collection.as_str()).await?;
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(self.collection.as_str())
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine))
                    .quantization_config(ScalarQuantizationBuilder::default()),
            )
            .await?;
        info!(collection = %self.collection, dimensions, "created collection");
        Ok(())
    }

    async fn upsert(&self, documents: &[ListingDocument], vectors: Vec<Vec<f32>>) -> Result<()> {
        check_lengths(documents.len(), vectors.len())?;
        let mut points = Vec::with_capacity(documents.len());
        for (ordinal, (document, vector)) in documents.iter().zip(vectors).enumerate() {
            let payload = Payload::try_from(document_payload(document)?)
                .map_err(|err| HomeMatchError::InvalidResponse(format!("invalid payload: {err}")))?;
            points.push(PointStruct::new(point_id(document, ordinal as u64), vector, payload));
        }

        let start_time = Instant::now();
        let total = points.len();
        let mut pending = points.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<PointStruct> = pending.by_ref().take(UPSERT_CHUNK).collect();
            self.client
                .upsert_points(UpsertPointsBuilder::new(self.collection.as_str(), chunk).wait(true))
                .await?;
        }
        info!(points = total, elapsed = ?start_time.elapsed(), "upserted points");
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredDocument>> {
        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.as_str(), vector, k as u64)
                    .with_payload(true)
                    .params(SearchParamsBuilder::default().exact(true)),
            )
            .await?;

        search_result
            .result
            .into_iter()
            .map(|point| {
                let payload: Map<String, Value> = point
                    .payload
                    .into_iter()
                    .map(|(key, value)| (key, value.into_json()))
                    .collect();
                Ok(ScoredDocument {
                    document: document_from_payload(payload)?,
                    score: point.score,
                })
            })
            .collect()
    }
}

pub(crate) fn check_lengths(documents: usize, vectors: usize) -> Result<()> {
    if documents != vectors {
        return Err(HomeMatchError::Embedding(format!(
            "{vectors} vectors for {documents} documents"
        )));
    }
    Ok(())
}

/// Listing ids are UUIDs; anything else falls back to its position.
fn point_id(document: &ListingDocument, ordinal: u64) -> PointId {
    match Uuid::parse_str(&document.metadata.id) {
        Ok(uuid) => uuid.to_string().into(),
        Err(_) => ordinal.into(),
    }
}

/// Flattens metadata and content into one JSON object.
pub(crate) fn document_payload(document: &ListingDocument) -> Result<Value> {
    let mut value = serde_json::to_value(&document.metadata)?;
    if let Value::Object(map) = &mut value {
        map.insert(
            CONTENT_KEY.to_string(),
            Value::String(document.page_content.clone()),
        );
    }
    Ok(value)
}

pub(crate) fn document_from_payload(mut payload: Map<String, Value>) -> Result<ListingDocument> {
    let page_content = match payload.remove(CONTENT_KEY) {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let metadata: ListingMetadata = serde_json::from_value(Value::Object(payload))?;
    Ok(ListingDocument {
        page_content,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::tests::sample_listing;
    use serde_json::json;

    #[test]
    fn test_payload_round_trip() {
        let document = sample_listing("a", "Denver", "Sunny townhouse.").to_document();
        let payload = document_payload(&document).unwrap();
        assert_eq!(payload["description"], "Sunny townhouse.");
        assert_eq!(payload["city"], "Denver");
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        assert_eq!(document_from_payload(map).unwrap(), document);
    }

    #[test]
    fn test_payload_without_description() {
        let map = json!({"id": "x", "city": "Boston"});
        let Value::Object(map) = map else { unreachable!() };
        let document = document_from_payload(map).unwrap();
        assert_eq!(document.page_content, "");
        assert_eq!(document.metadata.city, "Boston");
        assert_eq!(document.metadata.state, "Unknown");
    }

    #[test]
    fn test_point_id() {
        let id = Uuid::new_v4().to_string();
        let document = sample_listing(&id, "Denver", "x").to_document();
        assert_eq!(point_id(&document, 7), PointId::from(id));
        let document = sample_listing("listing-7", "Denver", "x").to_document();
        assert_eq!(point_id(&document, 7), PointId::from(7u64));
    }

    #[test]
    fn test_check_lengths() {
        assert!(check_lengths(2, 2).is_ok());
        assert!(check_lengths(2, 1).is_err());
    }

    #[tokio::test]
    #[ignore = "requires a Qdrant server on localhost:6334"]
    async fn test_qdrant_round_trip() {
        let index = QdrantIndex::connect("http://localhost:6334", None, "homematch_test").unwrap();
        index.ensure_collection(3, true).await.unwrap();
        let documents = vec![
            sample_listing(&Uuid::new_v4().to_string(), "Denver", "pool").to_document(),
            sample_listing(&Uuid::new_v4().to_string(), "Boston", "garage").to_document(),
        ];
        index
            .upsert(&documents, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
            .await
            .unwrap();
        let hits = index.search(vec![0.9, 0.1, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.metadata.city, "Denver");
    }
}
