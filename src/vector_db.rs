//! Listing retrieval: indexing listings and querying them with buyer preferences.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::controller::VectorIndex;
use crate::embedder::Embedder;
use crate::error::{HomeMatchError, Result};
use crate::listing::{Listing, ListingDocument, SearchResult};
use crate::preferences::BuyerPreferences;

/// Upper bound on results per query.
pub const MAX_RESULTS: usize = 50;

/// Descriptions embedded per call while indexing.
const EMBED_BATCH: usize = 64;

/// Embeds listings into a vector index and answers preference queries.
#[derive(Clone)]
pub struct VectorDatabase {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl VectorDatabase {
    /// Pairs an embedder with the index its vectors are stored in.
    ///
    /// # Arguments
    ///
    /// * `embedder` - Produces vectors for listing descriptions and queries.
    /// * `index` - Vector store; its collection is sized from the embedder's output.
    ///
    /// # Example
    ///
    /// ```
    /// let embedder = Arc::new(FastEmbedder::new(true)?);
    /// let qdrant = QdrantIndex::connect("http://localhost:6334", None, "real_estate_listings")?;
    /// let index = Arc::new(qdrant);
    /// let db = VectorDatabase::new(embedder, index);
    /// ```
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embeds every listing description and stores it with its metadata.
    ///
    /// Listings with a blank description are skipped with a warning, and an
    /// empty input writes nothing.
    ///
    /// # Arguments
    ///
    /// * `listings` - The listings to index.
    /// * `recreate` - Drop the existing collection before writing.
    ///
    /// # Returns
    ///
    /// The number of documents written.
    ///
    /// # Example
    ///
    /// ```
    /// let listings = load_listings(Path::new("data/listings.json"))?;
    /// let stored = db.store_listings(&listings, true).await?;
    /// ```
    pub async fn store_listings(&self, listings: &[Listing], recreate: bool) -> Result<usize> {
        let documents: Vec<ListingDocument> = listings
            .iter()
            .filter(|listing| {
                let keep = !listing.description.trim().is_empty();
                if !keep {
                    warn!(id = %listing.id, "skipping listing without description");
                }
                keep
            })
            .map(Listing::to_document)
            .collect();
        if documents.is_empty() {
            warn!("no listings to store");
            return Ok(0);
        }

        let start_time = Instant::now();
        let mut vectors = Vec::with_capacity(documents.len());
        for batch in documents.chunks(EMBED_BATCH) {
            let texts = batch.iter().map(|doc| doc.page_content.clone()).collect();
            vectors.extend(self.embedder.embed(texts).await?);
        }
        info!(
            documents = documents.len(),
            elapsed = ?start_time.elapsed(),
            "embedded listing descriptions"
        );

        let dimensions = vectors
            .first()
            .map_or_else(|| self.embedder.dimensions(), Vec::len);
        self.index.ensure_collection(dimensions, recreate).await?;
        self.index.upsert(&documents, vectors).await?;
        info!(count = documents.len(), "listings stored in vector database");
        Ok(documents.len())
    }

    /// Finds the listings closest to the buyer's preferences.
    ///
    /// # Arguments
    ///
    /// * `prefs` - Buyer preferences; their `query_text()` is embedded.
    /// * `k` - Number of results, clamped to `1..=MAX_RESULTS`.
    ///
    /// # Returns
    ///
    /// Search results in similarity order, without augmented descriptions.
    ///
    /// # Example
    ///
    /// ```
    /// let prefs = parse_preferences(&DEFAULT_ANSWERS[..])?;
    /// for result in db.search(&prefs, 3).await? {
    ///     println!("{} {}", result.title(), result.price_label());
    /// }
    /// ```
    pub async fn search(&self, prefs: &BuyerPreferences, k: usize) -> Result<Vec<SearchResult>> {
        let query = prefs.query_text();
        self.search_text(&query, k).await
    }

    /// Similarity search for a free-text query.
    ///
    /// # Returns
    ///
    /// Up to `k` results (clamped like [`VectorDatabase::search`]), or
    /// `HomeMatchError::EmptyInput` for a blank query.
    pub async fn search_text(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(HomeMatchError::EmptyInput("search query is empty".to_string()));
        }
        let k = k.clamp(1, MAX_RESULTS);
        debug!(query, k, "searching listings");

        let start_time = Instant::now();
        let query_embedding = self.embedder.embed_query(query).await?;
        let hits = self.index.search(query_embedding, k).await?;
        info!(hits = hits.len(), elapsed = ?start_time.elapsed(), "similarity search");

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                metadata: hit.document.metadata,
                description: hit.document.page_content,
                augmented_description: None,
                score: hit.score,
            })
            .collect())
    }
}
