//! Listing photo generation.

use std::path::Path;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HomeMatchError, Result};
use crate::listing::Listing;
use crate::openai::OpenAiClient;

const EXTERIORS: [&str; 5] = [
    "red brick",
    "white stucco",
    "blue wooden",
    "gray stone",
    "tan adobe",
];

const FEATURES: [&str; 6] = [
    "spacious front yard",
    "lush garden",
    "swimming pool",
    "rooftop terrace",
    "wraparound porch",
    "spacious basement",
];

/// Text-to-image backend.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns encoded image bytes (PNG) for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>>;
}

/// Hosted image generation via an OpenAI-compatible `images/generations` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiImageGenerator {
    client: OpenAiClient,
    model: String,
    size: String,
}

impl OpenAiImageGenerator {
    pub fn new(client: OpenAiClient, model: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            size: size.into(),
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let request = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: &self.size,
            response_format: "url",
        };
        let parsed: ImageResponse = self
            .client
            .post_json("images/generations", &request, "OpenAI images")
            .await?;
        let url = parsed
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| {
                HomeMatchError::InvalidResponse("image response had no URL".to_string())
            })?;
        self.client.download(&url).await
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Describes the house for the image model, with a random exterior and feature.
pub fn image_prompt<R: Rng + ?Sized>(listing: &Listing, rng: &mut R) -> String {
    let or = |value: &str, fallback: &str| {
        if value.trim().is_empty() {
            fallback.to_string()
        } else {
            value.to_string()
        }
    };
    let exterior = EXTERIORS.choose(rng).copied().unwrap_or(EXTERIORS[0]);
    let feature = FEATURES.choose(rng).copied().unwrap_or(FEATURES[0]);
    format!(
        "A photo of a {} in {}, {}, {}. It has {} bedrooms, {} bathrooms, and is {} sqft. \
         The house features a {exterior} exterior and a {feature}. \
         Realistic, well exposed, high quality.",
        or(&listing.property_type, "house"),
        or(&listing.neighborhood, "a neighborhood"),
        or(&listing.city, "a city"),
        or(&listing.state, "a state"),
        listing.bedrooms,
        listing.bathrooms,
        listing.house_size,
    )
}

/// Generates and saves `{dir}/{id}.png` for the listing.
///
/// Returns the saved path, or `None` when generation or saving fails.
pub async fn render_listing_image<R: Rng + ?Sized>(
    generator: &dyn ImageGenerator,
    listing: &Listing,
    dir: &Path,
    rng: &mut R,
) -> Option<String> {
    let prompt = image_prompt(listing, rng);
    info!(city = %listing.city, id = %listing.id, "generating listing image");
    let saved = async {
        let bytes = generator.generate(&prompt).await?;
        tokio::fs::create_dir_all(dir).await?;
        let name = if listing.id.is_empty() { "unknown" } else { listing.id.as_str() };
        let path = dir.join(format!("{name}.png"));
        tokio::fs::write(&path, bytes).await?;
        Ok::<_, HomeMatchError>(path)
    }
    .await;
    match saved {
        Ok(path) => {
            info!(path = %path.display(), "image saved");
            Some(path.to_string_lossy().into_owned())
        }
        Err(err) => {
            warn!(id = %listing.id, error = %err, "error generating image");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::tests::sample_listing;
    use crate::testing::StaticImages;
    use crate::testing::serve_stub;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_image_prompt_describes_listing() {
        let listing = sample_listing("a", "Denver", "x");
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = image_prompt(&listing, &mut rng);
        assert!(prompt.starts_with("A photo of a Townhouse in Capitol Hill, Denver, Colorado."));
        assert!(prompt.contains("3 bedrooms, 2.5 bathrooms, and is 1800 sqft"));
        assert!(EXTERIORS.iter().any(|e| prompt.contains(e)));
        assert!(FEATURES.iter().any(|f| prompt.contains(f)));
    }

    #[test]
    fn test_image_prompt_fallbacks() {
        let mut listing = sample_listing("a", "", "x");
        listing.property_type.clear();
        let prompt = image_prompt(&listing, &mut StdRng::seed_from_u64(1));
        assert!(prompt.starts_with("A photo of a house in Capitol Hill, a city, Colorado."));
    }

    #[tokio::test]
    async fn test_render_saves_png_named_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let images = StaticImages::new(Some(vec![0x89, b'P', b'N', b'G']));
        let listing = sample_listing("abc", "Denver", "x");
        let mut rng = StdRng::seed_from_u64(3);
        let path = render_listing_image(&images, &listing, dir.path(), &mut rng)
            .await
            .unwrap();
        assert!(path.ends_with("abc.png"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x89, b'P', b'N', b'G']);
        assert_eq!(images.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let images = StaticImages::new(None);
        let listing = sample_listing("abc", "Denver", "x");
        let mut rng = StdRng::seed_from_u64(3);
        let path = render_listing_image(&images, &listing, dir.path(), &mut rng).await;
        assert!(path.is_none());
        assert!(!dir.path().join("abc.png").exists());
    }

    #[test]
    fn test_image_response_parsing() {
        let parsed: ImageResponse =
            serde_json::from_str(r#"{"created":1,"data":[{"url":"https://img.example/a.png"}]}"#)
                .unwrap();
        assert_eq!(parsed.data[0].url.as_deref(), Some("https://img.example/a.png"));
    }

    #[tokio::test]
    async fn test_openai_images_downloads_generated_url() {
        let base = serve_stub(|base| {
            let url = format!("{base}/files/house.png");
            Router::new()
                .route(
                    "/images/generations",
                    post(move |Json(body): Json<Value>| {
                        let url = url.clone();
                        async move {
                            let data = if body["prompt"] == "empty" {
                                json!([])
                            } else {
                                json!([{ "url": url }])
                            };
                            Json(json!({ "created": 1, "data": data }))
                        }
                    }),
                )
                .route("/files/house.png", get(|| async { vec![7u8, 8, 9] }))
        })
        .await;
        let client = OpenAiClient::new("sk-test", &base, Duration::from_secs(5), 1).unwrap();
        let generator = OpenAiImageGenerator::new(client, "dall-e-2", "256x256");

        assert_eq!(generator.generate("a house").await.unwrap(), vec![7, 8, 9]);
        assert!(matches!(
            generator.generate("empty").await,
            Err(HomeMatchError::InvalidResponse(_))
        ));
    }
}
