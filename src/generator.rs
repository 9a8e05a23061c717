//! Synthetic listing generation with a chat model.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HomeMatchError, Result};
use crate::image::{render_listing_image, ImageGenerator};
use crate::listing::{save_listings, Listing};
use crate::llm::{ChatMessage, ChatModel};

const GENERATION_TEMPERATURE: f32 = 0.8;

const GENERATION_SYSTEM: &str = "You are an experienced real estate agent.";

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n?\s*```").expect("valid regex"));

/// Price, size and room ranges for one kind of property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyType {
    pub name: &'static str,
    pub min_price: u64,
    pub max_price: u64,
    pub size_range: (u32, u32),
    pub bed_range: (u32, u32),
    pub bath_range: (u32, u32),
}

pub const PROPERTY_TYPES: [PropertyType; 8] = [
    PropertyType {
        name: "Studio Apartment",
        min_price: 60_000,
        max_price: 180_000,
        size_range: (400, 800),
        bed_range: (1, 1),
        bath_range: (1, 1),
    },
    PropertyType {
        name: "One-Bedroom Apartment",
        min_price: 100_000,
        max_price: 250_000,
        size_range: (600, 1_000),
        bed_range: (1, 2),
        bath_range: (1, 2),
    },
    PropertyType {
        name: "Townhouse",
        min_price: 150_000,
        max_price: 500_000,
        size_range: (1_000, 2_500),
        bed_range: (2, 4),
        bath_range: (1, 3),
    },
    PropertyType {
        name: "Single-Family Home",
        min_price: 200_000,
        max_price: 800_000,
        size_range: (1_200, 3_500),
        bed_range: (3, 6),
        bath_range: (2, 4),
    },
    PropertyType {
        name: "Luxury Estate",
        min_price: 1_000_000,
        max_price: 5_000_000,
        size_range: (4_000, 15_000),
        bed_range: (5, 15),
        bath_range: (3, 6),
    },
    PropertyType {
        name: "Mobile Home",
        min_price: 50_000,
        max_price: 150_000,
        size_range: (500, 1_200),
        bed_range: (1, 3),
        bath_range: (1, 2),
    },
    PropertyType {
        name: "Ranch-Style Home",
        min_price: 120_000,
        max_price: 400_000,
        size_range: (1_000, 2_500),
        bed_range: (2, 4),
        bath_range: (1, 3),
    },
    PropertyType {
        name: "Condo",
        min_price: 120_000,
        max_price: 600_000,
        size_range: (700, 2_000),
        bed_range: (1, 3),
        bath_range: (1, 2),
    },
];

/// Cities offered by the search form, also used when no city file exists.
pub const DEFAULT_CITIES: [&str; 20] = [
    "Tucson, Arizona",
    "Los Angeles, California",
    "San Francisco, California",
    "Santa Barbara, California",
    "Denver, Colorado",
    "Atlanta, Georgia",
    "Honolulu, Hawaii",
    "Chicago, Illinois",
    "Boston, Massachusetts",
    "Baltimore, Maryland",
    "Portland, Maine",
    "Las Vegas, Nevada",
    "Newark, New Jersey",
    "New York City, New York",
    "Cincinnati, Ohio",
    "Pittsburgh, Pennsylvania",
    "Nashville, Tennessee",
    "Houston, Texas",
    "Salt Lake City, Utah",
    "New Orleans, Louisiana",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityChoice {
    pub city: String,
    pub state: String,
}

impl CityChoice {
    /// Parses `"City, State"`.
    pub fn parse(line: &str) -> Option<Self> {
        let (city, state) = line.trim().split_once(", ")?;
        let (city, state) = (city.trim(), state.trim());
        if city.is_empty() || state.is_empty() {
            return None;
        }
        Some(Self {
            city: city.to_string(),
            state: state.to_string(),
        })
    }
}

pub fn default_city_choices() -> Vec<CityChoice> {
    DEFAULT_CITIES.iter().filter_map(|line| CityChoice::parse(line)).collect()
}

/// Reads one `"City, State"` per line, falling back to [`DEFAULT_CITIES`]
/// when the file cannot be read.
pub fn load_city_choices(path: &Path) -> Vec<CityChoice> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "error loading city choices, using defaults"
            );
            return default_city_choices();
        }
    };
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let choice = CityChoice::parse(line);
            if choice.is_none() {
                warn!(line, "skipping malformed city line");
            }
            choice
        })
        .collect()
}

/// Prompt for `count` listings of one property type in one city.
pub fn build_prompt(property: &PropertyType, city: &CityChoice, count: usize) -> String {
    format!(
        "You are a real estate expert providing diverse listings.\n\n\
         Generate {count} **{name}** listing(s) in **{city}**, **{state}**.\n\n\
         - Property Type: {name}\n\
         - Neighborhood: A real neighborhood in {city}\n\
         - City: {city}\n\
         - State: {state}\n\
         - Price: Between ${min_price} and ${max_price}\n\
         - Bedrooms: {bed_lo} to {bed_hi}\n\
         - Bathrooms: {bath_lo} to {bath_hi}\n\
         - House Size: Between {size_lo} and {size_hi} sqft\n\
         - Description: A unique, engaging 80-word description.\n\
         - Neighborhood Description: A realistic description of the neighborhood.\n\n\
         Higher-priced properties should have more bedrooms, bathrooms, and larger sizes.\n\n\
         Provide the response strictly as a JSON object with the key \"listings\", \
         where \"listings\" is a list of objects with the keys \"Property Type\", \
         \"Neighborhood\", \"City\", \"State\", \"Price\", \"Bedrooms\", \"Bathrooms\", \
         \"House Size\", \"Description\" and \"Neighborhood Description\".",
        name = property.name,
        city = city.city,
        state = city.state,
        min_price = property.min_price,
        max_price = property.max_price,
        bed_lo = property.bed_range.0,
        bed_hi = property.bed_range.1,
        bath_lo = property.bath_range.0,
        bath_hi = property.bath_range.1,
        size_lo = property.size_range.0,
        size_hi = property.size_range.1,
    )
}

/// Strips a Markdown code fence around the model's JSON.
pub fn clean_json_output(response_text: &str) -> String {
    match JSON_FENCE.captures(response_text) {
        Some(captures) => captures[1].trim().to_string(),
        None => response_text.trim().to_string(),
    }
}

/// Parses a model reply into listings, requiring a `listings` array.
///
/// Entries that do not deserialize are skipped.
pub fn parse_batch(response_text: &str) -> Result<Vec<Listing>> {
    let cleaned = clean_json_output(response_text);
    let mut parsed: Value = serde_json::from_str(&cleaned)?;
    let entries = match parsed.get_mut("listings").map(Value::take) {
        Some(Value::Array(entries)) => entries,
        _ => {
            return Err(HomeMatchError::InvalidResponse(
                "'listings' key missing or not a list".to_string(),
            ));
        }
    };
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| match serde_json::from_value::<Listing>(entry) {
            Ok(listing) => Some(listing),
            Err(err) => {
                warn!(position, error = %err, "skipping malformed listing");
                None
            }
        })
        .collect())
}

/// Generates listings in batches and saves them to a JSON file.
pub struct ListingsGenerator {
    chat: Arc<dyn ChatModel>,
    images: Option<(Arc<dyn ImageGenerator>, PathBuf)>,
    cities: Vec<CityChoice>,
    total_listings: usize,
    batch_size: usize,
    output_file: PathBuf,
    pause: Duration,
    rng: StdRng,
}

impl ListingsGenerator {
    pub fn new(chat: Arc<dyn ChatModel>, cities: Vec<CityChoice>, output_file: PathBuf) -> Self {
        Self {
            chat,
            images: None,
            cities,
            total_listings: 10,
            batch_size: 5,
            output_file,
            pause: Duration::from_secs(1),
            rng: StdRng::from_entropy(),
        }
    }

    /// Total listings to request and how many per chat call.
    pub fn with_counts(mut self, total_listings: usize, batch_size: usize) -> Self {
        self.total_listings = total_listings;
        self.batch_size = batch_size.max(1);
        self
    }

    /// Renders a photo per listing into `dir`.
    pub fn with_images(mut self, generator: Arc<dyn ImageGenerator>, dir: PathBuf) -> Self {
        self.images = Some((generator, dir));
        self
    }

    /// Delay between batches, to stay under API rate limits.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn pick_city(&mut self) -> CityChoice {
        self.cities.choose(&mut self.rng).cloned().unwrap_or_else(|| CityChoice {
            city: "Unknown".to_string(),
            state: "Unknown".to_string(),
        })
    }

    /// Requests one batch of `count` listings.
    ///
    /// Any failure is logged and yields an empty batch.
    pub async fn generate_batch(&mut self, count: usize) -> Vec<Listing> {
        let city = self.pick_city();
        let property = *PROPERTY_TYPES
            .choose(&mut self.rng)
            .unwrap_or(&PROPERTY_TYPES[0]);
        let prompt = build_prompt(&property, &city, count);
        let messages = [ChatMessage::system(GENERATION_SYSTEM), ChatMessage::user(prompt)];

        let raw_output = match self.chat.complete(&messages, GENERATION_TEMPERATURE).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "error generating batch");
                return Vec::new();
            }
        };
        debug!(chars = raw_output.len(), "raw generation output");
        let mut listings = match parse_batch(&raw_output) {
            Ok(listings) => listings,
            Err(err) => {
                warn!(error = %err, "error parsing generated listings");
                return Vec::new();
            }
        };

        for listing in &mut listings {
            listing.id = Uuid::new_v4().to_string();
            if listing.property_type.trim().is_empty() {
                listing.property_type = property.name.to_string();
            }
            if let Some((generator, dir)) = &self.images {
                listing.image_path =
                    render_listing_image(generator.as_ref(), listing, dir, &mut self.rng).await;
            }
        }
        listings
    }

    /// Runs every batch, rewriting the output file after each successful one.
    ///
    /// A failed save is logged and generation carries on, so the returned
    /// listings can be ahead of what is on disk.
    pub async fn generate_listings(&mut self) -> Vec<Listing> {
        let mut all_listings: Vec<Listing> = Vec::with_capacity(self.total_listings);
        let batches = self.total_listings.div_ceil(self.batch_size);

        for batch_number in 0..batches {
            if batch_number > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            let remaining = self.total_listings - batch_number * self.batch_size;
            let batch = self.generate_batch(remaining.min(self.batch_size)).await;
            if batch.is_empty() {
                continue;
            }
            info!(
                batch = batch_number + 1,
                of = batches,
                listings = batch.len(),
                "generated batch"
            );
            all_listings.extend(batch);
            if let Err(err) = save_listings(&self.output_file, &all_listings) {
                warn!(
                    path = %self.output_file.display(),
                    error = %err,
                    "error saving listings"
                );
            }
        }

        info!(
            count = all_listings.len(),
            path = %self.output_file.display(),
            "generated listings"
        );
        all_listings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::load_listings;
    use crate::testing::{ScriptedChat, StaticImages};

    fn reply(city: &str, count: usize) -> String {
        let listings: Vec<Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "Property Type": "Condo",
                    "Neighborhood": "Downtown",
                    "City": city,
                    "State": "Colorado",
                    "Price": 300_000 + i * 1_000,
                    "Bedrooms": 2,
                    "Bathrooms": 1,
                    "House Size": 900,
                    "Description": format!("Condo number {i}."),
                    "Neighborhood Description": "Busy and central."
                })
            })
            .collect();
        format!("```json\n{}\n```", serde_json::json!({ "listings": listings }))
    }

    #[test]
    fn test_clean_json_output() {
        assert_eq!(clean_json_output("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(clean_json_output("Here you go:\n```\n{\"a\": 1}\n```\n"), "{\"a\": 1}");
        assert_eq!(clean_json_output("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_batch_requires_listings_key() {
        assert!(matches!(
            parse_batch(r#"{"homes": []}"#),
            Err(HomeMatchError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_batch(r#"{"listings": {}}"#),
            Err(HomeMatchError::InvalidResponse(_))
        ));
        assert!(matches!(parse_batch("not json"), Err(HomeMatchError::Json(_))));
    }

    #[test]
    fn test_parse_batch_skips_malformed_entries() {
        let text = r#"{"listings": [
            {"City": "Denver", "State": "Colorado", "Price": "$200,000", "Bedrooms": 2,
             "Bathrooms": 1, "House Size": 800, "Description": "Tidy."},
            {"City": "Denver"}
        ]}"#;
        let listings = parse_batch(text).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].price, 200_000);
    }

    #[test]
    fn test_build_prompt() {
        let city = CityChoice::parse("Denver, Colorado").unwrap();
        let prompt = build_prompt(&PROPERTY_TYPES[4], &city, 3);
        assert!(prompt
            .contains("Generate 3 **Luxury Estate** listing(s) in **Denver**, **Colorado**."));
        assert!(prompt.contains("Price: Between $1000000 and $5000000"));
        assert!(prompt.contains("Bedrooms: 5 to 15"));
        assert!(prompt.contains("\"listings\""));
    }

    #[test]
    fn test_city_choices() {
        assert_eq!(
            CityChoice::parse("New York City, New York"),
            Some(CityChoice {
                city: "New York City".to_string(),
                state: "New York".to_string()
            })
        );
        assert_eq!(CityChoice::parse("Nowhere"), None);
        assert_eq!(default_city_choices().len(), DEFAULT_CITIES.len());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cities.txt");
        fs::write(&path, "Denver, Colorado\nbroken line\n\nBoston, Massachusetts\n").unwrap();
        let cities = load_city_choices(&path);
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[1].city, "Boston");
        assert_eq!(load_city_choices(&dir.path().join("missing.txt")).len(), 20);
    }

    #[tokio::test]
    async fn test_generate_listings_saves_each_batch() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("listings.json");
        let chat = Arc::new(ScriptedChat::new([
            reply("Denver", 2),
            reply("Denver", 2),
            reply("Denver", 1),
        ]));
        let cities = vec![CityChoice::parse("Denver, Colorado").unwrap()];
        let mut generator = ListingsGenerator::new(chat.clone(), cities, output.clone())
            .with_counts(5, 2)
            .with_pause(Duration::ZERO)
            .with_seed(42);

        let listings = generator.generate_listings().await;
        assert_eq!(listings.len(), 5);
        assert_eq!(chat.calls().len(), 3);
        assert!(chat.calls()[2].messages[1].content.contains("Generate 1 **"));
        assert!(listings.iter().all(|l| Uuid::parse_str(&l.id).is_ok()));
        assert!(listings.iter().all(|l| l.image_path.is_none()));
        assert_eq!(load_listings(&output).unwrap(), listings);
    }

    #[tokio::test]
    async fn test_failed_batches_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("listings.json");
        let chat = Arc::new(ScriptedChat::new([
            "this is not json".to_string(),
            reply("Boston", 2),
        ]));
        let mut generator = ListingsGenerator::new(chat, Vec::new(), output.clone())
            .with_counts(4, 2)
            .with_pause(Duration::ZERO);

        let listings = generator.generate_listings().await;
        assert_eq!(listings.len(), 2);
        assert_eq!(load_listings(&output).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_nothing_saved_when_every_batch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("listings.json");
        let chat = Arc::new(ScriptedChat::failing());
        let mut generator = ListingsGenerator::new(chat, Vec::new(), output.clone())
            .with_counts(2, 1)
            .with_pause(Duration::ZERO);
        assert!(generator.generate_listings().await.is_empty());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_generating() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let output = blocker.join("listings.json");
        let chat = Arc::new(ScriptedChat::new([
            reply("Denver", 2),
            reply("Denver", 2),
            reply("Denver", 1),
        ]));
        let mut generator = ListingsGenerator::new(chat.clone(), Vec::new(), output.clone())
            .with_counts(5, 2)
            .with_pause(Duration::ZERO);

        let listings = generator.generate_listings().await;
        assert_eq!(listings.len(), 5);
        assert_eq!(chat.calls().len(), 3);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_generate_batch_with_images() {
        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join("images");
        let chat = Arc::new(ScriptedChat::new([reply("Denver", 2)]));
        let images = Arc::new(StaticImages::new(Some(vec![1, 2, 3])));
        let mut generator = ListingsGenerator::new(chat, Vec::new(), dir.path().join("l.json"))
            .with_images(images.clone(), image_dir.clone())
            .with_seed(1);
        let batch = generator.generate_batch(2).await;
        assert_eq!(batch.len(), 2);
        for listing in &batch {
            let path = listing.image_path.as_deref().unwrap();
            assert_eq!(Path::new(path), image_dir.join(format!("{}.png", listing.id)));
        }
        assert_eq!(images.prompts.lock().unwrap().len(), 2);
    }
}
