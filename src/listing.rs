//! Listing records, their embedded-document form and search results.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// A generated real-estate listing as stored in the listings file.
///
/// Field names on disk follow the labels used in the generation prompt so
/// model output deserializes directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Assigned after generation; absent in raw model output.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "Property Type", default)]
    pub property_type: String,
    #[serde(rename = "Neighborhood", default)]
    pub neighborhood: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "State")]
    pub state: String,
    /// Asking price in dollars.
    #[serde(rename = "Price", deserialize_with = "lenient::amount")]
    pub price: u64,
    #[serde(rename = "Bedrooms", deserialize_with = "lenient::count")]
    pub bedrooms: u32,
    #[serde(rename = "Bathrooms", deserialize_with = "lenient::fraction")]
    pub bathrooms: f32,
    /// Square feet.
    #[serde(rename = "House Size", deserialize_with = "lenient::count")]
    pub house_size: u32,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Neighborhood Description", default)]
    pub neighborhood_description: String,
    #[serde(default)]
    pub image_path: Option<String>,
}

impl Listing {
    /// Builds the embedded document for this listing.
    pub fn to_document(&self) -> ListingDocument {
        ListingDocument {
            page_content: self.description.clone(),
            metadata: ListingMetadata {
                id: self.id.clone(),
                property_type: self.property_type.clone(),
                neighborhood: self.neighborhood.clone(),
                city: self.city.clone(),
                state: self.state.clone(),
                price: Some(self.price),
                house_size: Some(self.house_size),
                bedrooms: Some(self.bedrooms),
                bathrooms: Some(self.bathrooms),
                neighborhood_description: self.neighborhood_description.clone(),
                image_path: self.image_path.clone(),
            },
        }
    }
}

/// Description text plus the metadata indexed alongside its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingDocument {
    pub page_content: String,
    pub metadata: ListingMetadata,
}

/// Listing attributes carried as vector-store payload.
///
/// Every field has a default so partially populated payloads still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub property_type: String,
    #[serde(default = "unknown")]
    pub neighborhood: String,
    #[serde(default = "unknown")]
    pub city: String,
    #[serde(default = "unknown")]
    pub state: String,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub house_size: Option<u32>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<f32>,
    #[serde(default)]
    pub neighborhood_description: String,
    #[serde(default)]
    pub image_path: Option<String>,
}

fn unknown() -> String {
    "Unknown".to_string()
}

/// One retrieved listing, ready for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub metadata: ListingMetadata,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub augmented_description: Option<String>,
    /// Similarity reported by the vector store (higher is closer).
    #[serde(skip)]
    pub score: f32,
}

impl SearchResult {
    /// `"3 Bed | 2 Bath | 1800 sq ft"`.
    pub fn title(&self) -> String {
        format!(
            "{} Bed | {} Bath | {} sq ft",
            or_na(self.metadata.bedrooms),
            or_na(self.metadata.bathrooms),
            or_na(self.metadata.house_size)
        )
    }

    /// `"State, City, Neighborhood"`.
    pub fn location(&self) -> String {
        let neighborhood = if self.metadata.neighborhood.is_empty() {
            "N/A"
        } else {
            &self.metadata.neighborhood
        };
        format!(
            "{}, {}, {}",
            self.metadata.state, self.metadata.city, neighborhood
        )
    }

    pub fn price_label(&self) -> String {
        match self.metadata.price {
            Some(price) => format!("${}", group_thousands(price)),
            None => "N/A".to_string(),
        }
    }

    /// Augmented text when available, otherwise the stored description.
    pub fn display_description(&self) -> &str {
        self.augmented_description
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&self.description)
    }

    /// File name of the listing image, if one was generated.
    pub fn image_file_name(&self) -> Option<&str> {
        let path = self.metadata.image_path.as_deref()?;
        Path::new(path).file_name()?.to_str()
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Loads the flat JSON array of listings.
pub fn load_listings(path: &Path) -> Result<Vec<Listing>> {
    let raw = fs::read_to_string(path)?;
    let listings: Vec<Listing> = serde_json::from_str(&raw)?;
    info!(count = listings.len(), path = %path.display(), "loaded listings");
    Ok(listings)
}

/// Writes listings as pretty JSON, creating the parent directory.
pub fn save_listings(path: &Path, listings: &[Listing]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(listings)?;
    fs::write(path, body)?;
    Ok(())
}

/// Deserializers for numbers the model may emit as `"$450,000"` or `"2.5"`.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// First number in `raw`, scaled by a `k`/`thousand` or `m`/`million`
    /// word directly after it. Other trailing words ("sqft", "baths") are
    /// ignored.
    pub(super) fn parse_number(raw: &str) -> Option<f64> {
        let start = raw.find(|c: char| c.is_ascii_digit())?;
        let rest = &raw[start..];
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == ',' || c == '.'))
            .unwrap_or(rest.len());
        let digits: String = rest[..end].chars().filter(|c| *c != ',').collect();
        let value: f64 = digits.trim_end_matches('.').parse().ok()?;

        let word: String = rest[end..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        let scale = match word.as_str() {
            "k" | "thousand" => 1e3,
            "m" | "mm" | "mil" | "million" => 1e6,
            _ => 1.0,
        };
        Some(value * scale)
    }

    fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let parsed = match &value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_number(s),
            _ => None,
        };
        parsed
            .filter(|n| n.is_finite() && *n >= 0.0)
            .ok_or_else(|| {
                D::Error::custom(format!("expected a non-negative number, found {value}"))
            })
    }

    pub fn amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        number(deserializer).map(|n| n.round() as u64)
    }

    pub fn count<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        number(deserializer).map(|n| n.round() as u32)
    }

    pub fn fraction<'de, D>(deserializer: D) -> Result<f32, D::Error>
    where
        D: Deserializer<'de>,
    {
        number(deserializer).map(|n| n as f32)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_listing(id: &str, city: &str, description: &str) -> Listing {
        Listing {
            id: id.to_string(),
            property_type: "Townhouse".to_string(),
            neighborhood: "Capitol Hill".to_string(),
            city: city.to_string(),
            state: "Colorado".to_string(),
            price: 425_000,
            bedrooms: 3,
            bathrooms: 2.5,
            house_size: 1_800,
            description: description.to_string(),
            neighborhood_description: "Walkable streets lined with cafes.".to_string(),
            image_path: Some(format!("data/images/{id}.png")),
        }
    }

    #[test]
    fn test_model_output_with_formatted_numbers() {
        let raw = json!({
            "Property Type": "Condo",
            "Neighborhood": "Pearl District",
            "City": "Portland",
            "State": "Maine",
            "Price": "$450,000",
            "Bedrooms": "2",
            "Bathrooms": 1.5,
            "House Size": "1,150 sqft",
            "Description": "Bright corner unit.",
            "Neighborhood Description": "Historic brick warehouses."
        });
        let listing: Listing = serde_json::from_value(raw).unwrap();
        assert_eq!(listing.price, 450_000);
        assert_eq!(listing.bedrooms, 2);
        assert!((listing.bathrooms - 1.5).abs() < f32::EPSILON);
        assert_eq!(listing.house_size, 1_150);
        assert!(listing.id.is_empty());
        assert_eq!(listing.image_path, None);
    }

    #[test]
    fn test_non_numeric_price_is_rejected() {
        let raw = json!({
            "City": "Denver", "State": "Colorado", "Price": "call for price",
            "Bedrooms": 2, "Bathrooms": 1, "House Size": 900, "Description": "x"
        });
        assert!(serde_json::from_value::<Listing>(raw).is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(lenient::parse_number("$1,250,000"), Some(1_250_000.0));
        assert_eq!(lenient::parse_number("about 2.5 baths"), Some(2.5));
        assert_eq!(lenient::parse_number("3."), Some(3.0));
        assert_eq!(lenient::parse_number("none"), None);
        assert_eq!(lenient::parse_number("$450K"), Some(450_000.0));
        assert_eq!(lenient::parse_number("2.5M"), Some(2_500_000.0));
        assert_eq!(lenient::parse_number("850 thousand dollars"), Some(850_000.0));
        assert_eq!(lenient::parse_number("1,150 sqft"), Some(1_150.0));
        assert_eq!(lenient::parse_number("3 Bedrooms"), Some(3.0));
    }

    #[test]
    fn test_price_with_magnitude_suffix() {
        for (price, expected) in [
            ("$1.2 million", 1_200_000),
            ("$450K", 450_000),
            ("2.5M", 2_500_000),
            ("$975,000", 975_000),
        ] {
            let raw = json!({
                "City": "Denver", "State": "Colorado", "Price": price,
                "Bedrooms": 3, "Bathrooms": 2, "House Size": "2,100 sq ft", "Description": "x"
            });
            let listing: Listing = serde_json::from_value(raw).unwrap();
            assert_eq!(listing.price, expected, "price {price:?}");
            assert_eq!(listing.house_size, 2_100);
        }
    }

    #[test]
    fn test_save_and_load_listings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("listings.json");
        let listings = vec![
            sample_listing("a", "Denver", "Sunny townhouse."),
            sample_listing("b", "Boston", "Brownstone walk-up."),
        ];
        save_listings(&path, &listings).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"Property Type\""));
        assert_eq!(load_listings(&path).unwrap(), listings);
    }

    #[test]
    fn test_load_missing_listings_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_listings(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_document_carries_metadata() {
        let listing = sample_listing("a", "Denver", "Sunny townhouse.");
        let doc = listing.to_document();
        assert_eq!(doc.page_content, "Sunny townhouse.");
        assert_eq!(doc.metadata.city, "Denver");
        assert_eq!(doc.metadata.price, Some(425_000));
        assert_eq!(doc.metadata.image_path.as_deref(), Some("data/images/a.png"));
    }

    #[test]
    fn test_partial_metadata_gets_defaults() {
        let metadata: ListingMetadata = serde_json::from_value(json!({"id": "x"})).unwrap();
        assert_eq!(metadata.city, "Unknown");
        assert_eq!(metadata.state, "Unknown");
        assert_eq!(metadata.price, None);
        let result = SearchResult {
            metadata,
            description: "Plain.".to_string(),
            augmented_description: None,
            score: 0.0,
        };
        assert_eq!(result.title(), "N/A Bed | N/A Bath | N/A sq ft");
        assert_eq!(result.price_label(), "N/A");
        assert_eq!(result.image_file_name(), None);
    }

    #[test]
    fn test_search_result_labels() {
        let doc = sample_listing("abc", "Denver", "Sunny townhouse.").to_document();
        let mut result = SearchResult {
            metadata: doc.metadata,
            description: doc.page_content,
            augmented_description: None,
            score: 0.9,
        };
        assert_eq!(result.title(), "3 Bed | 2.5 Bath | 1800 sq ft");
        assert_eq!(result.location(), "Colorado, Denver, Capitol Hill");
        assert_eq!(result.price_label(), "$425,000");
        assert_eq!(result.image_file_name(), Some("abc.png"));
        assert_eq!(result.display_description(), "Sunny townhouse.");
        result.augmented_description = Some("Sunny townhouse near the bike path.".to_string());
        assert_eq!(result.display_description(), "Sunny townhouse near the bike path.");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(12_345_678), "12,345,678");
    }
}
