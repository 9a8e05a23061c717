//! Configuration constants and the JSON key file loader.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{HomeMatchError, Result};

/// Default location of the JSON key file.
pub const DEFAULT_CONFIG_PATH: &str = "~/config.json";

/// Config key holding the OpenAI-compatible API key.
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Config key holding the OpenAI-compatible base URL.
pub const OPENAI_API_BASE: &str = "OPENAI_API_BASE";

/// Config key holding the Qdrant API key.
pub const QDRANT_API_KEY: &str = "QDRANT_API_KEY";

/// Base URL used when neither the CLI nor the key file sets one.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Chat model used for generation, refinement and augmentation.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Hosted embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Output width of `text-embedding-3-large`.
pub const DEFAULT_OPENAI_DIMENSIONS: usize = 3072;

/// Hosted image model.
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";

/// Qdrant gRPC endpoint.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Collection holding the embedded listings.
pub const DEFAULT_COLLECTION: &str = "real_estate_listings";

/// Generated listings file.
pub const DEFAULT_LISTINGS_PATH: &str = "data/listings.json";

/// Directory for generated listing images.
pub const DEFAULT_IMAGE_DIR: &str = "data/images";

/// `City, State` per line.
pub const DEFAULT_CITY_FILE: &str = "data/city_choices.txt";

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Flat JSON object of configuration keys.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ConfigFile {
    /// Reads and parses the key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(HomeMatchError::ConfigNotFound(path));
            }
            Err(err) => return Err(err.into()),
        };
        let values = match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => map,
            other => {
                return Err(HomeMatchError::Config(format!(
                    "{} must contain a JSON object, found {}",
                    path.display(),
                    json_kind(&other)
                )));
            }
        };
        Ok(Self { path, values })
    }

    /// Looks up a key, rendering non-string values as JSON.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Like [`ConfigFile::get`] but a missing key is an error.
    pub fn value(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| HomeMatchError::MissingConfigKey {
            key: key.to_string(),
            path: self.path.clone(),
        })
    }
}

/// Loads a single value from the key file at `config_path` (`~` is expanded).
pub fn load_config_value(key: &str, config_path: &str) -> Result<String> {
    ConfigFile::load(expand_home(config_path))?.value(key)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
