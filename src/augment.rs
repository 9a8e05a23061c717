//! Rewrites retrieved listing descriptions to speak to the buyer's preferences.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{HomeMatchError, Result};
use crate::listing::SearchResult;
use crate::llm::{ChatMessage, ChatModel};
use crate::preferences::BuyerPreferences;

const AUGMENT_TEMPERATURE: f32 = 0.7;

const AUGMENT_SYSTEM: &str = "You are a real estate copywriter.";

/// Listing description rewriter backed by a chat model.
#[derive(Clone)]
pub struct Augmenter {
    chat: Arc<dyn ChatModel>,
}

impl Augmenter {
    /// # Arguments
    ///
    /// * `chat` - Model used for the rewrites (temperature 0.7).
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Returns the rewritten description for one listing.
    pub async fn augment(&self, prefs: &BuyerPreferences, result: &SearchResult) -> Result<String> {
        let prompt = augment_prompt(prefs, result)?;
        let messages = [ChatMessage::system(AUGMENT_SYSTEM), ChatMessage::user(prompt)];
        let reply = self.chat.complete(&messages, AUGMENT_TEMPERATURE).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(HomeMatchError::InvalidResponse(
                "augmentation reply was empty".to_string(),
            ));
        }
        Ok(reply.to_string())
    }

    /// Augments every result concurrently.
    ///
    /// A listing whose rewrite fails keeps `augmented_description = None`.
    pub async fn augment_all(
        &self,
        prefs: &BuyerPreferences,
        mut results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Err(HomeMatchError::EmptyInput(
                "no listings to augment".to_string(),
            ));
        }

        let mut tasks = JoinSet::new();
        for (position, result) in results.iter().enumerate() {
            let augmenter = self.clone();
            let prefs = prefs.clone();
            let result = result.clone();
            tasks.spawn(async move { (position, augmenter.augment(&prefs, &result).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            let (position, outcome) = joined?;
            match outcome {
                Ok(text) => {
                    debug!(position, "augmented listing description");
                    results[position].augmented_description = Some(text);
                }
                Err(err) => {
                    warn!(position, error = %err, "error generating augmented description");
                }
            }
        }
        Ok(results)
    }
}

/// Prompt asking for a buyer-focused rewrite that keeps the facts intact.
pub fn augment_prompt(prefs: &BuyerPreferences, result: &SearchResult) -> Result<String> {
    let listing = serde_json::to_string_pretty(result)?;
    Ok(format!(
        "Your role is to enhance real estate listing descriptions.\n\
         You will receive a real estate listing retrieved using similarity search. \
         It matches the buyer's preferences in terms of location, property features, \
         amenities, and neighborhood.\n\n\
         Buyer preferences: {}\n\n\
         Your task:\n\
         - Enhance the property description: subtly emphasize features that align with \
         the buyer's specific preferences.\n\
         - Maintain factual integrity: do not add fictional information. Keep the facts \
         unchanged while improving appeal.\n\n\
         Here is the listing:\n{listing}\n\n\
         Now, rewrite the description to highlight the aspects most relevant to the buyer. \
         Reply with the description text only.",
        prefs.query_text()
    ))
}
