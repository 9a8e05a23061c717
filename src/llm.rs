//! Chat-model abstraction and its OpenAI-compatible implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HomeMatchError, Result};
use crate::openai::OpenAiClient;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One message of a chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Anything that can answer a chat prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the assistant reply for `messages`.
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Chat completions against an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature,
            messages,
        };
        let parsed: ChatResponse = self
            .client
            .post_json("chat/completions", &request, "OpenAI chat")
            .await?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| {
                HomeMatchError::InvalidResponse("chat completion had no content".to_string())
            })?;
        debug!(model = %self.model, chars = answer.len(), "chat completion");
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

const REFINE_SYSTEM: &str = "You are an AI that refines user input for structured data.";

/// Builds the prompt used to clean up free-text buyer input.
pub fn refine_prompt(text: &str) -> String {
    format!(
        "Please improve the following user input by:\n\
         1. Fixing typos and improving clarity.\n\
         2. Replacing 'and', 'or' with commas ',' when separating items.\n\
         3. Keeping it concise and easy to parse.\n\n\
         User Input: \"{text}\"\n\
         Improved Output:"
    )
}

/// Tidies a free-text answer with the chat model.
///
/// Blank input is returned untouched and any model failure falls back to the
/// original text.
pub async fn refine_input(chat: &dyn ChatModel, text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    let messages = [ChatMessage::system(REFINE_SYSTEM), ChatMessage::user(refine_prompt(text))];
    match chat.complete(&messages, 0.0).await {
        Ok(reply) => {
            let reply = reply.trim().trim_matches('"').trim();
            if reply.is_empty() {
                text.to_string()
            } else {
                reply.to_string()
            }
        }
        Err(err) => {
            warn!(error = %err, "input refinement failed, keeping original text");
            text.to_string()
        }
    }
}
