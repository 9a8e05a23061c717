//! In-process fakes for the chat, embedding, image and vector-store seams,
//! plus a localhost HTTP stub for the OpenAI-compatible clients.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use axum::Router;

use crate::controller::{check_lengths, ScoredDocument, VectorIndex};
use crate::embedder::Embedder;
use crate::error::{HomeMatchError, Result};
use crate::image::ImageGenerator;
use crate::listing::ListingDocument;
use crate::llm::{ChatMessage, ChatModel};

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

enum Script {
    Queue(Mutex<VecDeque<String>>),
    Respond(Responder),
    Fail,
}

/// Chat model that replays canned replies and records every prompt.
pub struct ScriptedChat {
    script: Script,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChat {
    /// Replies in order; errors once the queue is exhausted.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Queue(Mutex::new(
            replies.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn responding<F>(respond: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    {
        Self::with_script(Script::Respond(Box::new(respond)))
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Fail)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            temperature,
        });
        match &self.script {
            Script::Queue(queue) => queue.lock().unwrap().pop_front().ok_or_else(|| {
                HomeMatchError::InvalidResponse("no scripted reply left".to_string())
            }),
            Script::Respond(respond) => respond(messages),
            Script::Fail => Err(HomeMatchError::Api {
                service: "scripted chat",
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }
}

/// Vocabulary used by [`KeywordEmbedder`]; one dimension per word.
const KEYWORDS: [&str; 12] = [
    "pool", "garage", "garden", "gym", "fireplace", "balcony", "basement", "denver", "boston",
    "quiet", "downtown", "beach",
];

/// Deterministic bag-of-keywords embedder.
#[derive(Debug, Default)]
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|keyword| lower.matches(keyword).count() as f32)
            .collect();
        // keeps the vector non-zero for texts without any keyword
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }
}

/// Brute-force cosine index kept in memory.
#[derive(Default)]
pub struct MemoryIndex {
    dimensions: Mutex<Option<usize>>,
    entries: Mutex<Vec<(ListingDocument, Vec<f32>)>>,
}

impl MemoryIndex {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn dimensions(&self) -> Option<usize> {
        *self.dimensions.lock().unwrap()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, dimensions: usize, recreate: bool) -> Result<()> {
        let mut current = self.dimensions.lock().unwrap();
        if recreate || current.is_none() {
            *current = Some(dimensions);
            self.entries.lock().unwrap().clear();
        }
        Ok(())
    }

    async fn upsert(&self, documents: &[ListingDocument], vectors: Vec<Vec<f32>>) -> Result<()> {
        check_lengths(documents.len(), vectors.len())?;
        let mut entries = self.entries.lock().unwrap();
        entries.extend(documents.iter().cloned().zip(vectors));
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredDocument>> {
        let entries = self.entries.lock().unwrap();
        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|(document, stored)| ScoredDocument {
                document: document.clone(),
                score: cosine(&vector, stored),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Image generator returning fixed bytes, or failing.
pub struct StaticImages {
    pub bytes: Option<Vec<u8>>,
    pub prompts: Mutex<Vec<String>>,
}

impl StaticImages {
    pub fn new(bytes: Option<Vec<u8>>) -> Self {
        Self {
            bytes,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageGenerator for StaticImages {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.bytes
            .clone()
            .ok_or_else(|| HomeMatchError::InvalidResponse("image backend down".to_string()))
    }
}

/// Serves the router built by `build` on an ephemeral localhost port and
/// returns its base URL. `build` receives that URL.
pub async fn serve_stub<F>(build: F) -> String
where
    F: FnOnce(&str) -> Router,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = build(&base);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base
}
