//! Command-line interface and command handlers.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};

use crate::augment::Augmenter;
use crate::config::{self, ConfigFile};
use crate::controller::{QdrantIndex, VectorIndex};
use crate::embedder::{Embedder, FastEmbedder, OpenAiEmbedder};
use crate::error::HomeMatchError;
use crate::generator::{load_city_choices, ListingsGenerator};
use crate::image::OpenAiImageGenerator;
use crate::listing::{load_listings, Listing, SearchResult};
use crate::llm::{ChatModel, OpenAiChat};
use crate::openai::OpenAiClient;
use crate::preferences::PreferenceCollector;
use crate::ui::{self, AppState};
use crate::vector_db::VectorDatabase;

const DEFAULT_TOTAL_LISTINGS: usize = 10;
const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_PAUSE_MS: u64 = 1000;
const DEFAULT_BIND: &str = "127.0.0.1:7860";
const OPENAI_EMBED_BATCH: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "homematch")]
#[command(about = "Personalized real estate listing search")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// JSON file holding API keys
    #[arg(
        long,
        global = true,
        env = "HOMEMATCH_CONFIG",
        default_value = config::DEFAULT_CONFIG_PATH,
    )]
    pub config: String,

    /// Listings JSON file
    #[arg(
        long,
        global = true,
        env = "HOMEMATCH_LISTINGS",
        default_value = config::DEFAULT_LISTINGS_PATH,
    )]
    pub listings: PathBuf,

    /// Directory for generated listing images
    #[arg(
        long,
        global = true,
        env = "HOMEMATCH_IMAGE_DIR",
        default_value = config::DEFAULT_IMAGE_DIR,
    )]
    pub image_dir: PathBuf,

    /// "City, State" lines used when generating listings
    #[arg(
        long,
        global = true,
        env = "HOMEMATCH_CITY_FILE",
        default_value = config::DEFAULT_CITY_FILE,
    )]
    pub city_file: PathBuf,

    /// Qdrant gRPC endpoint
    #[arg(long, global = true, env = "QDRANT_URL", default_value = config::DEFAULT_QDRANT_URL)]
    pub qdrant_url: String,

    /// Qdrant API key (falls back to the config file)
    #[arg(long, global = true, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Qdrant collection name
    #[arg(
        long,
        global = true,
        env = "HOMEMATCH_COLLECTION",
        default_value = config::DEFAULT_COLLECTION,
    )]
    pub collection: String,

    /// Embedding backend
    #[arg(
        long,
        global = true,
        value_enum,
        env = "HOMEMATCH_EMBEDDER",
        default_value_t = EmbeddingBackend::Fastembed,
    )]
    pub embedder: EmbeddingBackend,

    /// OpenAI API key (falls back to the config file)
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL (falls back to the config file)
    #[arg(long, global = true, env = "OPENAI_API_BASE")]
    pub openai_api_base: Option<String>,

    /// Chat model for generation, refinement and augmentation
    #[arg(
        long,
        global = true,
        env = "HOMEMATCH_CHAT_MODEL",
        default_value = config::DEFAULT_CHAT_MODEL,
    )]
    pub chat_model: String,

    /// Hosted embedding model (with `--embedder openai`)
    #[arg(long, global = true, default_value = config::DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Hosted embedding width (with `--embedder openai`)
    #[arg(long, global = true, default_value_t = config::DEFAULT_OPENAI_DIMENSIONS)]
    pub embedding_dimensions: usize,

    /// Image model for listing photos
    #[arg(long, global = true, default_value = config::DEFAULT_IMAGE_MODEL)]
    pub image_model: String,

    /// Generated image size
    #[arg(long, global = true, default_value = "256x256")]
    pub image_size: String,

    /// HTTP timeout for API calls, in seconds
    #[arg(long, global = true, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Retries for rate-limited or failed API calls
    #[arg(long, global = true, default_value_t = 3)]
    pub max_retries: usize,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Local AllMiniLM-L6-v2 via FastEmbed
    Fastembed,
    /// Hosted OpenAI embeddings
    Openai,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate synthetic listings (and photos) with the chat model
    Generate(GenerateArgs),

    /// Embed the listings file into Qdrant
    Index {
        /// Drop and recreate the collection first
        #[arg(long)]
        recreate: bool,
    },

    /// Answer the questionnaire in the terminal and print matches
    Search(SearchArgs),

    /// Start the web UI
    Serve(ServeArgs),

    /// Generate and index when no listings exist yet, then serve
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Listings to generate
    #[arg(long, default_value_t = DEFAULT_TOTAL_LISTINGS)]
    pub total: usize,

    /// Listings requested per chat call
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Skip photo generation
    #[arg(long)]
    pub no_images: bool,

    /// Pause between batches, in milliseconds
    #[arg(long, default_value_t = DEFAULT_PAUSE_MS)]
    pub pause_ms: u64,

    /// Seed for city and property-type sampling
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for GenerateArgs {
    fn default() -> Self {
        Self {
            total: DEFAULT_TOTAL_LISTINGS,
            batch_size: DEFAULT_BATCH_SIZE,
            no_images: false,
            pause_ms: DEFAULT_PAUSE_MS,
            seed: None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Use the built-in sample answers instead of prompting
    #[arg(long)]
    pub defaults: bool,

    /// Skip chat-model cleanup of the answers
    #[arg(long)]
    pub no_refine: bool,

    /// Print the stored descriptions without rewriting them
    #[arg(long)]
    pub no_augment: bool,

    /// Number of listings to return
    #[arg(short = 'k', long, default_value_t = 3)]
    pub k: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the web UI to
    #[arg(long, env = "HOMEMATCH_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Search with the description exactly as typed
    #[arg(long)]
    pub no_refine: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7860)),
            no_refine: false,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub generate: GenerateArgs,

    #[command(flatten)]
    pub serve: ServeArgs,

    /// Re-embed the listings file even when it already existed
    #[arg(long)]
    pub reindex: bool,
}

impl Settings {
    fn config_file(&self) -> Option<ConfigFile> {
        match ConfigFile::load(config::expand_home(&self.config)) {
            Ok(file) => Some(file),
            Err(HomeMatchError::ConfigNotFound(path)) => {
                debug!(path = %path.display(), "no config file");
                None
            }
            Err(err) => {
                warn!(error = %err, "ignoring unreadable config file");
                None
            }
        }
    }

    /// Value from the command line or environment, else from the key file.
    fn resolve(&self, explicit: Option<&String>, key: &str) -> Option<String> {
        explicit
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .or_else(|| self.config_file().and_then(|file| file.get(key)))
    }

    pub fn openai_api_key(&self) -> Result<String> {
        if let Some(key) = self.resolve(self.openai_api_key.as_ref(), config::OPENAI_API_KEY) {
            return Ok(key);
        }
        config::load_config_value(config::OPENAI_API_KEY, &self.config)
            .context(
                "OpenAI API key not set; pass --openai-api-key, set OPENAI_API_KEY, \
                 or add it to the config file",
            )
    }

    pub fn openai_api_base(&self) -> String {
        self.resolve(self.openai_api_base.as_ref(), config::OPENAI_API_BASE)
            .unwrap_or_else(|| config::DEFAULT_OPENAI_BASE.to_string())
    }

    pub fn qdrant_api_key(&self) -> Option<String> {
        self.resolve(self.qdrant_api_key.as_ref(), config::QDRANT_API_KEY)
    }

    fn openai_client(&self) -> Result<OpenAiClient> {
        let key = self.openai_api_key()?;
        let client = OpenAiClient::new(
            &key,
            &self.openai_api_base(),
            Duration::from_secs(self.timeout_secs),
            self.max_retries,
        )?;
        Ok(client)
    }

    pub fn chat(&self) -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::new(OpenAiChat::new(self.openai_client()?, &self.chat_model)))
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbeddingBackend::Fastembed => {
                Arc::new(FastEmbedder::new(true).context("failed to load the FastEmbed model")?)
            }
            EmbeddingBackend::Openai => Arc::new(OpenAiEmbedder::new(
                self.openai_client()?,
                &self.embedding_model,
                self.embedding_dimensions,
                self.embedding_dimensions != config::DEFAULT_OPENAI_DIMENSIONS,
                OPENAI_EMBED_BATCH,
            )),
        };
        Ok(embedder)
    }

    pub fn index(&self) -> Result<Arc<dyn VectorIndex>> {
        let index = QdrantIndex::connect(&self.qdrant_url, self.qdrant_api_key(), &self.collection)
            .with_context(|| format!("failed to connect to Qdrant at {}", self.qdrant_url))?;
        info!(url = %self.qdrant_url, collection = index.collection(), "using Qdrant");
        Ok(Arc::new(index))
    }

    pub fn database(&self) -> Result<VectorDatabase> {
        Ok(VectorDatabase::new(self.embedder()?, self.index()?))
    }
}

/// Dispatches the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings;
    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Generate(args) => {
            let listings = generate(&settings, &args).await?;
            println!(
                "Generated {} listings into {}",
                listings.len(),
                settings.listings.display()
            );
        }
        Command::Index { recreate } => {
            let stored = index(&settings, recreate).await?;
            println!("Stored {stored} listings in collection {}", settings.collection);
        }
        Command::Search(args) => search(&settings, &args).await?,
        Command::Serve(args) => serve(&settings, &args).await?,
        Command::Run(args) => {
            let fresh = !settings.listings.exists();
            let generated = if fresh {
                info!(path = %settings.listings.display(), "no listings yet, generating");
                match generate(&settings, &args.generate).await {
                    Ok(listings) => listings.len(),
                    Err(err) => {
                        warn!(error = %err, "listing generation failed");
                        0
                    }
                }
            } else {
                0
            };
            match index_step(fresh, generated, args.reindex) {
                IndexStep::Index => {
                    index(&settings, true).await?;
                }
                IndexStep::NothingGenerated => {
                    warn!("no listings were generated, serving without indexing");
                }
                IndexStep::Skip => {}
            }
            serve(&settings, &args.serve).await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexStep {
    Index,
    NothingGenerated,
    Skip,
}

/// Whether `run` embeds the listings file before serving.
fn index_step(fresh: bool, generated: usize, reindex: bool) -> IndexStep {
    if fresh && generated == 0 {
        IndexStep::NothingGenerated
    } else if fresh || reindex {
        IndexStep::Index
    } else {
        IndexStep::Skip
    }
}

async fn generate(settings: &Settings, args: &GenerateArgs) -> Result<Vec<Listing>> {
    ensure!(args.total > 0, "--total must be at least 1");
    ensure!(args.batch_size > 0, "--batch-size must be at least 1");
    let chat = settings.chat()?;
    let cities = load_city_choices(&settings.city_file);
    let mut generator = ListingsGenerator::new(chat, cities, settings.listings.clone())
        .with_counts(args.total, args.batch_size)
        .with_pause(Duration::from_millis(args.pause_ms));
    if let Some(seed) = args.seed {
        generator = generator.with_seed(seed);
    }
    if !args.no_images {
        let images = OpenAiImageGenerator::new(
            settings.openai_client()?,
            &settings.image_model,
            &settings.image_size,
        );
        generator = generator.with_images(Arc::new(images), settings.image_dir.clone());
    }
    let listings = generator.generate_listings().await;
    if listings.is_empty() {
        warn!("no listings were generated");
    }
    Ok(listings)
}

async fn index(settings: &Settings, recreate: bool) -> Result<usize> {
    let listings = load_listings(&settings.listings)
        .with_context(|| format!("failed to read {}", settings.listings.display()))?;
    let db = settings.database()?;
    let stored = db
        .store_listings(&listings, recreate)
        .await
        .context("failed to index listings")?;
    Ok(stored)
}

async fn search(settings: &Settings, args: &SearchArgs) -> Result<()> {
    let db = settings.database()?;
    let chat = if args.no_refine && args.no_augment {
        None
    } else {
        Some(settings.chat()?)
    };

    let refiner = chat.as_deref().filter(|_| !args.no_refine);
    let collector = PreferenceCollector::new(!args.defaults, refiner);
    let prefs = {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        collector.collect(&mut input, &mut output).await?
    };
    debug!(query = %prefs.query_text(), "buyer preferences");

    let mut results = db.search(&prefs, args.k).await?;
    if let Some(chat) = chat.filter(|_| !args.no_augment && !results.is_empty()) {
        results = Augmenter::new(chat).augment_all(&prefs, results).await?;
    }

    let mut out = std::io::stdout().lock();
    print_results(&mut out, &results)?;
    Ok(())
}

fn print_results<W: Write>(out: &mut W, results: &[SearchResult]) -> std::io::Result<()> {
    if results.is_empty() {
        writeln!(out, "No matching listings found.")?;
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        writeln!(out, "\n#{} {} ({:.3})", rank + 1, result.title(), result.score)?;
        writeln!(out, "   {} | {}", result.price_label(), result.location())?;
        writeln!(out, "   {}", result.display_description())?;
    }
    Ok(())
}

async fn serve(settings: &Settings, args: &ServeArgs) -> Result<()> {
    let chat = settings.chat()?;
    let state = AppState {
        db: settings.database()?,
        augmenter: Augmenter::new(chat.clone()),
        chat,
        refine_description: !args.no_refine,
    };
    ui::serve(state, &settings.image_dir, args.bind)
        .await
        .with_context(|| format!("web UI failed on {}", args.bind))?;
    Ok(())
}
