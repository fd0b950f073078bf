//! CLI entry point for the libris vector database.
//!
//! Provides commands for managing libraries and documents, searching them
//! semantically and maintaining the persisted indexes.
//! Main components: Cli parser, Commands enum and the async runtime.

use anyhow::{Context, Result, anyhow, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use libris::display::{
    create_document_table, create_index_table, create_library_table, create_search_table,
};
use libris::vector::{VectorDimension, VectorError, parse_embedding_model};
use libris::{
    DocumentId, DocumentIngestor, DocumentStore, DocumentUpdate, Embedder, FastEmbedder, IndexCache,
    IndexKind, IndexStore, Library, LibraryId, LibraryStore, LibrisError, MemoryStore, Metadata,
    SearchRequest, SearchService, Settings, parse_filter_args,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const STORE_FILE: &str = "store.json";

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Embedded vector database
#[derive(Parser)]
#[command(
    name = "libris",
    version = env!("CARGO_PKG_VERSION"),
    about = "Embedded vector database with semantic document search",
    long_about = "Store documents in libraries, embed them in chunks and search them with flat or IVF indexes.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .libris directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .libris/settings.toml")]
    Config,

    /// Manage libraries
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },

    /// Manage documents
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Search a library
    #[command(
        about = "Semantic search over the documents of a library",
        after_help = "Examples:\n  libris search \"error handling\" --library <ID>\n  libris search \"kmeans\" --library <ID> --index ivf --limit 3\n  libris search \"rust\" --library <ID> --filter year:gte:2020 --filter tags:in:'[\"db\"]'"
    )]
    Search {
        /// Query text
        query: String,

        /// Library to search
        #[arg(short, long)]
        library: LibraryId,

        /// Index used to find matching chunks
        #[arg(short, long, value_enum, default_value_t = IndexKind::Flat)]
        index: IndexKind,

        /// Maximum number of documents (defaults to search.default_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Metadata filter as field:operator:value (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage persisted indexes
    Indexes {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum LibraryAction {
    /// Create a library
    Create {
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// List libraries
    List,

    /// Delete a library with its documents and indexes
    Delete { id: LibraryId },
}

#[derive(Subcommand)]
enum DocumentAction {
    /// Add a document, chunking and embedding its content
    Add {
        #[arg(short, long)]
        library: LibraryId,

        #[arg(short, long)]
        title: String,

        /// Inline content
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        content: Option<String>,

        /// Read content from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// Update a document; new content replaces its chunks
    Update {
        id: DocumentId,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(long, conflicts_with = "file")]
        content: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,

        /// Replacement metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// Delete a document and its chunks
    Delete { id: DocumentId },

    /// List the documents of a library
    List {
        #[arg(short, long)]
        library: LibraryId,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Delete every persisted index of a library
    Delete { library: LibraryId },

    /// Force a rebuild of a library's indexes on the next search
    Invalidate {
        library: LibraryId,

        /// Only this kind (defaults to all)
        #[arg(short, long, value_enum)]
        kind: Option<IndexKind>,
    },

    /// Check that the index directory is usable
    Health,

    /// List persisted indexes
    List,
}

/// Loaded settings plus the record store backing every command.
struct App {
    settings: Settings,
    store: MemoryStore,
    snapshot_path: PathBuf,
    cache: Arc<IndexCache>,
}

impl App {
    fn open(settings: Settings) -> Result<Self> {
        let snapshot_path = settings.data_path().join(STORE_FILE);
        let store = MemoryStore::load_snapshot(&snapshot_path)?;
        Ok(Self {
            settings,
            store,
            snapshot_path,
            cache: Arc::new(IndexCache::new()),
        })
    }

    fn save(&self) -> Result<()> {
        self.store.save_snapshot(&self.snapshot_path)?;
        debug!("Saved store snapshot to {}", self.snapshot_path.display());
        Ok(())
    }

    fn embedder(&self) -> Result<Arc<FastEmbedder>> {
        let embedding = &self.settings.embedding;
        let embedder = FastEmbedder::new(
            &embedding.model,
            embedding.cache_dir.clone(),
            embedding.batch_size,
            true,
        )
        .with_context(|| format!("Failed to load embedding model '{}'", embedding.model))?;
        Ok(Arc::new(embedder))
    }

    fn ingestor(&self) -> Result<DocumentIngestor> {
        let store = Arc::new(self.store.clone());
        Ok(DocumentIngestor::new(
            store.clone(),
            store.clone(),
            store,
            self.embedder()?,
            Arc::clone(&self.cache),
        )
        .with_chunking(self.settings.chunking)
        .with_batch_size(self.settings.embedding.batch_size))
    }

    /// Search service; the embedding model is only loaded when asked for.
    fn search_service(&self, with_model: bool) -> Result<SearchService> {
        let store = Arc::new(self.store.clone());
        let embedder: Arc<dyn Embedder> = if with_model {
            self.embedder()?
        } else {
            let (_, dimension) = parse_embedding_model(&self.settings.embedding.model)?;
            Arc::new(UnloadedEmbedder {
                dimension: VectorDimension::new(dimension)?,
            })
        };
        Ok(SearchService::new(
            store.clone(),
            store,
            embedder,
            IndexStore::new(self.settings.index_path()),
        )
        .with_settings(self.settings.search.clone())
        .with_ivf_config(self.settings.index.ivf_config())
        .with_cache(Arc::clone(&self.cache)))
    }
}

/// Stand-in for commands that manage indexes but never embed text.
struct UnloadedEmbedder {
    dimension: VectorDimension,
}

#[async_trait::async_trait]
impl Embedder for UnloadedEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError> {
        Err(VectorError::EmbeddingFailed(
            "embedding model not loaded for this command".to_string(),
        ))
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_metadata(raw: Option<&str>) -> Result<Option<Metadata>> {
    raw.map(|raw| {
        serde_json::from_str::<Metadata>(raw).context("--metadata must be a JSON object")
    })
    .transpose()
}

fn read_content(content: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (content, file) {
        (Some(content), _) => Ok(Some(content)),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => Ok(None),
    }
}

/// Entry point with tokio async runtime.
///
/// Errors from the library layer are printed with their recovery suggestions.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        if let Some(libris_err) = err.downcast_ref::<LibrisError>() {
            for suggestion in libris_err.recovery_suggestions() {
                eprintln!("Suggestion: {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = &cli.command {
        let path = Settings::init_config_file(*force).map_err(|e| anyhow!("{e}"))?;
        println!("Created configuration file at: {}", path.display());
        println!("Edit this file to customize your settings.");
        return Ok(());
    }

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow!("Configuration error loading from {}: {e}", path.display())
        })?,
        None => Settings::load().map_err(|e| anyhow!("Configuration error: {e}"))?,
    };
    settings.validate()?;
    init_logging(&settings.logging.level, cli.verbose);

    if let Commands::Config = &cli.command {
        println!("Current Configuration:");
        println!("{}", "=".repeat(50));
        println!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let app = App::open(settings)?;
    match cli.command {
        Commands::Init { .. } | Commands::Config => unreachable!("handled above"),
        Commands::Library { action } => run_library(&app, action).await,
        Commands::Document { action } => run_document(&app, action).await,
        Commands::Search {
            query,
            library,
            index,
            limit,
            filters,
            json,
        } => {
            let filters = parse_filter_args(filters.as_slice()).map_err(LibrisError::validation)?;
            if LibraryStore::find(&app.store, library).await?.is_none() {
                return Err(LibrisError::not_found("Library", library).into());
            }
            let request = SearchRequest::new(library, query)
                .with_index(index)
                .with_limit(limit.unwrap_or(app.settings.search.default_limit))
                .with_filters(filters);

            let results = app.search_service(true)?.search(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No matching documents.");
            } else {
                println!("{}", create_search_table(&results));
            }
            Ok(())
        }
        Commands::Indexes { action } => run_indexes(&app, action),
    }
}

async fn run_library(app: &App, action: LibraryAction) -> Result<()> {
    match action {
        LibraryAction::Create { name, description } => {
            let library = LibraryStore::insert(&app.store, Library::new(name, description)).await?;
            app.save()?;
            println!("Created library {} ({})", library.name, library.id);
        }
        LibraryAction::List => {
            let libraries = LibraryStore::list(&app.store).await?;
            if libraries.is_empty() {
                println!("No libraries. Create one with 'libris library create <name>'.");
                return Ok(());
            }
            let mut counts = Vec::with_capacity(libraries.len());
            for library in &libraries {
                counts.push(DocumentStore::find_by_library(&app.store, library.id).await?.len());
            }
            println!("{}", create_library_table(&libraries, &counts));
        }
        LibraryAction::Delete { id } => {
            if !LibraryStore::delete(&app.store, id).await? {
                return Err(LibrisError::not_found("Library", id).into());
            }
            app.search_service(false)?.delete_library_indexes(id)?;
            app.save()?;
            println!("Deleted library {id}");
        }
    }
    Ok(())
}

async fn run_document(app: &App, action: DocumentAction) -> Result<()> {
    match action {
        DocumentAction::Add {
            library,
            title,
            content,
            file,
            metadata,
        } => {
            let content = read_content(content, file.as_deref())?
                .ok_or_else(|| anyhow!("either --content or --file is required"))?;
            let metadata = parse_metadata(metadata.as_deref())?.unwrap_or_default();
            let document = app
                .ingestor()?
                .add_document(library, title, content, metadata)
                .await?;
            app.save()?;
            println!("Added document {} ({})", document.title, document.id);
        }
        DocumentAction::Update {
            id,
            title,
            content,
            file,
            metadata,
        } => {
            let update = DocumentUpdate {
                title,
                content: read_content(content, file.as_deref())?,
                metadata: parse_metadata(metadata.as_deref())?,
            };
            if update == DocumentUpdate::default() {
                bail!("nothing to update; pass --title, --content, --file or --metadata");
            }
            let document = app.ingestor()?.update_document(id, update).await?;
            app.save()?;
            println!("Updated document {} ({})", document.title, document.id);
        }
        DocumentAction::Delete { id } => {
            // Deleting needs no embeddings, so skip loading the model
            let Some(document) = DocumentStore::find(&app.store, id).await? else {
                return Err(LibrisError::not_found("Document", id).into());
            };
            DocumentStore::delete(&app.store, id).await?;
            app.search_service(false)?
                .invalidate_index(document.library_id, None);
            app.save()?;
            println!("Deleted document {id}");
        }
        DocumentAction::List { library } => {
            let documents = DocumentStore::find_by_library(&app.store, library).await?;
            if documents.is_empty() {
                println!("No documents in library {library}.");
            } else {
                println!("{}", create_document_table(&documents));
            }
        }
    }
    Ok(())
}

fn run_indexes(app: &App, action: IndexAction) -> Result<()> {
    let service = app.search_service(false)?;
    match action {
        IndexAction::Delete { library } => {
            let deleted = service.delete_library_indexes(library)?;
            if deleted.is_empty() {
                println!("No persisted indexes for library {library}");
            } else {
                let kinds: Vec<&str> = deleted.iter().map(IndexKind::as_str).collect();
                println!("Deleted {} index(es) for library {library}", kinds.join(", "));
            }
        }
        IndexAction::Invalidate { library, kind } => {
            let kinds = kind.map_or_else(|| IndexKind::ALL.to_vec(), |kind| vec![kind]);
            for kind in kinds {
                let dropped = service.drop_index(library, kind)?;
                println!(
                    "{kind} index of library {library}: {}",
                    if dropped { "invalidated" } else { "not built yet" }
                );
            }
        }
        IndexAction::Health => {
            let path = service.index_health()?;
            println!("Index storage OK: {}", path.display());
        }
        IndexAction::List => {
            let indexes = service.list_indexes()?;
            if indexes.is_empty() {
                println!("No persisted indexes.");
            } else {
                println!("{}", create_index_table(&indexes));
            }
        }
    }
    Ok(())
}
