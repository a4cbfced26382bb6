use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hybridrag::ai::{ChatCompletionsClient, EmbeddingClient, HttpEmbeddingClient, LlmClient};
use hybridrag::config::AppConfig;
use hybridrag::pipeline::{DeletePartition, IndexOptions, Indexer};
use hybridrag::query::{QueryAggregator, QueryMode, retrieve_evidence};
use hybridrag::storage::{JsonVectorStorage, VectorStorage};

#[derive(Parser)]
#[command(name = "hybridrag", about = "Hybrid graph/tree retrieval index")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build or extend an index database from a directory of documents.
    Index(IndexArgs),
    /// Ask a question against an index database.
    Query(QueryArgs),
}

#[derive(clap::Args)]
struct IndexArgs {
    /// Database directory.
    #[arg(long)]
    db_path: PathBuf,
    /// Input directory: one subdirectory per group, text files inside.
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Build the entity graph and community reports.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    graph: bool,
    /// Build the recursive summary tree.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    tree: bool,
    /// Split documents into chunks (off stores one chunk per document).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    chunking: bool,
    /// Rewrite chunks into denoised bullet form before indexing.
    #[arg(long)]
    denoise: bool,
    /// Delete a group's artifacts instead of indexing.
    #[arg(long)]
    del_group: Option<u64>,
    /// Which artifacts --del-group removes.
    #[arg(long, value_enum, default_value_t = DeleteOption::All)]
    del_option: DeleteOption,
}

#[derive(Clone, Copy, ValueEnum)]
enum DeleteOption {
    All,
    Graph,
    Tree,
}

impl From<DeleteOption> for DeletePartition {
    fn from(option: DeleteOption) -> Self {
        match option {
            DeleteOption::All => DeletePartition::All,
            DeleteOption::Graph => DeletePartition::Graph,
            DeleteOption::Tree => DeletePartition::Tree,
        }
    }
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Question text.
    question: String,
    /// Database directory.
    #[arg(long)]
    db_path: PathBuf,
    /// Restrict retrieval to one group.
    #[arg(long)]
    group_id: Option<u64>,
    /// Number of evidence records to retrieve.
    #[arg(long, short = 'k')]
    top_k: Option<usize>,
    /// Which index paths to draw evidence from.
    #[arg(long, value_enum, default_value_t = Mode::GraphTree)]
    mode: Mode,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Community reports + tree summaries.
    GraphTree,
    /// Base chunks + tree summaries.
    Tree,
    /// Community reports only.
    Graph,
    /// Base chunks only.
    Flat,
}

impl From<Mode> for QueryMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::GraphTree => QueryMode::GraphTree,
            Mode::Tree => QueryMode::TreeOnly,
            Mode::Graph => QueryMode::GraphOnly,
            Mode::Flat => QueryMode::FlatOnly,
        }
    }
}

/// Everything one invocation owns: configuration, clients, storage.
struct AppContext {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingClient>,
    storage: Arc<dyn VectorStorage>,
}

impl AppContext {
    async fn build(db_path: &PathBuf) -> Result<Self> {
        let config = AppConfig::load().await?;
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set; aborting")?;

        let llm: Arc<dyn LlmClient> = Arc::new(ChatCompletionsClient::new(
            api_key.clone(),
            Some(config.llm.base_url.clone()),
            config.llm.model.clone(),
        ));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(HttpEmbeddingClient::new(
            api_key,
            Some(config.embedding.base_url.clone()),
            config.embedding.model.clone(),
        ));

        let storage: Arc<dyn VectorStorage> =
            Arc::new(JsonVectorStorage::new(db_path.clone(), embedder.clone()));
        storage.initialize().await?;

        Ok(Self {
            config,
            llm,
            embedder,
            storage,
        })
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    dotenv().ok();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Index(args) => run_index(args).await,
        Command::Query(args) => run_query(args).await,
    }
}

async fn run_index(args: IndexArgs) -> Result<()> {
    let ctx = AppContext::build(&args.db_path).await?;
    let indexer = Indexer::new(
        ctx.llm.clone(),
        ctx.embedder.clone(),
        ctx.storage.clone(),
        ctx.config.index.clone(),
    )?;

    if let Some(group_id) = args.del_group {
        indexer.delete_group(group_id, args.del_option.into()).await?;
        info!(group_id, "group deletion finished");
        return Ok(());
    }

    let Some(input_dir) = args.input_dir else {
        bail!("either --input-dir or --del-group is required");
    };
    if !input_dir.is_dir() {
        bail!("input dir {} does not exist", input_dir.display());
    }

    let options = IndexOptions {
        enable_graph: args.graph,
        enable_tree: args.tree,
        enable_chunking: args.chunking,
        denoise: args.denoise,
    };
    let stats = indexer.run(&input_dir, &options).await?;
    ctx.storage.finalize().await?;

    println!(
        "indexed {} documents ({} skipped), {} chunks, {} relationships, {} reports, {} summaries",
        stats.documents,
        stats.documents_skipped,
        stats.chunks,
        stats.relationships,
        stats.reports,
        stats.summaries
    );
    Ok(())
}

async fn run_query(args: QueryArgs) -> Result<()> {
    let ctx = AppContext::build(&args.db_path).await?;
    let indexer = Indexer::new(
        ctx.llm.clone(),
        ctx.embedder.clone(),
        ctx.storage.clone(),
        ctx.config.index.clone(),
    )?;
    let aggregator = QueryAggregator::new(
        ctx.llm.clone(),
        ctx.storage.clone(),
        indexer.tokenizer(),
        ctx.config.query.clone(),
    );

    let top_k = args.top_k.unwrap_or(ctx.config.query.top_k);
    let evidence = retrieve_evidence(
        ctx.storage.as_ref(),
        args.mode.into(),
        &args.question,
        top_k,
        args.group_id,
    )
    .await?;
    info!(items = evidence.len(), "evidence retrieved");

    let result = aggregator.answer_with_timeout(&args.question, evidence).await?;

    println!("{}\n", result.answer);
    if result.references.is_empty() {
        println!("References: none");
    } else {
        println!("References:");
        for reference in &result.references {
            let ids: Vec<String> = reference.chunk_ids.iter().map(u64::to_string).collect();
            println!("  group {}: chunks {}", reference.group_id, ids.join(", "));
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
