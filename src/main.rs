use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use scarab::config;
use scarab::enrich::{Enricher, IssueEnricher, ReviewFeeder};
use scarab::identity::{HttpIdentityService, IdentityService, LocalIdentityService};
use scarab::indexer::{BatchIndexer, IndexerOptions};
use scarab::projects::ProjectMap;
use scarab::source::RecordReader;
use scarab::store::DocumentStore;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "scarab")]
#[command(about = "Enrich issue tracker records and bulk-load them into a search index")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich records from a file and index them in bulk batches
    Run(RunArgs),
    /// Create the target index and install its field mappings
    Init(InitArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordKind {
    /// Issue records, fully enriched into flat documents
    Issues,
    /// Review records, fed through with only an identifier added
    Reviews,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the newline-delimited raw records file
    #[arg(short, long)]
    input: String,

    /// Base URL of the target index (e.g. http://localhost:9200/bugzilla)
    #[arg(long)]
    index_url: String,

    /// Kind of records in the input file
    #[arg(long, value_enum, default_value = "issues")]
    kind: RecordKind,

    /// Project map file (origin plus product to project name)
    #[arg(long)]
    projects_file: Option<String>,

    /// Local identity registry: JSON map of email domains to organizations
    #[arg(long)]
    identities: Option<String>,

    /// Remote identity service URL (takes precedence over --identities)
    #[arg(long)]
    identity_url: Option<String>,

    /// Maximum number of documents per bulk request
    #[arg(long, default_value_t = config::DEFAULT_MAX_BULK_ITEMS)]
    max_bulk: usize,

    /// Limit number of records to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Dry run - enrich and count but don't write to the store
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct InitArgs {
    /// Base URL of the target index
    #[arg(long)]
    index_url: String,

    /// Kind of records the index will hold
    #[arg(long, value_enum, default_value = "issues")]
    kind: RecordKind,
}

fn build_enricher(args: &RunArgs) -> Result<Arc<dyn Enricher>> {
    match args.kind {
        RecordKind::Reviews => Ok(Arc::new(ReviewFeeder)),
        RecordKind::Issues => {
            let identities: Option<Arc<dyn IdentityService>> =
                if let Some(ref url) = args.identity_url {
                    info!(url = %url, "Using remote identity service");
                    Some(Arc::new(HttpIdentityService::new(
                        url,
                        config::HTTP_TIMEOUT_SECS,
                    )?))
                } else if let Some(ref path) = args.identities {
                    info!(path = %path, "Using local identity registry");
                    Some(Arc::new(LocalIdentityService::with_domain_map(Path::new(
                        path,
                    ))?))
                } else {
                    None
                };

            let projects = args
                .projects_file
                .as_ref()
                .map(|path| ProjectMap::load(Path::new(path)))
                .transpose()?;

            Ok(Arc::new(IssueEnricher::new(identities, projects)))
        }
    }
}

fn run_index(args: RunArgs) -> Result<()> {
    let start = Instant::now();

    let enricher = build_enricher(&args)?;
    let store = DocumentStore::new(&args.index_url, config::HTTP_TIMEOUT_SECS)?;
    let options = IndexerOptions {
        max_bulk_items: args.max_bulk,
        dry_run: args.dry_run,
        ..Default::default()
    };
    let indexer = BatchIndexer::new(store, enricher.clone(), options);
    let reader = RecordReader::open(Path::new(&args.input))?;

    info!(
        input = %args.input,
        index = %args.index_url,
        entity = enricher.entity_type(),
        "Starting indexing pass"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("scarab-worker")
        .enable_io()
        .enable_time()
        .build()?;
    let stats = match args.limit {
        Some(limit) => rt.block_on(indexer.index_all(reader.take(limit as usize)))?,
        None => rt.block_on(indexer.index_all(reader))?,
    };

    let duration = start.elapsed();
    info!(duration_secs = duration.as_secs_f64(), "Indexing complete");

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", duration.as_secs_f64());
    println!();
    println!("Records processed:  {}", stats.processed);
    println!("Documents indexed:  {}", stats.indexed);
    println!("Records dropped:    {}", stats.dropped);
    println!("Bulk flushes:       {}", stats.flushes);

    Ok(())
}

fn run_init(args: InitArgs) -> Result<()> {
    let enricher: Arc<dyn Enricher> = match args.kind {
        RecordKind::Issues => Arc::new(IssueEnricher::new(None, None)),
        RecordKind::Reviews => Arc::new(ReviewFeeder),
    };
    let store = DocumentStore::new(&args.index_url, config::HTTP_TIMEOUT_SECS)?;
    let mappings = enricher.index_mappings();
    let has_mappings = mappings
        .as_object()
        .map_or(false, |fields| !fields.is_empty());

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("scarab-worker")
        .enable_io()
        .enable_time()
        .build()?;
    rt.block_on(async {
        if store.create_index().await? {
            info!(index = %args.index_url, "Created index");
        } else {
            info!(index = %args.index_url, "Index already exists");
        }
        if has_mappings {
            store.put_mapping(enricher.entity_type(), &mappings).await?;
        }
        Ok::<(), anyhow::Error>(())
    })?;

    if has_mappings {
        println!(
            "Initialized {} index at {}",
            enricher.entity_type(),
            args.index_url
        );
    } else {
        println!(
            "Initialized {} index at {} (no mappings to install)",
            enricher.entity_type(),
            args.index_url
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Run(args) => run_index(args),
        Commands::Init(args) => run_init(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
