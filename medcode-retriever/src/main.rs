use anyhow::Context;
use clap::{Parser, Subcommand};
use medcode_embed::EmbeddingBackend;
use medcode_retriever::{
    Catalog, CodingAssistant, RetrievalBatch, Retriever, RetrieverConfig, TermExtractor,
    extraction::{LexiconExtractor, category},
    retrieval::{ExactMatch, KeyedResults, LiteralMatcher, SemanticMatch},
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{Level, debug};

/// Look up candidate billing codes for clinical terms.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reference table; overrides the configured catalog path
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Use the offline hashing embedder with this many dimensions
    #[arg(long, value_name = "DIM")]
    hashing: Option<usize>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Nearest catalog entries by embedding similarity
    Semantic {
        #[arg(required = true)]
        terms: Vec<String>,
        /// Results per term
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Catalog entries containing the term (case-insensitive)
    Exact {
        #[arg(required = true)]
        terms: Vec<String>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Semantic and exact results together
    Search {
        #[arg(required = true)]
        terms: Vec<String>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Extract terms from free text, then search for each
    Process {
        text: String,
        /// JSON lexicon; overrides the configured lexicon path
        #[arg(short, long)]
        lexicon: Option<PathBuf>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show the catalog entry at a position
    Lookup {
        index: usize,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Resolve UMLS semantic type codes to a category
    Categories {
        #[arg(required = true)]
        codes: Vec<String>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Catalog and configuration statistics
    Stats {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct CategoryOutput<'a> {
    code: &'a str,
    category: Option<category::Category>,
}

#[derive(Serialize)]
struct CatalogStats {
    source: String,
    entries: usize,
    fingerprint: String,
    top_k: usize,
    embedding: EmbeddingBackend,
    index_cache: Option<PathBuf>,
    index_cache_present: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => RetrieverConfig::from_file(path).await?,
        None => RetrieverConfig::default().with_env_overrides()?,
    };
    if let Some(catalog) = &args.catalog {
        config.catalog_path = catalog.clone();
    }
    if let Some(dimension) = args.hashing {
        config.embedding = EmbeddingBackend::Hashing { dimension };
    }
    debug!("Effective configuration: {:?}", config);

    match args.command {
        Commands::Semantic {
            terms,
            top_k,
            format,
        } => {
            if let Some(k) = top_k {
                config.top_k = k;
            }
            let retriever = build_retriever(&config).await?;
            let results = retriever.semantic_search(terms).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                OutputFormat::Summary => {
                    for (term, matches) in results.iter() {
                        println!("{term}:");
                        print_semantic(matches);
                    }
                    print_failures(&results);
                }
            }
            Ok(())
        }
        Commands::Exact {
            terms,
            top_k,
            format,
        } => {
            // literal matching needs no embedding index
            let catalog = load_catalog(&config)?;
            let k = top_k.unwrap_or(config.top_k);
            let results = LiteralMatcher::new(&catalog).search_terms(&catalog, terms, k);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                OutputFormat::Summary => {
                    for (term, matches) in results.iter() {
                        println!("{term}:");
                        print_exact(matches);
                    }
                    print_failures(&results);
                }
            }
            Ok(())
        }
        Commands::Search {
            terms,
            top_k,
            format,
        } => {
            if let Some(k) = top_k {
                config.top_k = k;
            }
            let retriever = build_retriever(&config).await?;
            let batch = retriever.retrieve(terms).await;
            print_batch(&batch, &format)?;
            Ok(())
        }
        Commands::Process {
            text,
            lexicon,
            format,
        } => {
            let lexicon = lexicon.or_else(|| config.lexicon_path.clone()).context(
                "process needs a lexicon (--lexicon, or lexicon_path in the config file)",
            )?;
            let extractor: Arc<dyn TermExtractor> =
                Arc::new(LexiconExtractor::from_path(&lexicon).await?);
            let assistant = CodingAssistant::new(extractor, build_retriever(&config).await?);
            let outcome = assistant.process(&text).await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                OutputFormat::Summary => {
                    if !outcome.has_terms() {
                        println!("No medical terms found.");
                        return Ok(());
                    }
                    println!("Extracted terms:");
                    for term in &outcome.terms {
                        println!(
                            "  {} [{}] {} ({:.2})",
                            term.text, term.category, term.concept_id, term.score
                        );
                    }
                    if let Some(batch) = &outcome.results {
                        println!();
                        print_batch(batch, &format)?;
                    }
                }
            }
            Ok(())
        }
        Commands::Lookup { index, format } => {
            let catalog = load_catalog(&config)?;
            let entry = catalog.get(index)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entry)?),
                OutputFormat::Summary => {
                    println!("Position: {index}");
                    println!("Code: {}", entry.code);
                    println!("Medical term: {}", entry.label);
                    println!("Description: {}", entry.description);
                }
            }
            Ok(())
        }
        Commands::Categories { codes, format } => {
            let resolved = category::resolve(&codes);
            let per_code: Vec<CategoryOutput> = codes
                .iter()
                .map(|code| CategoryOutput {
                    code,
                    category: category::lookup(code),
                })
                .collect();
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "codes": per_code,
                        "resolved": resolved,
                    }))?
                ),
                OutputFormat::Summary => {
                    for output in &per_code {
                        match output.category {
                            Some(category) => println!("  {} → {}", output.code, category),
                            None => println!("  {} → (unknown)", output.code),
                        }
                    }
                    println!("Category: {resolved}");
                }
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let catalog = load_catalog(&config)?;
            let stats = CatalogStats {
                source: catalog.source_name().to_string(),
                entries: catalog.len(),
                fingerprint: hex::encode(catalog.fingerprint()),
                top_k: config.top_k,
                embedding: config.embedding.clone(),
                index_cache_present: config
                    .index_cache_path
                    .as_ref()
                    .is_some_and(|p| p.exists()),
                index_cache: config.index_cache_path.clone(),
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary => {
                    println!("Catalog: {}", stats.source);
                    println!("Entries: {}", stats.entries);
                    println!("Fingerprint: {}", stats.fingerprint);
                    println!("Top k: {}", stats.top_k);
                    match &stats.embedding {
                        EmbeddingBackend::FastEmbed(embed) => println!(
                            "Embedding: fastembed {}",
                            embed.hf_repo().unwrap_or(embed.model_name())
                        ),
                        EmbeddingBackend::Hashing { dimension } => {
                            println!("Embedding: hashing ({dimension} dimensions)")
                        }
                    }
                    match &stats.index_cache {
                        Some(path) => println!(
                            "Index cache: {} ({})",
                            path.display(),
                            if stats.index_cache_present {
                                "present"
                            } else {
                                "missing"
                            }
                        ),
                        None => println!("Index cache: disabled"),
                    }
                }
            }
            Ok(())
        }
    }
}

fn load_catalog(config: &RetrieverConfig) -> anyhow::Result<Arc<Catalog>> {
    let catalog = Catalog::load_with_delimiter(&config.catalog_path, config.delimiter_byte())?;
    Ok(Arc::new(catalog))
}

async fn build_retriever(config: &RetrieverConfig) -> anyhow::Result<Retriever> {
    config.validate()?;
    let catalog = load_catalog(config)?;
    let provider = config
        .embedding
        .create_provider()
        .await
        .context("failed to initialize the embedding provider")?;
    let retriever = Retriever::build(
        catalog,
        provider,
        config.embed_batch_size,
        config.index_cache_path.as_deref(),
        config.retrieval_options(),
    )
    .await?;
    Ok(retriever)
}

fn print_semantic(matches: &[SemanticMatch]) {
    if matches.is_empty() {
        println!("    (none)");
    }
    for m in matches {
        println!("    {:<8} {:.4}  {}", m.code, m.similarity, m.label);
    }
}

fn print_exact(matches: &[ExactMatch]) {
    if matches.is_empty() {
        println!("    (none)");
    }
    for m in matches {
        println!("    {:<8} [{}] {}", m.code, m.matched_column, m.matched_text());
    }
}

fn print_failures<V>(results: &KeyedResults<V>) {
    for failure in results.failures() {
        eprintln!("warning: {failure}");
    }
}

fn print_batch(batch: &RetrievalBatch, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(batch)?),
        OutputFormat::Summary => {
            for (term, results) in batch.iter() {
                println!("{term}:");
                println!("  Semantic:");
                print_semantic(&results.semantic);
                println!("  Exact:");
                print_exact(&results.exact);
            }
            print_failures(batch);
        }
    }
    Ok(())
}
