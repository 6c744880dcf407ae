use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkb::db::MetadataStore;
use pkb::index::SqliteContentIndex;
use pkb::ingest::{self, CharacterSplitter, WalkOptions};
use pkb::rag::{self, ConfiguredLlm};
use pkb::Config;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "pkb")]
#[command(version, about = "Personal knowledge base: ingest local files, ask questions about them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest files and directories (incremental: unchanged files are skipped)
    Ingest {
        /// Files or directories to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Forget everything ingested so far before ingesting
        #[arg(long)]
        drop: bool,
    },
    /// Answer a question from the ingested content
    Ask {
        question: String,

        /// Number of chunks to retrieve (defaults to ask.k from config)
        #[arg(short, long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.pkb.log_level.as_str()),
    )
    .init();
    log::debug!("Cache directory: {}", config.pkb.cache_dir.display());

    match cli.command {
        Command::Ingest { files, drop } => run_ingest(config, files, drop).await,
        Command::Ask { question, k } => run_ask(config, question, k).await,
    }
}

async fn run_ingest(config: Config, files: Vec<PathBuf>, drop: bool) -> Result<()> {
    log::info!("Starting pkb ingestion v{}", env!("CARGO_PKG_VERSION"));
    let start = Instant::now();

    let report = tokio::task::spawn_blocking(move || -> Result<ingest::IngestReport> {
        let mut store = MetadataStore::open(&config.metadata_db_path())
            .context("Failed to open metadata store")?;
        let index = SqliteContentIndex::open(&config.index_db_path())
            .context("Failed to open content index")?;

        if drop {
            ingest::reset(&mut store, &index).context("Failed to drop existing data")?;
        }

        let splitter = CharacterSplitter::from_config(&config.ingest);
        let options = WalkOptions::from_config(&config.ingest);
        Ok(ingest::run_ingestion(store, &index, &splitter, &options, &files)?)
    })
    .await
    .context("Ingestion task panicked")??;

    report.log_summary();
    log::info!("Total time: {:?}", start.elapsed());
    Ok(())
}

async fn run_ask(config: Config, question: String, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(config.ask.k);
    if k == 0 {
        anyhow::bail!("-k must be greater than 0");
    }

    let index = SqliteContentIndex::open(&config.index_db_path())
        .context("Failed to open content index")?;
    let llm = ConfiguredLlm::from_config(&config.ask)?;

    let answer = rag::ask_question(&index, &llm, &question, k).await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {}", source);
        }
    }
    Ok(())
}
