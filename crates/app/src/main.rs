use chrono::Utc;
use clap::{Parser, Subcommand};
use reg_qa_core::{
    fetch_remote_index, index_corpus, AnswerResult, AnyEmbedder, AnyReranker, ChatTurn,
    Embedder, IndexOutcome, LocalVectorStore, OpenAiChatModel, RagConfig, RagPipeline,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "reg-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of PDF files to ingest.
    #[arg(long, env = "RAG_CORPUS_DIR", default_value = "data/documents")]
    corpus_dir: PathBuf,

    /// Root directory of the persisted vector store.
    #[arg(long, env = "RAG_STORE_PATH", default_value = "vector_store")]
    store_path: PathBuf,

    /// Collection name inside the store.
    #[arg(long, env = "RAG_COLLECTION", default_value = "regulatory_docs")]
    collection: String,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest the PDF corpus and build the vector index.
    Index {
        /// Delete the existing collection first and rebuild from
        /// scratch. Destructive.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Ask one grounded question and print the answer with sources.
    Ask {
        /// The question to answer.
        #[arg(long)]
        question: String,
        /// Context chunks to retrieve (1-10).
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Interactive chat; follow-up questions see earlier turns.
    Chat {
        /// Context chunks to retrieve per question (1-10).
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Download a prebuilt index archive if the store is absent.
    FetchIndex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "reg-qa boot"
    );

    let mut config = RagConfig::from_env()?;
    config.corpus_dir = cli.corpus_dir;
    config.store_path = cli.store_path;
    config.collection = cli.collection;

    match cli.command {
        Command::Index { reset } => {
            let embedder = AnyEmbedder::from_env();
            match index_corpus(&config, &embedder, reset).await? {
                IndexOutcome::SkippedExisting => println!(
                    "already indexed: collection '{}' exists under {}; pass --reset to rebuild",
                    config.collection,
                    config.store_path.display()
                ),
                IndexOutcome::Indexed { chunks } => println!(
                    "indexed {chunks} chunks into '{}' under {}",
                    config.collection,
                    config.store_path.display()
                ),
            }
        }
        Command::Ask { question, top_k } => {
            let pipeline = build_pipeline(&config)?;
            let result = pipeline.ask(&question, top_k, &[]).await?;
            print_answer(&result);
        }
        Command::Chat { top_k } => {
            let pipeline = build_pipeline(&config)?;
            let mut history: Vec<ChatTurn> = Vec::new();
            println!("reg-qa chat (empty line exits)");

            loop {
                print!("> ");
                std::io::stdout().flush()?;

                let mut line = String::new();
                if std::io::stdin().read_line(&mut line)? == 0 {
                    break;
                }
                let question = line.trim();
                if question.is_empty() {
                    break;
                }

                let result = pipeline.ask(question, top_k, &history).await?;
                print_answer(&result);

                history.push(ChatTurn::user(question));
                history.push(ChatTurn::assistant(result.answer));
            }
        }
        Command::FetchIndex => {
            if fetch_remote_index(&config).await? {
                println!(
                    "collection '{}' is ready under {}",
                    config.collection,
                    config.store_path.display()
                );
            } else {
                println!("nothing fetched; set RAG_INDEX_ARCHIVE_URL or run `reg-qa index`");
            }
        }
    }

    Ok(())
}

fn build_pipeline(
    config: &RagConfig,
) -> anyhow::Result<RagPipeline<AnyEmbedder, LocalVectorStore, AnyReranker, OpenAiChatModel>> {
    let embedder = AnyEmbedder::from_env();
    let store = LocalVectorStore::open(&config.store_path, &config.collection)?;

    if store.dimensions() != embedder.dimensions() {
        anyhow::bail!(
            "collection was built with {}-dimensional embeddings but the configured embedder \
             produces {}; re-run `reg-qa index --reset`",
            store.dimensions(),
            embedder.dimensions()
        );
    }

    let chat = OpenAiChatModel::from_env()?;
    let reranker = AnyReranker::from_env();

    info!(
        collection = %config.collection,
        rerank = config.rerank,
        "pipeline ready"
    );
    Ok(RagPipeline::new(
        embedder,
        store,
        Some(reranker),
        chat,
        config.clone(),
    ))
}

fn print_answer(result: &AnswerResult) {
    println!("\n{}\n", result.answer);
    if !result.sources.is_empty() {
        println!("Sources ({}):", result.num_sources);
        for (position, source) in result.sources.iter().enumerate() {
            println!("  {}. {source}", position + 1);
        }
        println!();
    }
}
