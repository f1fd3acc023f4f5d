//! tether CLI - talk to the supervised vector worker from the shell
//!
//! Usage:
//!   tether ask "What is X?" [--doc <document-id>]
//!   tether store <file> <document-id>
//!   tether delete <document-id>
//!   tether clear-all
//!
//! Examples:
//!   tether ask "what does the contract say about termination?" --doc 1712-contract.pdf
//!   tether store ./uploads/1712-contract.txt 1712-contract.pdf

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tether::config::Settings;
use tether::worker::protocol::{QueryParams, StoreParams};
use tether::WorkerGateway;

/// How long to wait for the worker's readiness signal at startup.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "tether - supervised worker-process RPC bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question against the vector store
    Ask {
        /// The question text
        question: String,

        /// Restrict the search to one document (searches everything if omitted)
        #[arg(short, long)]
        doc: Option<String>,
    },

    /// Store a file's extracted text in the vector store
    Store {
        /// Path to a UTF-8 text file with the extracted content
        file: PathBuf,

        /// Document id to store the text under
        document_id: String,
    },

    /// Delete a document's vectors (and any cached answers for it)
    Delete {
        /// Document id to delete
        document_id: String,
    },

    /// Wipe the whole vector store
    ClearAll,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: failed to load settings: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let gateway = match WorkerGateway::from_settings(&settings) {
        Ok(gateway) => gateway,
        Err(err) => {
            eprintln!("error: invalid worker configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let result = tokio::select! {
        result = run(&gateway, cli.command) => result,
        _ = tokio::signal::ctrl_c() => Err("interrupted".into()),
    };

    // The worker must be dead before the host exits.
    gateway.stop().await;

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    gateway: &WorkerGateway,
    command: Commands,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    gateway.wait_until_ready(STARTUP_TIMEOUT).await?;

    let value = match command {
        Commands::Ask { question, doc } => {
            gateway
                .query_question(QueryParams::new(question, doc))
                .await?
        }
        Commands::Store { file, document_id } => {
            let text = fs::read_to_string(&file)?;
            gateway
                .store_document(StoreParams {
                    file_path: file.display().to_string(),
                    text,
                    document_id,
                })
                .await?
        }
        Commands::Delete { document_id } => gateway.delete_document(&document_id).await?,
        Commands::ClearAll => gateway.clear_all().await?,
    };

    Ok(value)
}
