mod cli;
mod gemini_client;

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::cli::chat::fetcher::Fetcher;
use crate::gemini_client::{
    DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS, GeminiClient, GeminiConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Statement to argue with, then exit
    #[arg(short, long)]
    input: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Gemini model to ask
    #[arg(short, long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Request timeout in seconds
    #[arg(long, env = "GEMINI_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        /// Statement to argue with, then exit
        #[arg(short, long)]
        input: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let (input, verbose) = match cli.command {
        Some(Commands::Chat { input, verbose }) => (input.or(cli.input), verbose || cli.verbose),
        None => (cli.input, cli.verbose),
    };

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Logs go to stderr so they stay out of the transcript.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting useless gpt");

    let config = GeminiConfig {
        model: cli.model,
        base_url: cli.base_url,
        timeout: Duration::from_secs(cli.timeout),
        ..GeminiConfig::from_env()
    };
    let fetcher = Fetcher::new(GeminiClient::new(config)?);

    let interactive = input.is_none();
    let mut chat_context = ChatContext::new(Box::new(io::stdout()), input, interactive, fetcher);
    chat_context.run().await
}
