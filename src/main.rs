use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use heyweb::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use heyweb::config::{self, DEFAULT_PORT};
use heyweb::{Assistant, Config};

/// HeyWeb proxy: chat, summarize and translate over a chat-completion API
#[derive(Parser)]
#[command(name = "heyweb", version, about)]
struct Cli {
    /// API key for the completion service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model to request
    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Listen on all interfaces instead of localhost only
    #[arg(long)]
    public: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env has to be in the environment before clap reads it
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,heyweb=info",
        1 => "info,heyweb=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
    config::report_dotenv(&dotenv);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config {
        api_key: cli.api_key,
        model: cli.model,
        base_url: cli.base_url,
        port: cli.port,
    };
    config.warn_if_incomplete();
    tracing::info!(model = %config.model, base_url = %config.base_url, data_dir = %config::data_dir().display(), "starting");

    let host = if cli.public {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::LOCALHOST
    };
    let assistant = Assistant::new(Arc::new(config.completion_service()));
    heyweb::server::serve(assistant, SocketAddr::from((host, config.port))).await?;
    Ok(())
}
