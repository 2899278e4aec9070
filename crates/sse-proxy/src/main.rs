//! Standalone launcher for the SSE normalizing proxy.
//!
//! Starts one proxy instance, prints the endpoint a downstream tool should use
//! and runs until Ctrl-C.
//!
//! Usage:
//!   sse-proxy --upstream https://api.example.com [--api-key KEY] [--log-format json]

use anyhow::Context;
use clap::{Parser, ValueEnum};
use sse_proxy::{ProxyConfig, ProxyServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Loopback proxy that repairs SSE streams from an OpenAI-compatible upstream
#[derive(Parser, Debug)]
#[command(name = "sse-proxy")]
#[command(author, version, about)]
struct Args {
    /// Upstream base URL, e.g. https://api.example.com/openai
    #[arg(short, long, env = "SSE_PROXY_UPSTREAM")]
    upstream: String,

    /// Bearer credential sent to the upstream
    #[arg(short = 'k', long, env = "SSE_PROXY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = ProxyConfig::new(&args.upstream, args.api_key.as_deref())
        .context("invalid proxy configuration")?;
    if let Some(credential) = config.credential() {
        info!("Using upstream credential ({})", credential.preview());
    }

    let server = ProxyServer::new(config).context("failed to create proxy")?;
    server.start().context("failed to start proxy")?;

    let endpoint = server
        .client_endpoint()
        .context("proxy stopped unexpectedly")?;
    println!("OPENAI_HOST={}", endpoint.base_url);
    println!("OPENAI_API_KEY={}", endpoint.api_key);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, shutting down");

    server.stop().await;
    Ok(())
}
