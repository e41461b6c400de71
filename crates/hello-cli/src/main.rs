//! Hello CLI - interactive greeting client
//!
//! Usage:
//!   hello                                  Connect to http://localhost:8080
//!   hello --endpoint http://host:port      Connect elsewhere
//!
//! Interceptor logs go to stderr so they stay out of the menu on stdout.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hello_cli::Repl;
use hello_grpc::ClientConfig;

/// Hello CLI - call every GreetingService method from a menu
#[derive(Parser, Debug)]
#[command(name = "hello")]
#[command(about = "Interactive client for the greeting service")]
struct Args {
    /// Server URI
    #[arg(long, env = "HELLO_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    /// Names read for each client-stream and bidi-stream call
    #[arg(long, env = "HELLO_NAMES", default_value_t = 5)]
    names: usize,

    /// Connection timeout in milliseconds
    #[arg(long, env = "HELLO_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    connect_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = ClientConfig::builder()
        .endpoint(args.endpoint)
        .connect_timeout(Duration::from_millis(args.connect_timeout_ms))
        .names_per_stream(args.names)
        .build();

    println!("start gRPC client");
    let client = hello_cli::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint))?;

    let input = BufReader::new(tokio::io::stdin());
    let mut repl = Repl::new(client, input, tokio::io::stdout())
        .names_per_stream(config.names_per_stream);
    repl.run().await?;

    Ok(())
}
