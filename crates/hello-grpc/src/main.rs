//! Hello gRPC Server
//!
//! Runs the GreetingService with two logging interceptors on every call.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hello_grpc::{GreeterServer, LoggingInterceptor, ServerConfig};

/// Hello gRPC Server - greetings over every RPC shape
#[derive(Parser, Debug)]
#[command(name = "hello-grpc")]
#[command(about = "gRPC server answering greetings with chained interceptors")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "HELLO_ADDR", default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Override the port of --addr
    #[arg(long, env = "HELLO_PORT")]
    port: Option<u16>,

    /// Make Hello fail with code Unknown and this debug detail
    #[arg(long, env = "HELLO_FAIL_WITH")]
    fail_with: Option<String>,

    /// Responses sent by HelloServerStream
    #[arg(long, env = "HELLO_STREAM_COUNT", default_value_t = 5)]
    stream_count: usize,

    /// Wait after each HelloServerStream response, in milliseconds
    #[arg(long, env = "HELLO_STREAM_INTERVAL_MS", default_value_t = 1000)]
    stream_interval_ms: u64,

    /// Do not register the reflection service
    #[arg(long)]
    no_reflection: bool,
}

impl Args {
    fn config(&self) -> ServerConfig {
        let mut builder = ServerConfig::builder()
            .addr(self.addr)
            .reflection(!self.no_reflection)
            .stream_count(self.stream_count)
            .stream_interval(Duration::from_millis(self.stream_interval_ms));
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(detail) = &self.fail_with {
            builder = builder.failure_detail(detail.clone());
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.config();

    let server = GreeterServer::new(config)
        .with_unary_interceptor(LoggingInterceptor::new("server-1"))
        .with_unary_interceptor(LoggingInterceptor::new("server-2"))
        .with_stream_interceptor(LoggingInterceptor::new("server-1"))
        .with_stream_interceptor(LoggingInterceptor::new("server-2"));
    server.run().await.context("server failed")?;

    Ok(())
}
