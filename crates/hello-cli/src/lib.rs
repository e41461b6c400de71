//! Interactive client for the greeting service.
//!
//! The binary connects once, installs the client interceptor chains and then
//! hands stdin and stdout to a [`Repl`].

mod repl;

pub use repl::{MenuChoice, Repl};

use hello_grpc::{ClientConfig, GreeterClient, LoggingInterceptor, MetadataInterceptor};

/// Install the client chains: logging outermost, then the `from: client`
/// stamp.
pub fn with_client_chains(client: GreeterClient) -> hello_grpc::Result<GreeterClient> {
    let stamp = MetadataInterceptor::from_pairs(&[("from", "client")])?;
    Ok(client
        .with_unary_interceptor(LoggingInterceptor::new("client"))
        .with_unary_interceptor(stamp.clone())
        .with_stream_interceptor(LoggingInterceptor::new("client"))
        .with_stream_interceptor(stamp))
}

/// Connect to `config.endpoint` with the client chains installed.
pub async fn connect(config: &ClientConfig) -> hello_grpc::Result<GreeterClient> {
    with_client_chains(GreeterClient::connect(config).await?)
}
