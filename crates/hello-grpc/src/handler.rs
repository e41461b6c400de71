//! The greeting handlers.
//!
//! These contain the business logic of the four RPCs and nothing else: they
//! see tonic requests for the unary call and [`StreamHandle`]s for the
//! streaming ones, never the transport.

use std::sync::Arc;

use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::config::GreeterConfig;
use crate::error::unknown_failure;
use crate::metadata;
use crate::proto::{HelloRequest, HelloResponse};
use crate::stream::StreamHandle;

/// Server-side handle type the streaming handlers run against.
pub type ServerStream = dyn StreamHandle<HelloRequest, HelloResponse>;

/// Implements `GreetingService`.
#[derive(Debug, Clone, Default)]
pub struct Greeter {
    config: Arc<GreeterConfig>,
}

impl Greeter {
    /// Create a greeter with the given behaviour.
    pub fn new(config: GreeterConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// `Hello`: one greeting, or the configured failure.
    pub async fn hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        if let Some(detail) = &self.config.failure_detail {
            return Err(unknown_failure(detail.as_str()));
        }

        let request_type = metadata::get_str(request.metadata(), "type")
            .unwrap_or("none")
            .to_string();
        let name = request.into_inner().name;

        let mut response = Response::new(HelloResponse {
            message: greeting(&name),
        });
        *response.metadata_mut() = metadata::from_pairs(&[
            ("type", "unary"),
            ("from", "server"),
            ("request-type", request_type.as_str()),
        ])?;
        metadata::set_trailers(
            &mut response,
            metadata::from_pairs(&[("type", "unary"), ("from", "server")])?,
        );
        Ok(response)
    }

    /// `HelloServerStream`: `stream_count` numbered greetings, paced by
    /// `stream_interval`.
    pub async fn hello_server_stream(&self, stream: &mut ServerStream) -> Result<(), Status> {
        let request = stream
            .recv()
            .await?
            .ok_or_else(|| Status::invalid_argument("missing HelloRequest"))?;

        for i in 0..self.config.stream_count {
            stream
                .send(HelloResponse {
                    message: format!("Hello, {}! [{}]", request.name, i),
                })
                .await?;
            tokio::time::sleep(self.config.stream_interval).await;
        }
        Ok(())
    }

    /// `HelloClientStream`: collect names until end-of-input, then answer once.
    pub async fn hello_client_stream(&self, stream: &mut ServerStream) -> Result<(), Status> {
        let mut names = Vec::new();
        while let Some(request) = stream.recv().await? {
            names.push(request.name);
        }
        stream
            .send(HelloResponse {
                message: aggregate_greeting(&names),
            })
            .await
    }

    /// `HelloBiStreams`: echo one greeting per request.
    pub async fn hello_bi_streams(&self, stream: &mut ServerStream) -> Result<(), Status> {
        let inbound = stream.header().await?;
        let request_type = metadata::get_str(&inbound, "type").unwrap_or("none");
        stream.set_header(metadata::from_pairs(&[
            ("type", "stream"),
            ("from", "server"),
            ("request-type", request_type),
        ])?)?;

        let mut received = 0usize;
        while let Some(request) = stream.recv().await? {
            received += 1;
            tracing::info!(name = %request.name, "received");
            stream
                .send(HelloResponse {
                    message: greeting(&request.name),
                })
                .await?;
        }

        stream.set_trailer(trailer_for_stream(received)?)?;
        Ok(())
    }
}

fn trailer_for_stream(received: usize) -> crate::Result<MetadataMap> {
    let received = received.to_string();
    metadata::from_pairs(&[
        ("type", "stream"),
        ("from", "server"),
        ("received", received.as_str()),
    ])
}

/// `Hello, {name}!`
pub fn greeting(name: &str) -> String {
    format!("Hello, {name}!")
}

/// Greeting for a batch of names: `Hello, [A B C]!`.
pub fn aggregate_greeting(names: &[String]) -> String {
    format!("Hello, [{}]!", names.join(" "))
}
