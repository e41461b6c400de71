//! Hello gRPC
//!
//! A greeting service that exercises all four gRPC call shapes, with
//! interceptor chains on both the client and the server and header/trailer
//! metadata flowing in both directions.
//!
//! # Architecture
//!
//! Handlers never talk to tonic directly. Every streaming call is driven
//! through a [`StreamHandle`], and interceptors decorate those handles so that
//! each individual send and receive can be observed:
//!
//! ```text
//! handler ──> [interceptor 1] ──> [interceptor 2] ──> transport handle ──> tonic
//!    send:      pre-hook 1          pre-hook 2          mpsc / Streaming
//!    recv:      post-hook 1 <────── post-hook 2 <────── message
//! ```
//!
//! The same nesting applies on the client, where the transport handle wraps a
//! raw `tonic::client::Grpc` streaming call, and to unary calls, where each
//! interceptor receives a single-use [`Next`] continuation.
//!
//! # Example Flow
//!
//! ```text
//! Client                                    Server
//! │                                           │
//! │  headers {type: stream, from: client}     │
//! │  HelloRequest{name: "Alice"}              │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │  headers {type: stream, from: server}     │
//! │       HelloResponse{"Hello, Alice!"}      │
//! │<───────────────────────────────────────── │
//! │                                           │
//! │  end of input                             │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │       trailers {received: 1}              │
//! │<───────────────────────────────────────── │
//! ```

#![allow(clippy::result_large_err)]

pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("myapp");

    /// Encoded file descriptor set, served through gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("greeting_descriptor");
}

pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod metadata;
pub mod server;
pub mod stream;

#[cfg(test)]
mod testing;

pub use call::{CallInfo, CallKind, Side};
pub use client::{ClientStream, GreeterClient, Reply};
pub use config::{ClientConfig, GreeterConfig, ServerConfig};
pub use error::{Error, ErrorKind, Result, StatusReport};
pub use handler::Greeter;
pub use interceptor::{
    LoggingInterceptor, MetadataInterceptor, Next, StreamChain, StreamInterceptor, StreamNext,
    UnaryChain, UnaryInterceptor,
};
pub use metadata::{TrailerSlot, TrailersLayer, WithTrailers};
pub use server::{GreeterServer, GreeterService};
pub use stream::{BoxStream, StreamHandle};

// Re-export proto types for convenience
pub use proto::{
    HelloRequest, HelloResponse, greeting_service_client::GreetingServiceClient,
    greeting_service_server::GreetingServiceServer,
};

/// Bound shared by every message that crosses an interceptor chain.
///
/// Logging needs `Debug`, handles move between tasks, and chains are held in
/// `Arc`s, hence the remaining bounds. Implemented for every qualifying type.
pub trait Payload: std::fmt::Debug + Send + Sync + 'static {}

impl<T> Payload for T where T: std::fmt::Debug + Send + Sync + 'static {}
