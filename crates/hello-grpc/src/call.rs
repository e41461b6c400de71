//! Call descriptors handed to interceptors.

use std::fmt;

/// Full path of the unary `Hello` method.
pub const HELLO: &str = "/myapp.GreetingService/Hello";
/// Full path of the server-streaming `HelloServerStream` method.
pub const HELLO_SERVER_STREAM: &str = "/myapp.GreetingService/HelloServerStream";
/// Full path of the client-streaming `HelloClientStream` method.
pub const HELLO_CLIENT_STREAM: &str = "/myapp.GreetingService/HelloClientStream";
/// Full path of the bidirectional `HelloBiStreams` method.
pub const HELLO_BI_STREAMS: &str = "/myapp.GreetingService/HelloBiStreams";

/// Shape of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// One request, one response.
    Unary,
    /// One request, many responses.
    ServerStreaming,
    /// Many requests, one response.
    ClientStreaming,
    /// Many requests and many responses.
    BidiStreaming,
}

/// Which end of the call an interceptor runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The side issuing the call.
    Client,
    /// The side handling the call.
    Server,
}

/// Static description of a single call, passed to every interceptor stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Full method path, e.g. `/myapp.GreetingService/Hello`.
    pub method: &'static str,
    /// Shape of the call.
    pub kind: CallKind,
    /// Side the call is observed from.
    pub side: Side,
}

impl CallInfo {
    /// Describe a call made by this process.
    pub fn client(method: &'static str, kind: CallKind) -> Self {
        Self {
            method,
            kind,
            side: Side::Client,
        }
    }

    /// Describe a call handled by this process.
    pub fn server(method: &'static str, kind: CallKind) -> Self {
        Self {
            method,
            kind,
            side: Side::Server,
        }
    }

    /// The bare method name, without the service prefix.
    pub fn method_name(&self) -> &'static str {
        self.method.rsplit('/').next().unwrap_or(self.method)
    }
}

impl fmt::Display for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method)
    }
}
