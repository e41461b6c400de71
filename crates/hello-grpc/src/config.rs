//! Server and client configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 8080;

/// Behaviour of the greeting handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreeterConfig {
    /// Responses sent by `HelloServerStream`.
    pub stream_count: usize,
    /// Wait after each `HelloServerStream` response.
    pub stream_interval: Duration,
    /// When set, `Hello` fails with code Unknown and this debug detail.
    pub failure_detail: Option<String>,
}

impl Default for GreeterConfig {
    fn default() -> Self {
        Self {
            stream_count: 5,
            stream_interval: Duration::from_secs(1),
            failure_detail: None,
        }
    }
}

/// gRPC server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// Responses buffered per streaming call before senders wait.
    pub channel_capacity: usize,
    /// Register the gRPC reflection service.
    pub reflection: bool,
    /// Handler behaviour.
    pub greeter: GreeterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            channel_capacity: 16,
            reflection: true,
            greeter: GreeterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address.
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    /// Keep the listen IP but change the port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.addr.set_port(port);
        self
    }

    /// Set the per-call response buffer.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable server reflection.
    pub fn reflection(mut self, enabled: bool) -> Self {
        self.config.reflection = enabled;
        self
    }

    /// Set the number of server-stream responses.
    pub fn stream_count(mut self, count: usize) -> Self {
        self.config.greeter.stream_count = count;
        self
    }

    /// Set the wait after each server-stream response.
    pub fn stream_interval(mut self, interval: Duration) -> Self {
        self.config.greeter.stream_interval = interval;
        self
    }

    /// Make `Hello` fail with the given debug detail.
    pub fn failure_detail(mut self, detail: impl Into<String>) -> Self {
        self.config.greeter.failure_detail = Some(detail.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// gRPC client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server URI, e.g. `http://localhost:8080`.
    pub endpoint: String,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Names read for each client-stream or bidi-stream call.
    pub names_per_stream: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("http://localhost:{DEFAULT_PORT}"),
            connect_timeout: Duration::from_secs(5),
            names_per_stream: 5,
        }
    }
}

impl ClientConfig {
    /// Create a new builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the server URI.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how many names each streaming call reads.
    pub fn names_per_stream(mut self, names: usize) -> Self {
        self.config.names_per_stream = names;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
