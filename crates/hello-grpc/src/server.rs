//! gRPC server implementation for the GreetingService.
//!
//! Unary calls run the handler inline behind the unary chain. Each streaming
//! call gets its own task that opens a [`ServerTransport`] through the stream
//! chain and hands the decorated handle to the handler, while tonic drains the
//! response channel.

use std::future::Future;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};
use tower::Layer;

use crate::Payload;
use crate::call::{self, CallInfo, CallKind};
use crate::config::ServerConfig;
use crate::handler::{Greeter, ServerStream};
use crate::interceptor::{
    Next, OpenFuture, StreamChain, StreamInterceptor, StreamNext, UnaryChain, UnaryFuture,
    UnaryInterceptor,
};
use crate::metadata::{self, TrailerSlot, TrailersLayer, WithTrailers};
use crate::proto::{self, HelloRequest, HelloResponse};
use crate::stream::{BoxStream, StreamHandle, header_already_sent};

/// Response stream type of both server-streaming methods.
pub type ResponseStream = ReceiverStream<Result<HelloResponse, Status>>;

/// The GreetingService gRPC service implementation.
#[derive(Clone, Debug)]
pub struct GreeterService {
    greeter: Greeter,
    unary: UnaryChain<HelloRequest, HelloResponse>,
    streams: StreamChain<HelloRequest, HelloResponse>,
    channel_capacity: usize,
}

impl GreeterService {
    /// Create a service without interceptors.
    pub fn new(greeter: Greeter) -> Self {
        Self {
            greeter,
            unary: UnaryChain::new(),
            streams: StreamChain::new(),
            channel_capacity: ServerConfig::default().channel_capacity,
        }
    }

    /// Append a unary interceptor.
    pub fn with_unary_interceptor<U>(mut self, interceptor: U) -> Self
    where
        U: UnaryInterceptor<HelloRequest, HelloResponse> + 'static,
    {
        self.unary = self.unary.with(interceptor);
        self
    }

    /// Append a stream interceptor.
    pub fn with_stream_interceptor<S>(mut self, interceptor: S) -> Self
    where
        S: StreamInterceptor<HelloRequest, HelloResponse> + 'static,
    {
        self.streams = self.streams.with(interceptor);
        self
    }

    /// Set how many responses each streaming call buffers.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Start a streaming call and wait until its header is ready.
    async fn open_stream(
        &self,
        method: StreamMethod,
        metadata: MetadataMap,
        inbound: Inbound<HelloRequest>,
    ) -> Result<OpenCall, Status> {
        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let (header_tx, header_rx) = oneshot::channel();
        let trailers = TrailerSlot::new();

        let transport = ServerTransport {
            metadata,
            inbound,
            outbound: Some(tx.clone()),
            header: MetadataMap::new(),
            header_tx: Some(header_tx),
            trailers: trailers.clone(),
        };

        let greeter = self.greeter.clone();
        let streams = self.streams.clone();
        tokio::spawn(async move {
            let info = method.info();
            let outcome = run_call(&greeter, &streams, &info, method, transport, tx.closed()).await;
            match outcome {
                Ok(()) => tracing::debug!(method = info.method, "call completed"),
                Err(status) => {
                    tracing::warn!(
                        method = info.method,
                        code = ?status.code(),
                        message = status.message(),
                        "call failed"
                    );
                    // Nobody is listening once the client has gone.
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        match header_rx.await {
            Ok(header) => Ok(OpenCall {
                header,
                responses: rx,
                trailers,
            }),
            // The handler failed before anything was sent.
            Err(_) => match rx.recv().await {
                Some(Err(status)) => Err(with_trailers(status, &trailers)),
                _ => Err(Status::internal("call ended before sending a header")),
            },
        }
    }
}

#[tonic::async_trait]
impl proto::greeting_service_server::GreetingService for GreeterService {
    type HelloServerStreamStream = ResponseStream;
    type HelloBiStreamsStream = ResponseStream;

    async fn hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        let info = CallInfo::server(call::HELLO, CallKind::Unary);
        let greeter = &self.greeter;
        let terminal = Next::new(move |request| {
            Box::pin(greeter.hello(request)) as UnaryFuture<'_, HelloResponse>
        });
        self.unary.call(&info, request, terminal).await
    }

    async fn hello_server_stream(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<Self::HelloServerStreamStream>, Status> {
        let (metadata, _, message) = request.into_parts();
        let call = self
            .open_stream(
                StreamMethod::ServerStream,
                metadata,
                Inbound::Single(Some(message)),
            )
            .await?;
        Ok(call.into_stream_response())
    }

    async fn hello_client_stream(
        &self,
        request: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<HelloResponse>, Status> {
        let (metadata, _, inbound) = request.into_parts();
        let call = self
            .open_stream(
                StreamMethod::ClientStream,
                metadata,
                Inbound::Streaming(inbound),
            )
            .await?;
        call.into_unary_response().await
    }

    async fn hello_bi_streams(
        &self,
        request: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<Self::HelloBiStreamsStream>, Status> {
        let (metadata, _, inbound) = request.into_parts();
        let call = self
            .open_stream(
                StreamMethod::BiStreams,
                metadata,
                Inbound::Streaming(inbound),
            )
            .await?;
        Ok(call.into_stream_response())
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamMethod {
    ServerStream,
    ClientStream,
    BiStreams,
}

impl StreamMethod {
    fn info(self) -> CallInfo {
        match self {
            Self::ServerStream => {
                CallInfo::server(call::HELLO_SERVER_STREAM, CallKind::ServerStreaming)
            }
            Self::ClientStream => {
                CallInfo::server(call::HELLO_CLIENT_STREAM, CallKind::ClientStreaming)
            }
            Self::BiStreams => CallInfo::server(call::HELLO_BI_STREAMS, CallKind::BidiStreaming),
        }
    }
}

/// Open the call through the stream chain and run the handler on it.
///
/// The handler stops as soon as `cancelled` completes. Either way the
/// decorated handle is finished with the outcome, so every stage's after-hook
/// runs once.
async fn run_call(
    greeter: &Greeter,
    streams: &StreamChain<HelloRequest, HelloResponse>,
    info: &CallInfo,
    method: StreamMethod,
    transport: ServerTransport<HelloRequest, HelloResponse>,
    cancelled: impl Future<Output = ()>,
) -> Result<(), Status> {
    let terminal = StreamNext::new(move || {
        Box::pin(futures::future::ready(Ok(
            Box::new(transport) as BoxStream<HelloRequest, HelloResponse>
        ))) as OpenFuture<'_, HelloRequest, HelloResponse>
    });
    let mut stream = streams.open(info, terminal).await?;

    let outcome = tokio::select! {
        outcome = run_handler(greeter, method, &mut *stream) => outcome,
        () = cancelled => Err(Status::cancelled("call cancelled by client")),
    };
    stream.finish(outcome).await
}

async fn run_handler(
    greeter: &Greeter,
    method: StreamMethod,
    stream: &mut ServerStream,
) -> Result<(), Status> {
    match method {
        StreamMethod::ServerStream => greeter.hello_server_stream(stream).await,
        StreamMethod::ClientStream => greeter.hello_client_stream(stream).await,
        StreamMethod::BiStreams => greeter.hello_bi_streams(stream).await,
    }
}

/// Copy the trailers written so far into an error status.
fn with_trailers(mut status: Status, trailers: &TrailerSlot) -> Status {
    metadata::merge(status.metadata_mut(), trailers.get());
    status
}

/// A streaming call whose header has been produced.
struct OpenCall {
    header: MetadataMap,
    responses: mpsc::Receiver<Result<HelloResponse, Status>>,
    trailers: TrailerSlot,
}

impl OpenCall {
    fn into_stream_response(self) -> Response<ResponseStream> {
        let mut response = Response::new(ReceiverStream::new(self.responses));
        *response.metadata_mut() = self.header;
        response.extensions_mut().insert(self.trailers);
        response
    }

    /// Collapse the response channel into the single response of a
    /// client-streaming call.
    async fn into_unary_response(mut self) -> Result<Response<HelloResponse>, Status> {
        let mut message = None;
        while let Some(item) = self.responses.recv().await {
            let item = item.map_err(|status| with_trailers(status, &self.trailers))?;
            if message.replace(item).is_some() {
                return Err(Status::internal("handler sent more than one response"));
            }
        }
        let message =
            message.ok_or_else(|| Status::internal("handler finished without a response"))?;

        let mut response = Response::new(message);
        *response.metadata_mut() = self.header;
        response.extensions_mut().insert(self.trailers);
        Ok(response)
    }
}

enum Inbound<I> {
    /// The request of a server-streaming call, taken on first receive.
    Single(Option<I>),
    Streaming(Streaming<I>),
}

/// Server end of a streaming call, backed by tonic.
///
/// The header is held back until the first send or close, so handlers and
/// interceptors can add entries until then.
pub(crate) struct ServerTransport<I, O> {
    metadata: MetadataMap,
    inbound: Inbound<I>,
    outbound: Option<mpsc::Sender<Result<O, Status>>>,
    header: MetadataMap,
    header_tx: Option<oneshot::Sender<MetadataMap>>,
    trailers: TrailerSlot,
}

impl<I, O> ServerTransport<I, O> {
    fn flush_header(&mut self) {
        if let Some(header_tx) = self.header_tx.take() {
            let _ = header_tx.send(std::mem::take(&mut self.header));
        }
    }
}

#[async_trait]
impl<I: Payload, O: Payload> StreamHandle<I, O> for ServerTransport<I, O> {
    async fn send(&mut self, message: O) -> Result<(), Status> {
        self.flush_header();
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| Status::failed_precondition("send after close"))?;
        outbound
            .send(Ok(message))
            .await
            .map_err(|_| Status::cancelled("client cancelled the call"))
    }

    async fn recv(&mut self) -> Result<Option<I>, Status> {
        match &mut self.inbound {
            Inbound::Single(message) => Ok(message.take()),
            Inbound::Streaming(stream) => stream.message().await,
        }
    }

    async fn close(&mut self) -> Result<(), Status> {
        self.flush_header();
        self.outbound = None;
        Ok(())
    }

    async fn finish(&mut self, outcome: Result<(), Status>) -> Result<(), Status> {
        match outcome {
            Ok(()) => self.close().await,
            Err(status) => {
                // A header that never went out lets the status travel as a
                // trailers-only response.
                self.header_tx = None;
                self.outbound = None;
                Err(status)
            }
        }
    }

    async fn header(&mut self) -> Result<MetadataMap, Status> {
        Ok(self.metadata.clone())
    }

    fn trailer(&self) -> MetadataMap {
        MetadataMap::new()
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        if self.header_tx.is_none() {
            return Err(header_already_sent());
        }
        metadata::merge(&mut self.header, metadata);
        Ok(())
    }

    fn set_trailer(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.trailers.merge(metadata);
        Ok(())
    }
}

/// The service stack handed to tonic.
pub type GreeterGrpcService =
    WithTrailers<proto::greeting_service_server::GreetingServiceServer<GreeterService>>;

/// Server configuration and runner.
#[derive(Debug)]
pub struct GreeterServer {
    config: ServerConfig,
    service: GreeterService,
}

impl GreeterServer {
    /// Create a server without interceptors.
    pub fn new(config: ServerConfig) -> Self {
        let service = GreeterService::new(Greeter::new(config.greeter.clone()))
            .channel_capacity(config.channel_capacity);
        Self { config, service }
    }

    /// Append a unary interceptor.
    pub fn with_unary_interceptor<U>(mut self, interceptor: U) -> Self
    where
        U: UnaryInterceptor<HelloRequest, HelloResponse> + 'static,
    {
        self.service = self.service.with_unary_interceptor(interceptor);
        self
    }

    /// Append a stream interceptor.
    pub fn with_stream_interceptor<S>(mut self, interceptor: S) -> Self
    where
        S: StreamInterceptor<HelloRequest, HelloResponse> + 'static,
    {
        self.service = self.service.with_stream_interceptor(interceptor);
        self
    }

    /// The greeting service wrapped in the trailers middleware.
    pub fn service(&self) -> GreeterGrpcService {
        TrailersLayer.layer(proto::greeting_service_server::GreetingServiceServer::new(
            self.service.clone(),
        ))
    }

    /// Run the server until shutdown signal.
    pub async fn run(self) -> crate::Result<()> {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve_with_listener(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            unary_interceptors = self.service.unary.len(),
            stream_interceptors = self.service.streams.len(),
            "Starting gRPC server on {}",
            listener.local_addr()?
        );

        let reflection = if self.config.reflection {
            Some(
                tonic_reflection::server::Builder::configure()
                    .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
                    .build_v1()?,
            )
        } else {
            None
        };

        tonic::transport::Server::builder()
            .add_service(self.service())
            .add_optional_service(reflection)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;

        tracing::info!("gRPC server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
