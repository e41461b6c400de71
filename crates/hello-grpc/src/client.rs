//! Client context for the GreetingService.
//!
//! [`GreeterClient`] drives every method through raw
//! [`tonic::client::Grpc`] streaming calls so that the client interceptor
//! chains see the same [`StreamHandle`] shape the server handlers use, and
//! so that unary calls can report header and trailer metadata separately.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use http::uri::PathAndQuery;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::{Codec, EncodeBuf, Encoder, ProstCodec};
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};

use crate::Payload;
use crate::call::{self, CallInfo, CallKind};
use crate::config::ClientConfig;
use crate::interceptor::{
    Next, OpenFuture, StreamChain, StreamInterceptor, StreamNext, UnaryChain, UnaryFuture,
    UnaryInterceptor,
};
use crate::metadata;
use crate::proto::{HelloRequest, HelloResponse};
use crate::stream::{BoxStream, StreamHandle, header_already_sent};

/// Client end of a streaming greeting call.
pub type ClientStream = BoxStream<HelloResponse, HelloRequest>;

/// Requests buffered ahead of the HTTP/2 body.
const OUTBOUND_CAPACITY: usize = 16;

/// A unary response with its header and trailer metadata.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    /// The response message.
    pub message: T,
    /// Header metadata sent by the server.
    pub header: MetadataMap,
    /// Trailer metadata sent by the server.
    pub trailer: MetadataMap,
}

impl<T> Reply<T> {
    /// Split a response whose trailers were recorded with
    /// [`metadata::set_trailers`].
    pub fn from_response(response: Response<T>) -> Self {
        let trailer = metadata::trailers(&response);
        let (header, message, _) = response.into_parts();
        Self {
            message,
            header,
            trailer,
        }
    }
}

/// Client context: a channel plus the client interceptor chains.
#[derive(Debug, Clone)]
pub struct GreeterClient {
    grpc: Grpc<Channel>,
    unary: UnaryChain<HelloRequest, HelloResponse>,
    streams: StreamChain<HelloResponse, HelloRequest>,
}

impl GreeterClient {
    /// Connect to `config.endpoint`.
    pub async fn connect(config: &ClientConfig) -> crate::Result<Self> {
        let channel = Endpoint::from_shared(config.endpoint.clone())?
            .connect_timeout(config.connect_timeout)
            .connect()
            .await?;
        tracing::debug!(endpoint = %config.endpoint, "connected");
        Ok(Self::new(channel))
    }

    /// Use an existing channel, without interceptors.
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: Grpc::new(channel),
            unary: UnaryChain::new(),
            streams: StreamChain::new(),
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
        S: StreamInterceptor<HelloResponse, HelloRequest> + 'static,
    {
        self.streams = self.streams.with(interceptor);
        self
    }

    /// Call `Hello`.
    pub async fn hello(
        &self,
        name: impl Into<String>,
        metadata: MetadataMap,
    ) -> Result<Reply<HelloResponse>, Status> {
        let mut request = Request::new(HelloRequest { name: name.into() });
        *request.metadata_mut() = metadata;

        let info = CallInfo::client(call::HELLO, CallKind::Unary);
        let grpc = self.grpc.clone();
        let terminal = Next::new(move |request| {
            Box::pin(unary_call(grpc, request)) as UnaryFuture<'_, HelloResponse>
        });
        let response = self.unary.call(&info, request, terminal).await?;
        Ok(Reply::from_response(response))
    }

    /// Call `HelloServerStream`: the request is sent and the send side closed,
    /// so the returned handle is only read from.
    pub async fn hello_server_stream(
        &self,
        name: impl Into<String>,
        metadata: MetadataMap,
    ) -> Result<ClientStream, Status> {
        let mut stream = self
            .open(call::HELLO_SERVER_STREAM, CallKind::ServerStreaming, metadata)
            .await?;
        stream.send(HelloRequest { name: name.into() }).await?;
        stream.close().await?;
        Ok(stream)
    }

    /// Open `HelloClientStream`. Send names, close, then receive the single
    /// response.
    pub async fn hello_client_stream(&self, metadata: MetadataMap) -> Result<ClientStream, Status> {
        self.open(call::HELLO_CLIENT_STREAM, CallKind::ClientStreaming, metadata)
            .await
    }

    /// Open `HelloBiStreams`.
    pub async fn hello_bi_streams(&self, metadata: MetadataMap) -> Result<ClientStream, Status> {
        self.open(call::HELLO_BI_STREAMS, CallKind::BidiStreaming, metadata)
            .await
    }

    async fn open(
        &self,
        method: &'static str,
        kind: CallKind,
        metadata: MetadataMap,
    ) -> Result<ClientStream, Status> {
        let info = CallInfo::client(method, kind);
        let transport = ClientTransport::new(self.grpc.clone(), method, metadata);
        let terminal = StreamNext::new(move || {
            Box::pin(futures::future::ready(Ok(Box::new(transport) as ClientStream)))
                as OpenFuture<'_, HelloResponse, HelloRequest>
        });
        self.streams.open(&info, terminal).await
    }
}

/// Run a unary call as a one-message stream, keeping the trailers.
async fn unary_call(
    mut grpc: Grpc<Channel>,
    request: Request<HelloRequest>,
) -> Result<Response<HelloResponse>, Status> {
    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;

    let (metadata, extensions, message) = request.into_parts();
    let request = Request::from_parts(metadata, extensions, tokio_stream::once(message));
    let response = grpc
        .streaming(
            request,
            PathAndQuery::from_static(call::HELLO),
            ProstCodec::<HelloRequest, HelloResponse>::default(),
        )
        .await?;

    let (header, mut inbound, _) = response.into_parts();
    let message = inbound
        .message()
        .await?
        .ok_or_else(|| Status::internal("missing response message"))?;
    if inbound.message().await?.is_some() {
        return Err(Status::internal("more than one response message"));
    }
    let trailer = inbound.trailers().await?.unwrap_or_default();

    let mut response = Response::new(message);
    *response.metadata_mut() = header;
    metadata::set_trailers(&mut response, trailer);
    Ok(response)
}

/// One item of a streaming request body.
enum Outbound<O> {
    Message(O),
    /// The handle went away without closing the send side.
    Abandoned,
}

/// Request body of a streaming call.
///
/// Ends cleanly only after [`StreamHandle::close`]. Otherwise the last item
/// is [`Outbound::Abandoned`], which [`OutboundCodec`] refuses to encode, so
/// the HTTP/2 stream is reset and the server sees an error instead of
/// end-of-input.
fn request_body<O: Payload>(
    messages: mpsc::Receiver<O>,
    closed: oneshot::Receiver<()>,
) -> impl Stream<Item = Outbound<O>> + Send + 'static {
    let abandoned = futures::stream::once(closed)
        .filter_map(|closed| async move { closed.is_err().then_some(Outbound::Abandoned) });
    ReceiverStream::new(messages)
        .map(Outbound::Message)
        .chain(abandoned)
}

/// [`ProstCodec`] for [`Outbound`] request bodies.
struct OutboundCodec<O, I> {
    inner: ProstCodec<O, I>,
}

impl<O, I> Default for OutboundCodec<O, I> {
    fn default() -> Self {
        Self {
            inner: ProstCodec::default(),
        }
    }
}

impl<O, I> Codec for OutboundCodec<O, I>
where
    O: prost::Message + Send + 'static,
    I: prost::Message + Default + Send + 'static,
{
    type Encode = Outbound<O>;
    type Decode = I;
    type Encoder = OutboundEncoder<<ProstCodec<O, I> as Codec>::Encoder>;
    type Decoder = <ProstCodec<O, I> as Codec>::Decoder;

    fn encoder(&mut self) -> Self::Encoder {
        OutboundEncoder(self.inner.encoder())
    }

    fn decoder(&mut self) -> Self::Decoder {
        self.inner.decoder()
    }
}

struct OutboundEncoder<E>(E);

impl<E> Encoder for OutboundEncoder<E>
where
    E: Encoder<Error = Status>,
{
    type Item = Outbound<E::Item>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        match item {
            Outbound::Message(message) => self.0.encode(message, dst),
            Outbound::Abandoned => Err(Status::cancelled("request stream dropped before close")),
        }
    }
}

/// Client end of a streaming call, backed by tonic.
///
/// The HTTP/2 call is started by the first send, receive, header read or
/// close, so outgoing header metadata can be added until then. It runs on
/// its own task because tonic only resolves the call once response headers
/// arrive, which for client streams is after every request has been sent.
///
/// Dropping the handle before [`close`](StreamHandle::close) cancels the call.
pub(crate) struct ClientTransport<I, O> {
    /// Present until the call starts.
    grpc: Option<Grpc<Channel>>,
    path: &'static str,
    header: MetadataMap,
    outbound: Option<mpsc::Sender<O>>,
    /// Signals a clean half-close to the request body.
    closed: Option<oneshot::Sender<()>>,
    call: Option<JoinHandle<Result<Response<Streaming<I>>, Status>>>,
    inbound: Option<Streaming<I>>,
    peer_header: MetadataMap,
    trailer: MetadataMap,
    failed: Option<Status>,
}

impl<I, O> ClientTransport<I, O>
where
    I: prost::Message + Default + Payload,
    O: prost::Message + Payload,
{
    pub(crate) fn new(grpc: Grpc<Channel>, path: &'static str, header: MetadataMap) -> Self {
        Self {
            grpc: Some(grpc),
            path,
            header,
            outbound: None,
            closed: None,
            call: None,
            inbound: None,
            peer_header: MetadataMap::new(),
            trailer: MetadataMap::new(),
            failed: None,
        }
    }

    fn start(&mut self) {
        let Some(mut grpc) = self.grpc.take() else {
            return;
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (closed_tx, closed_rx) = oneshot::channel();
        let mut request = Request::new(request_body(rx, closed_rx));
        *request.metadata_mut() = std::mem::take(&mut self.header);
        let path = PathAndQuery::from_static(self.path);

        self.outbound = Some(tx);
        self.closed = Some(closed_tx);
        self.call = Some(tokio::spawn(async move {
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
            grpc.streaming(request, path, OutboundCodec::<O, I>::default())
                .await
        }));
    }

    /// Wait for the response headers, once.
    async fn await_response(&mut self) -> Result<(), Status> {
        if let Some(status) = &self.failed {
            return Err(status.clone());
        }
        let Some(call) = self.call.as_mut() else {
            return Ok(());
        };
        let joined = call.await;
        self.call = None;

        let outcome = joined.unwrap_or_else(|e| Err(Status::cancelled(format!("call aborted: {e}"))));
        match outcome {
            Ok(response) => {
                let (header, inbound, _) = response.into_parts();
                self.peer_header = header;
                self.inbound = Some(inbound);
                Ok(())
            }
            Err(status) => Err(self.fail(status)),
        }
    }

    /// Record a terminal status. Its metadata is all the trailer there is.
    fn fail(&mut self, status: Status) -> Status {
        self.trailer = status.metadata().clone();
        self.failed = Some(status.clone());
        status
    }
}

#[async_trait]
impl<I, O> StreamHandle<I, O> for ClientTransport<I, O>
where
    I: prost::Message + Default + Payload,
    O: prost::Message + Payload,
{
    async fn send(&mut self, message: O) -> Result<(), Status> {
        self.start();
        let sent = match &self.outbound {
            Some(outbound) => outbound.send(message).await.is_ok(),
            None => return Err(Status::failed_precondition("send after close")),
        };
        if sent {
            return Ok(());
        }
        // The request body is gone, so the call has ended; report why.
        self.await_response().await?;
        Err(Status::unavailable("server closed the request stream"))
    }

    async fn recv(&mut self) -> Result<Option<I>, Status> {
        self.start();
        self.await_response().await?;
        let Some(inbound) = self.inbound.as_mut() else {
            return Err(Status::internal("call has no response stream"));
        };
        match inbound.message().await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => match inbound.trailers().await {
                Ok(trailer) => {
                    if let Some(trailer) = trailer {
                        self.trailer = trailer;
                    }
                    Ok(None)
                }
                Err(status) => Err(self.fail(status)),
            },
            Err(status) => Err(self.fail(status)),
        }
    }

    async fn close(&mut self) -> Result<(), Status> {
        self.start();
        // Mark the half-close before the body can observe the sender going away.
        if let Some(closed) = self.closed.take() {
            let _ = closed.send(());
        }
        self.outbound = None;
        Ok(())
    }

    async fn header(&mut self) -> Result<MetadataMap, Status> {
        self.start();
        self.await_response().await?;
        Ok(self.peer_header.clone())
    }

    fn trailer(&self) -> MetadataMap {
        self.trailer.clone()
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        if self.grpc.is_none() {
            return Err(header_already_sent());
        }
        metadata::merge(&mut self.header, metadata);
        Ok(())
    }

    fn set_trailer(&mut self, _metadata: MetadataMap) -> Result<(), Status> {
        Err(Status::unimplemented("clients cannot send trailer metadata"))
    }
}

impl<I, O> Drop for ClientTransport<I, O> {
    fn drop(&mut self) {
        if let Some(call) = &self.call {
            call.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lazy_grpc() -> Grpc<Channel> {
        // Nothing listens on port 1; calls fail once they start.
        Grpc::new(Channel::from_static("http://127.0.0.1:1").connect_lazy())
    }

    fn transport() -> ClientTransport<HelloResponse, HelloRequest> {
        ClientTransport::new(lazy_grpc(), call::HELLO_BI_STREAMS, MetadataMap::new())
    }

    #[test]
    fn test_reply_splits_header_and_trailer() {
        let mut response = Response::new(HelloResponse {
            message: "Hello, Alice!".to_string(),
        });
        *response.metadata_mut() = metadata::from_pairs(&[("type", "unary")]).unwrap();
        metadata::set_trailers(
            &mut response,
            metadata::from_pairs(&[("from", "server")]).unwrap(),
        );

        let reply = Reply::from_response(response);
        assert_eq!(reply.message.message, "Hello, Alice!");
        assert_eq!(metadata::get_str(&reply.header, "type"), Some("unary"));
        assert_eq!(metadata::get_str(&reply.header, "from"), None);
        assert_eq!(metadata::get_str(&reply.trailer, "from"), Some("server"));
    }

    #[tokio::test]
    async fn test_set_header_only_before_start() {
        let mut transport = transport();
        transport
            .set_header(metadata::from_pairs(&[("type", "stream")]).unwrap())
            .unwrap();
        assert_eq!(metadata::get_str(&transport.header, "type"), Some("stream"));

        transport.close().await.unwrap();
        let status = transport.set_header(MetadataMap::new()).unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_set_trailer_is_unimplemented() {
        let mut transport = transport();
        let status = transport.set_trailer(MetadataMap::new()).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_terminal_status_sticks() {
        let mut transport = transport();
        let mut status = Status::internal("stream reset");
        status
            .metadata_mut()
            .insert("from", "server".parse().unwrap());
        transport.fail(status);

        assert_eq!(metadata::get_str(&transport.trailer(), "from"), Some("server"));
        let status = transport.recv().await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        let status = transport.header().await.unwrap_err();
        assert_eq!(status.message(), "stream reset");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let mut transport = transport();
        transport.close().await.unwrap();
        let status = transport
            .send(HelloRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }
}
