//! Interceptor chains for unary and streaming calls.
//!
//! Both chains compose like nested scopes. Given interceptors `[I1, I2]`, the
//! first configured interceptor is the outermost: `I1`'s before-hook runs
//! before `I2`'s, and `I2`'s after-hook runs before `I1`'s.
//!
//! For unary calls each stage receives a [`Next`] continuation. For streams
//! each stage receives a [`StreamNext`] factory, opens the inner handle with it
//! and may return a decorated handle. The caller therefore drives the
//! outermost decoration, which delegates inwards down to the transport handle,
//! so every individual send and receive passes through every stage.
//!
//! Continuations are consumed by value, so a stage can invoke the rest of the
//! chain at most once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::Payload;
use crate::call::{CallInfo, Side};
use crate::metadata;
use crate::stream::{BoxStream, StreamHandle};

/// Future returned by a unary stage.
pub type UnaryFuture<'a, Resp> = BoxFuture<'a, Result<Response<Resp>, Status>>;

/// Future returned by a stream stage.
pub type OpenFuture<'a, I, O> = BoxFuture<'a, Result<BoxStream<I, O>, Status>>;

/// The remainder of a unary chain.
pub struct Next<'a, Req, Resp> {
    call: Box<dyn FnOnce(Request<Req>) -> UnaryFuture<'a, Resp> + Send + 'a>,
}

impl<'a, Req, Resp> Next<'a, Req, Resp> {
    /// Wrap the innermost invocation, or any further stage.
    pub fn new<F>(call: F) -> Self
    where
        F: FnOnce(Request<Req>) -> UnaryFuture<'a, Resp> + Send + 'a,
    {
        Self {
            call: Box::new(call),
        }
    }

    /// Invoke the rest of the chain.
    pub async fn run(self, request: Request<Req>) -> Result<Response<Resp>, Status> {
        (self.call)(request).await
    }
}

impl<Req, Resp> fmt::Debug for Next<'_, Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// A stage wrapped around every unary call.
pub trait UnaryInterceptor<Req, Resp>: Send + Sync {
    /// Observe or augment the call. Must run `next` exactly once and return
    /// its result unless transforming it is the stage's purpose.
    fn intercept<'a>(
        &'a self,
        info: &'a CallInfo,
        request: Request<Req>,
        next: Next<'a, Req, Resp>,
    ) -> UnaryFuture<'a, Resp>;
}

/// Ordered unary interceptors.
pub struct UnaryChain<Req, Resp> {
    interceptors: Vec<Arc<dyn UnaryInterceptor<Req, Resp>>>,
}

impl<Req: Payload, Resp: Payload> UnaryChain<Req, Resp> {
    /// An empty chain that calls straight through.
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor; it runs inside every interceptor added before.
    pub fn with<I>(mut self, interceptor: I) -> Self
    where
        I: UnaryInterceptor<Req, Resp> + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Number of configured interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `request` through every stage and finally `terminal`.
    pub async fn call<'a>(
        &'a self,
        info: &'a CallInfo,
        request: Request<Req>,
        terminal: Next<'a, Req, Resp>,
    ) -> Result<Response<Resp>, Status> {
        let next = self
            .interceptors
            .iter()
            .rev()
            .fold(terminal, |next, interceptor| {
                Next::new(move |request| interceptor.intercept(info, request, next))
            });
        next.run(request).await
    }
}

impl<Req: Payload, Resp: Payload> Default for UnaryChain<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for UnaryChain<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for UnaryChain<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryChain")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// The remainder of a stream chain: opens the inner handle.
pub struct StreamNext<'a, I, O> {
    open: Box<dyn FnOnce() -> OpenFuture<'a, I, O> + Send + 'a>,
}

impl<'a, I, O> StreamNext<'a, I, O> {
    /// Wrap the transport factory, or any further stage.
    pub fn new<F>(open: F) -> Self
    where
        F: FnOnce() -> OpenFuture<'a, I, O> + Send + 'a,
    {
        Self {
            open: Box::new(open),
        }
    }

    /// Open the inner handle.
    pub async fn run(self) -> Result<BoxStream<I, O>, Status> {
        (self.open)().await
    }
}

impl<I, O> fmt::Debug for StreamNext<'_, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamNext").finish_non_exhaustive()
    }
}

/// A stage wrapped around the creation of every stream handle.
pub trait StreamInterceptor<I, O>: Send + Sync {
    /// Open the inner handle through `next` exactly once and return it,
    /// usually decorated.
    fn intercept<'a>(&'a self, info: &'a CallInfo, next: StreamNext<'a, I, O>) -> OpenFuture<'a, I, O>;
}

/// Ordered stream interceptors.
pub struct StreamChain<I, O> {
    interceptors: Vec<Arc<dyn StreamInterceptor<I, O>>>,
}

impl<I: Payload, O: Payload> StreamChain<I, O> {
    /// An empty chain that returns the transport handle unchanged.
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor; its decoration sits inside every decoration
    /// added before.
    pub fn with<S>(mut self, interceptor: S) -> Self
    where
        S: StreamInterceptor<I, O> + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Number of configured interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Open a handle through every stage, `terminal` creating the transport.
    pub async fn open<'a>(
        &'a self,
        info: &'a CallInfo,
        terminal: StreamNext<'a, I, O>,
    ) -> Result<BoxStream<I, O>, Status> {
        let next = self
            .interceptors
            .iter()
            .rev()
            .fold(terminal, |next, interceptor| {
                StreamNext::new(move || interceptor.intercept(info, next))
            });
        next.run().await
    }
}

impl<I: Payload, O: Payload> Default for StreamChain<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for StreamChain<I, O> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<I, O> fmt::Debug for StreamChain<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChain")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Logs every call, and every message on streams, at INFO.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    name: Arc<str>,
}

impl LoggingInterceptor {
    /// Create a logging interceptor identified by `name` in its log lines.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

impl<Req: Payload, Resp: Payload> UnaryInterceptor<Req, Resp> for LoggingInterceptor {
    fn intercept<'a>(
        &'a self,
        info: &'a CallInfo,
        request: Request<Req>,
        next: Next<'a, Req, Resp>,
    ) -> UnaryFuture<'a, Resp> {
        Box::pin(async move {
            info!(
                interceptor = %self.name,
                method = info.method_name(),
                request = ?request.get_ref(),
                "[pre] unary call"
            );
            let result = next.run(request).await;
            match &result {
                Ok(response) => info!(
                    interceptor = %self.name,
                    method = info.method_name(),
                    response = ?response.get_ref(),
                    "[post] unary call"
                ),
                Err(status) => info!(
                    interceptor = %self.name,
                    method = info.method_name(),
                    code = ?status.code(),
                    message = status.message(),
                    "[post] unary call failed"
                ),
            }
            result
        })
    }
}

impl<I: Payload, O: Payload> StreamInterceptor<I, O> for LoggingInterceptor {
    fn intercept<'a>(&'a self, info: &'a CallInfo, next: StreamNext<'a, I, O>) -> OpenFuture<'a, I, O> {
        Box::pin(async move {
            info!(interceptor = %self.name, method = info.method_name(), "[pre stream] opening");
            let inner = next.run().await?;
            Ok(Box::new(LoggedStream {
                name: Arc::clone(&self.name),
                method: info.method_name(),
                inner,
            }) as BoxStream<I, O>)
        })
    }
}

/// Handle decoration installed by [`LoggingInterceptor`].
struct LoggedStream<I, O> {
    name: Arc<str>,
    method: &'static str,
    inner: BoxStream<I, O>,
}

#[async_trait]
impl<I: Payload, O: Payload> StreamHandle<I, O> for LoggedStream<I, O> {
    async fn send(&mut self, message: O) -> Result<(), Status> {
        info!(interceptor = %self.name, method = self.method, message = ?message, "[pre message] send");
        self.inner.send(message).await
    }

    async fn recv(&mut self) -> Result<Option<I>, Status> {
        let received = self.inner.recv().await;
        // End-of-input passes through silently.
        if let Ok(Some(message)) = &received {
            info!(interceptor = %self.name, method = self.method, message = ?message, "[post message] recv");
        }
        received
    }

    async fn close(&mut self) -> Result<(), Status> {
        let result = self.inner.close().await;
        info!(interceptor = %self.name, method = self.method, ok = result.is_ok(), "[post stream] closed");
        result
    }

    async fn finish(&mut self, outcome: Result<(), Status>) -> Result<(), Status> {
        let result = self.inner.finish(outcome).await;
        match &result {
            Ok(()) => info!(interceptor = %self.name, method = self.method, "[post stream] finished"),
            Err(status) => info!(
                interceptor = %self.name,
                method = self.method,
                code = ?status.code(),
                message = status.message(),
                "[post stream] failed"
            ),
        }
        result
    }

    async fn header(&mut self) -> Result<MetadataMap, Status> {
        self.inner.header().await
    }

    fn trailer(&self) -> MetadataMap {
        self.inner.trailer()
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.set_header(metadata)
    }

    fn set_trailer(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.set_trailer(metadata)
    }
}

/// Stamps fixed entries onto the metadata the local side sends.
///
/// Clients stamp the request metadata, servers the response header. On
/// streams the entries go through [`StreamHandle::set_header`] right after the
/// handle is opened.
#[derive(Debug, Clone)]
pub struct MetadataInterceptor {
    metadata: MetadataMap,
}

impl MetadataInterceptor {
    /// Stamp the given entries on every call.
    pub fn new(metadata: MetadataMap) -> Self {
        Self { metadata }
    }

    /// Build from ASCII key/value pairs.
    pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> crate::Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(Self::new(metadata::from_pairs(pairs)?))
    }
}

impl<Req: Payload, Resp: Payload> UnaryInterceptor<Req, Resp> for MetadataInterceptor {
    fn intercept<'a>(
        &'a self,
        info: &'a CallInfo,
        mut request: Request<Req>,
        next: Next<'a, Req, Resp>,
    ) -> UnaryFuture<'a, Resp> {
        Box::pin(async move {
            match info.side {
                Side::Client => {
                    metadata::merge(request.metadata_mut(), self.metadata.clone());
                    next.run(request).await
                }
                Side::Server => {
                    let mut response = next.run(request).await?;
                    metadata::merge(response.metadata_mut(), self.metadata.clone());
                    Ok(response)
                }
            }
        })
    }
}

impl<I: Payload, O: Payload> StreamInterceptor<I, O> for MetadataInterceptor {
    fn intercept<'a>(&'a self, _info: &'a CallInfo, next: StreamNext<'a, I, O>) -> OpenFuture<'a, I, O> {
        Box::pin(async move {
            let mut stream = next.run().await?;
            stream.set_header(self.metadata.clone())?;
            Ok(stream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::call::CallKind;
    use crate::testing::MemoryStream;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records hook invocations into a shared log.
    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
            }
        }
    }

    impl UnaryInterceptor<String, String> for Recorder {
        fn intercept<'a>(
            &'a self,
            _info: &'a CallInfo,
            request: Request<String>,
            next: Next<'a, String, String>,
        ) -> UnaryFuture<'a, String> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:before", self.name));
                let result = next.run(request).await;
                self.log.lock().push(format!("{}:after", self.name));
                result
            })
        }
    }

    impl StreamInterceptor<String, String> for Recorder {
        fn intercept<'a>(
            &'a self,
            _info: &'a CallInfo,
            next: StreamNext<'a, String, String>,
        ) -> OpenFuture<'a, String, String> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:open", self.name));
                let inner = next.run().await?;
                Ok(Box::new(RecordedStream {
                    name: self.name,
                    log: Arc::clone(&self.log),
                    inner,
                }) as BoxStream<String, String>)
            })
        }
    }

    struct RecordedStream {
        name: &'static str,
        log: Log,
        inner: BoxStream<String, String>,
    }

    #[async_trait]
    impl StreamHandle<String, String> for RecordedStream {
        async fn send(&mut self, message: String) -> Result<(), Status> {
            self.log.lock().push(format!("{}:send", self.name));
            self.inner.send(message).await
        }

        async fn recv(&mut self) -> Result<Option<String>, Status> {
            let received = self.inner.recv().await;
            if let Ok(Some(_)) = &received {
                self.log.lock().push(format!("{}:recv", self.name));
            }
            received
        }

        async fn close(&mut self) -> Result<(), Status> {
            let result = self.inner.close().await;
            self.log.lock().push(format!("{}:close", self.name));
            result
        }

        async fn finish(&mut self, outcome: Result<(), Status>) -> Result<(), Status> {
            let result = self.inner.finish(outcome).await;
            self.log.lock().push(format!("{}:finish", self.name));
            result
        }

        async fn header(&mut self) -> Result<MetadataMap, Status> {
            self.inner.header().await
        }

        fn trailer(&self) -> MetadataMap {
            self.inner.trailer()
        }

        fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
            self.inner.set_header(metadata)
        }

        fn set_trailer(&mut self, metadata: MetadataMap) -> Result<(), Status> {
            self.inner.set_trailer(metadata)
        }
    }

    fn unary_info(side: Side) -> CallInfo {
        CallInfo {
            method: crate::call::HELLO,
            kind: CallKind::Unary,
            side,
        }
    }

    fn echo_terminal<'a>(log: &'a Log, calls: &'a AtomicUsize) -> Next<'a, String, String> {
        Next::new(move |request: Request<String>| {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                log.lock().push("handler".to_string());
                Ok(Response::new(format!("echo {}", request.into_inner())))
            })
        })
    }

    #[tokio::test]
    async fn test_unary_onion_order() {
        let log = Log::default();
        let calls = AtomicUsize::new(0);
        let chain = UnaryChain::new()
            .with(Recorder::new("i1", &log))
            .with(Recorder::new("i2", &log));
        let info = unary_info(Side::Server);

        let response = chain
            .call(&info, Request::new("x".to_string()), echo_terminal(&log, &calls))
            .await
            .unwrap();

        assert_eq!(response.into_inner(), "echo x");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *log.lock(),
            vec!["i1:before", "i2:before", "handler", "i2:after", "i1:after"]
        );
    }

    #[tokio::test]
    async fn test_unary_empty_chain_calls_through() {
        let log = Log::default();
        let calls = AtomicUsize::new(0);
        let chain = UnaryChain::<String, String>::new();
        assert!(chain.is_empty());

        let info = unary_info(Side::Client);
        let response = chain
            .call(&info, Request::new("y".to_string()), echo_terminal(&log, &calls))
            .await
            .unwrap();
        assert_eq!(response.into_inner(), "echo y");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unary_errors_pass_through_unchanged() {
        let chain = UnaryChain::new()
            .with(LoggingInterceptor::new("log"))
            .with(LoggingInterceptor::new("log-2"));
        let info = unary_info(Side::Server);
        let terminal = Next::new(|_request: Request<String>| {
            Box::pin(async { Err::<Response<String>, _>(Status::not_found("gone")) })
                as UnaryFuture<'_, String>
        });

        let status = chain
            .call(&info, Request::new("z".to_string()), terminal)
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "gone");
    }

    #[tokio::test]
    async fn test_unary_metadata_interceptor_sides() {
        let stamp = MetadataInterceptor::from_pairs(&[("from", "client")]).unwrap();
        let chain = UnaryChain::<String, String>::new().with(stamp.clone());

        // Client side: the request carries the stamp into the terminal.
        let info = unary_info(Side::Client);
        let terminal = Next::new(|request: Request<String>| {
            Box::pin(async move {
                let from = metadata::get_str(request.metadata(), "from").map(str::to_string);
                Ok(Response::new(from.unwrap_or_default()))
            }) as UnaryFuture<'_, String>
        });
        let response = chain
            .call(&info, Request::new(String::new()), terminal)
            .await
            .unwrap();
        assert_eq!(response.get_ref(), "client");

        // Server side: the response header carries the stamp.
        let info = unary_info(Side::Server);
        let terminal = Next::new(|_request: Request<String>| {
            Box::pin(async { Ok(Response::new(String::new())) }) as UnaryFuture<'_, String>
        });
        let response = chain
            .call(&info, Request::new(String::new()), terminal)
            .await
            .unwrap();
        assert_eq!(metadata::get_str(response.metadata(), "from"), Some("client"));
    }

    fn stream_info() -> CallInfo {
        CallInfo::client(crate::call::HELLO_BI_STREAMS, CallKind::BidiStreaming)
    }

    fn memory_terminal<'a>(
        stream: MemoryStream<String, String>,
        opened: &'a AtomicUsize,
    ) -> StreamNext<'a, String, String> {
        StreamNext::new(move || {
            Box::pin(async move {
                opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(stream) as BoxStream<String, String>)
            })
        })
    }

    #[tokio::test]
    async fn test_stream_onion_order() {
        let log = Log::default();
        let opened = AtomicUsize::new(0);
        let chain = StreamChain::new()
            .with(Recorder::new("i1", &log))
            .with(Recorder::new("i2", &log));
        let memory = MemoryStream::new(vec!["a".to_string()]);
        let sent = memory.sent();
        let info = stream_info();

        let mut stream = chain
            .open(&info, memory_terminal(memory, &opened))
            .await
            .unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        stream.send("hello".to_string()).await.unwrap();
        assert_eq!(stream.recv().await.unwrap().as_deref(), Some("a"));
        // End-of-input is forwarded and not recorded.
        assert_eq!(stream.recv().await.unwrap(), None);
        stream.close().await.unwrap();

        assert_eq!(*sent.lock(), vec!["hello"]);
        assert_eq!(
            *log.lock(),
            vec![
                "i1:open", "i2:open", "i1:send", "i2:send", "i2:recv", "i1:recv", "i2:close",
                "i1:close",
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_finish_runs_after_hooks_on_failure() {
        let log = Log::default();
        let opened = AtomicUsize::new(0);
        let chain = StreamChain::new()
            .with(Recorder::new("i1", &log))
            .with(LoggingInterceptor::new("log"))
            .with(Recorder::new("i2", &log));
        let memory = MemoryStream::<String, String>::new(Vec::new());
        let closed = memory.closed();
        let info = stream_info();

        let mut stream = chain
            .open(&info, memory_terminal(memory, &opened))
            .await
            .unwrap();
        let status = stream
            .finish(Err(Status::invalid_argument("no name")))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(status.message(), "no name");
        // A failed call is not closed successfully.
        assert!(!closed.load(Ordering::SeqCst));
        assert_eq!(
            *log.lock(),
            vec!["i1:open", "i2:open", "i2:finish", "i1:finish"]
        );
    }

    #[tokio::test]
    async fn test_stream_finish_closes_on_success() {
        let log = Log::default();
        let opened = AtomicUsize::new(0);
        let chain = StreamChain::new().with(Recorder::new("i1", &log));
        let memory = MemoryStream::<String, String>::new(Vec::new());
        let closed = memory.closed();
        let info = stream_info();

        let mut stream = chain
            .open(&info, memory_terminal(memory, &opened))
            .await
            .unwrap();
        stream.finish(Ok(())).await.unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(*log.lock(), vec!["i1:open", "i1:finish"]);
    }

    #[tokio::test]
    async fn test_stream_errors_pass_through() {
        let chain = StreamChain::new().with(LoggingInterceptor::new("log"));
        let opened = AtomicUsize::new(0);
        let memory = MemoryStream::<String, String>::failing(Status::aborted("dropped"));
        let info = stream_info();

        let mut stream = chain
            .open(&info, memory_terminal(memory, &opened))
            .await
            .unwrap();
        let status = stream.recv().await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Aborted);
        let status = stream.send("x".to_string()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Aborted);
    }

    #[tokio::test]
    async fn test_stream_open_failure_propagates() {
        let chain = StreamChain::<String, String>::new()
            .with(LoggingInterceptor::new("outer"))
            .with(MetadataInterceptor::from_pairs(&[("k", "v")]).unwrap());
        let info = stream_info();
        let terminal = StreamNext::new(|| {
            Box::pin(async { Err(Status::unavailable("no route")) }) as OpenFuture<'_, String, String>
        });

        let status = chain.open(&info, terminal).await.err().unwrap();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_stream_metadata_interceptor_sets_header() {
        let chain = StreamChain::new()
            .with(LoggingInterceptor::new("log"))
            .with(MetadataInterceptor::from_pairs(&[("from", "client")]).unwrap());
        let opened = AtomicUsize::new(0);
        let memory = MemoryStream::<String, String>::new(Vec::new());
        let outgoing = memory.outgoing_header();
        let info = stream_info();

        let _stream = chain
            .open(&info, memory_terminal(memory, &opened))
            .await
            .unwrap();
        assert_eq!(metadata::get_str(&outgoing.lock(), "from"), Some("client"));
    }
}
