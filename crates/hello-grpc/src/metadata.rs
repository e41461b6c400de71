//! Header and trailer metadata helpers.
//!
//! Headers ride on tonic's `Request`/`Response` metadata directly. Trailers
//! need more help on the server: tonic only emits `grpc-status` and friends in
//! the trailers frame, so handlers stash custom trailers in a [`TrailerSlot`]
//! response extension and [`WithTrailers`] merges the slot into the frame as
//! the response body finishes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::BoxFuture;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tonic::Status;
use tonic::body::BoxBody;
use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};
use tonic::server::NamedService;

use crate::error::Result;

/// Build a metadata map from ASCII key/value pairs.
///
/// Pairs are appended in order, so repeated keys keep every value.
pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> Result<MetadataMap>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map = MetadataMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        let key: MetadataKey<Ascii> = MetadataKey::from_bytes(key.as_ref().as_bytes())?;
        let value: MetadataValue<Ascii> = MetadataValue::try_from(value.as_ref())?;
        map.append(key, value);
    }
    Ok(map)
}

/// Merge `from` into `into`.
///
/// Keys named in `from` replace the ones already in `into`; repeated keys in
/// `from` are all kept.
pub fn merge(into: &mut MetadataMap, from: MetadataMap) {
    let mut headers = std::mem::take(into).into_headers();
    headers.extend(from.into_headers());
    *into = MetadataMap::from_headers(headers);
}

/// First ASCII value stored under `key`.
pub fn get_str<'a>(map: &'a MetadataMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(|value| value.to_str().ok())
}

/// Flatten a map into printable `(key, value)` pairs.
///
/// Binary entries are rendered as their length since they are not text.
pub fn entries(map: &MetadataMap) -> Vec<(String, String)> {
    map.iter()
        .map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => (
                key.to_string(),
                value.to_str().unwrap_or("<non-ascii>").to_string(),
            ),
            KeyAndValueRef::Binary(key, value) => (
                key.to_string(),
                format!("<{} bytes>", value.as_encoded_bytes().len()),
            ),
        })
        .collect()
}

/// Render a map as `{key: value, ...}`, skipping transport-owned entries.
pub fn display(map: &MetadataMap) -> String {
    let rendered: Vec<String> = entries(map)
        .into_iter()
        .filter(|(key, _)| !is_reserved(key))
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

fn is_reserved(key: &str) -> bool {
    key.starts_with("grpc-") || matches!(key, "content-type" | "date" | "te" | "user-agent")
}

/// Shared accumulator for the trailers of a single call.
///
/// Clones share the same map, so a handler may keep writing to its slot after
/// the response (and a clone of the slot in its extensions) has been handed
/// to tonic.
#[derive(Debug, Clone, Default)]
pub struct TrailerSlot {
    inner: Arc<Mutex<MetadataMap>>,
}

impl TrailerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge entries into the slot.
    pub fn merge(&self, metadata: MetadataMap) {
        merge(&mut self.inner.lock(), metadata);
    }

    /// Snapshot of the current contents.
    pub fn get(&self) -> MetadataMap {
        self.inner.lock().clone()
    }

    /// Copy every entry into `headers`, replacing existing keys.
    fn apply(&self, headers: &mut http::HeaderMap) {
        headers.extend(self.get().into_headers());
    }
}

impl From<MetadataMap> for TrailerSlot {
    fn from(metadata: MetadataMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(metadata)),
        }
    }
}

/// Attach trailers to a response, merging with any already attached.
pub fn set_trailers<T>(response: &mut tonic::Response<T>, metadata: MetadataMap) {
    match response.extensions().get::<TrailerSlot>() {
        Some(slot) => slot.merge(metadata),
        None => {
            response
                .extensions_mut()
                .insert(TrailerSlot::from(metadata));
        }
    }
}

/// Trailers attached to a response, empty when there are none.
pub fn trailers<T>(response: &tonic::Response<T>) -> MetadataMap {
    response
        .extensions()
        .get::<TrailerSlot>()
        .map(TrailerSlot::get)
        .unwrap_or_default()
}

/// Layer producing [`WithTrailers`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailersLayer;

impl<S> tower::Layer<S> for TrailersLayer {
    type Service = WithTrailers<S>;

    fn layer(&self, service: S) -> Self::Service {
        WithTrailers::new(service)
    }
}

/// Service wrapper that merges each response's [`TrailerSlot`] into its
/// trailers frame.
#[derive(Debug, Clone)]
pub struct WithTrailers<S> {
    inner: S,
}

impl<S> WithTrailers<S> {
    /// Wrap a generated gRPC service.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: NamedService> NamedService for WithTrailers<S> {
    const NAME: &'static str = S::NAME;
}

impl<S, ReqBody> tower::Service<http::Request<ReqBody>> for WithTrailers<S>
where
    S: tower::Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>,
    S::Future: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let future = self.inner.call(request);
        Box::pin(async move {
            let response = future.await?;
            let Some(slot) = response.extensions().get::<TrailerSlot>().cloned() else {
                return Ok(response);
            };
            Ok(response.map(|body| TrailersBody::new(body, slot).boxed_unsync()))
        })
    }
}

/// Response body that merges a [`TrailerSlot`] into the trailers frame.
#[derive(Debug)]
pub struct TrailersBody {
    inner: BoxBody,
    slot: TrailerSlot,
}

impl TrailersBody {
    /// Wrap a response body.
    pub fn new(inner: BoxBody, slot: TrailerSlot) -> Self {
        Self { inner, slot }
    }
}

impl Body for TrailersBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => frame,
            other => return Poll::Ready(other),
        };
        match frame.into_trailers() {
            Ok(mut trailers) => {
                this.slot.apply(&mut trailers);
                Poll::Ready(Some(Ok(Frame::trailers(trailers))))
            }
            Err(frame) => Poll::Ready(Some(Ok(frame))),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
