//! The stream handle every streaming call is driven through.
//!
//! A handle exposes the minimal capability set a streaming RPC needs: sending,
//! receiving, half-closing, and reading or writing header and trailer
//! metadata. Transport handles implement it on top of tonic, and stream
//! interceptors implement it again as decorators that forward to an inner
//! handle.

use async_trait::async_trait;
use tonic::Status;
use tonic::metadata::MetadataMap;

/// A boxed, type-erased stream handle.
pub type BoxStream<I, O> = Box<dyn StreamHandle<I, O>>;

/// One end of a streaming call.
///
/// `I` is the message type received from the peer and `O` the type sent to
/// it. Every operation takes `&mut self`: a handle has exactly one driver.
#[async_trait]
pub trait StreamHandle<I, O>: Send
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Send one message to the peer.
    async fn send(&mut self, message: O) -> Result<(), Status>;

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has signalled end-of-input. That is
    /// the normal completion condition and is never reported as an error.
    async fn recv(&mut self) -> Result<Option<I>, Status>;

    /// Half-close the outbound direction.
    ///
    /// On a client this is CloseSend. On a server it finishes the response
    /// stream successfully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), Status>;

    /// End the call with the handler's outcome.
    ///
    /// Success closes the handle like [`close`](Self::close). A failure is
    /// handed back unchanged. Servers call this exactly once per call, after
    /// the handler returns or the client goes away, so decorators see every
    /// outcome on the way out.
    async fn finish(&mut self, outcome: Result<(), Status>) -> Result<(), Status> {
        outcome?;
        self.close().await
    }

    /// Header metadata sent by the peer.
    ///
    /// On a client this waits until the server's response headers have
    /// arrived. On a server it is the request metadata.
    async fn header(&mut self) -> Result<MetadataMap, Status>;

    /// Trailer metadata sent by the peer.
    ///
    /// Only final once [`recv`](Self::recv) has returned end-of-input or an
    /// error.
    fn trailer(&self) -> MetadataMap;

    /// Add entries to the outgoing header.
    ///
    /// Fails with `FailedPrecondition` once the header has gone out.
    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// Add entries to the outgoing trailer.
    fn set_trailer(&mut self, metadata: MetadataMap) -> Result<(), Status>;
}

/// Status returned when a header is set after it has already been sent.
pub fn header_already_sent() -> Status {
    Status::failed_precondition("header metadata already sent")
}
