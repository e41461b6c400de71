//! In-memory stream handle used by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::Payload;
use crate::metadata;
use crate::stream::{StreamHandle, header_already_sent};

/// Scripted inbound messages, recorded outbound messages and metadata.
pub(crate) struct MemoryStream<I, O> {
    inbound: VecDeque<I>,
    error: Option<Status>,
    peer_header: MetadataMap,
    sent: Arc<Mutex<Vec<O>>>,
    outgoing_header: Arc<Mutex<MetadataMap>>,
    outgoing_trailer: Arc<Mutex<MetadataMap>>,
    header_sent: bool,
    closed: Arc<AtomicBool>,
}

impl<I, O> MemoryStream<I, O> {
    /// A stream that yields `inbound` and then end-of-input.
    pub(crate) fn new(inbound: Vec<I>) -> Self {
        Self {
            inbound: inbound.into(),
            error: None,
            peer_header: MetadataMap::new(),
            sent: Arc::default(),
            outgoing_header: Arc::default(),
            outgoing_trailer: Arc::default(),
            header_sent: false,
            closed: Arc::default(),
        }
    }

    /// A stream whose every send and receive fails with `status`.
    pub(crate) fn failing(status: Status) -> Self {
        let mut stream = Self::new(Vec::new());
        stream.error = Some(status);
        stream
    }

    /// Yield `inbound`, then fail with `status` instead of end-of-input.
    pub(crate) fn then_fail(mut self, status: Status) -> Self {
        self.error = Some(status);
        self
    }

    /// Header metadata reported as coming from the peer.
    pub(crate) fn with_peer_header(mut self, header: MetadataMap) -> Self {
        self.peer_header = header;
        self
    }

    pub(crate) fn sent(&self) -> Arc<Mutex<Vec<O>>> {
        Arc::clone(&self.sent)
    }

    pub(crate) fn outgoing_header(&self) -> Arc<Mutex<MetadataMap>> {
        Arc::clone(&self.outgoing_header)
    }

    pub(crate) fn outgoing_trailer(&self) -> Arc<Mutex<MetadataMap>> {
        Arc::clone(&self.outgoing_trailer)
    }

    pub(crate) fn closed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl<I: Payload, O: Payload> StreamHandle<I, O> for MemoryStream<I, O> {
    async fn send(&mut self, message: O) -> Result<(), Status> {
        if let Some(status) = &self.error
            && self.inbound.is_empty()
        {
            return Err(status.clone());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Status::failed_precondition("send after close"));
        }
        self.header_sent = true;
        self.sent.lock().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<I>, Status> {
        match self.inbound.pop_front() {
            Some(message) => Ok(Some(message)),
            None => match &self.error {
                Some(status) => Err(status.clone()),
                None => Ok(None),
            },
        }
    }

    async fn close(&mut self) -> Result<(), Status> {
        self.header_sent = true;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn header(&mut self) -> Result<MetadataMap, Status> {
        Ok(self.peer_header.clone())
    }

    fn trailer(&self) -> MetadataMap {
        MetadataMap::new()
    }

    fn set_header(&mut self, header: MetadataMap) -> Result<(), Status> {
        if self.header_sent {
            return Err(header_already_sent());
        }
        metadata::merge(&mut self.outgoing_header.lock(), header);
        Ok(())
    }

    fn set_trailer(&mut self, trailer: MetadataMap) -> Result<(), Status> {
        metadata::merge(&mut self.outgoing_trailer.lock(), trailer);
        Ok(())
    }
}
