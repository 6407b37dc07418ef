//! In-memory transport for exercising a [`Session`](crate::Session) without a
//! network.
//!
//! [`MockTransport`] records every link it opens along with the frames sent
//! and the lifecycle calls made on it. Tests drive the session by injecting
//! [`TransportEvent`]s, which are delivered synchronously from the test body
//! (never from inside a link method).
//!
//! Injected lifecycle events also drive what the link does with sent frames,
//! the same way the WebSocket driver does: held until the first `Connected`,
//! recorded while up, dropped while down.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use huddle_protocol::{BroadcastMessage, Envelope, Frame};

use crate::transport::{
    DisconnectReason, EventSink, OpenRequest, Transport, TransportError, TransportEvent,
    TransportHandle, TransportId, TransportLink,
};

/// Lifecycle call made on a mock link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkCall {
    RetryIn(Duration),
    Close,
}

enum LinkPhase {
    /// First handshake in flight; frames are held.
    Handshake(Vec<Frame>),
    Open,
    /// Lost or failed; frames are dropped.
    Down,
    Closed,
}

struct LinkRecord {
    request: OpenRequest,
    events: EventSink,
    sent: Vec<Frame>,
    calls: Vec<LinkCall>,
    phase: LinkPhase,
}

impl LinkRecord {
    fn observe(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let phase = std::mem::replace(&mut self.phase, LinkPhase::Open);
                if let LinkPhase::Handshake(held) = phase {
                    self.sent.extend(held);
                }
            }
            TransportEvent::Disconnected { .. } | TransportEvent::ConnectError { .. } => {
                self.phase = LinkPhase::Down;
            }
            TransportEvent::Frame(_) | TransportEvent::Malformed(_) => {}
        }
    }
}

#[derive(Default)]
struct MockState {
    links: Vec<LinkRecord>,
    fail_next_open: Option<TransportError>,
}

/// Transport factory that never touches the network. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `open` succeeded.
    pub fn open_count(&self) -> usize {
        self.state.borrow().links.len()
    }

    /// Request passed to the most recent successful `open`.
    pub fn last_request(&self) -> Option<OpenRequest> {
        self.state.borrow().links.last().map(|l| l.request.clone())
    }

    /// Frames sent on the most recent link.
    pub fn sent(&self) -> Vec<Frame> {
        self.state
            .borrow()
            .links
            .last()
            .map(|l| l.sent.clone())
            .unwrap_or_default()
    }

    /// Sent frames decoded as envelopes, skipping anything that isn't one.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent()
            .iter()
            .filter_map(|frame| frame.to_envelope().ok())
            .collect()
    }

    /// Lifecycle calls made on the most recent link.
    pub fn last_calls(&self) -> Vec<LinkCall> {
        self.state
            .borrow()
            .links
            .last()
            .map(|l| l.calls.clone())
            .unwrap_or_default()
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        self.state.borrow_mut().fail_next_open = Some(error);
    }

    /// Deliver `event` through the sink of link `index`.
    pub fn emit_to(&self, index: usize, event: TransportEvent) {
        // Clone the sink out so the session may call back into us
        let sink = self.state.borrow_mut().links.get_mut(index).map(|l| {
            if !matches!(l.phase, LinkPhase::Closed) {
                l.observe(&event);
            }
            l.events.clone()
        });
        if let Some(sink) = sink {
            sink(event);
        }
    }

    /// Deliver `event` through the most recent link's sink.
    pub fn emit(&self, event: TransportEvent) {
        let count = self.open_count();
        if count > 0 {
            self.emit_to(count - 1, event);
        }
    }

    pub fn emit_connected(&self) {
        self.emit(TransportEvent::Connected);
    }

    pub fn emit_connect_error(&self, error: &str) {
        self.emit(TransportEvent::ConnectError {
            error: error.to_string(),
        });
    }

    pub fn emit_disconnected(&self, reason: DisconnectReason) {
        self.emit(TransportEvent::Disconnected { reason });
    }

    pub fn emit_broadcast(&self, message: &BroadcastMessage) {
        if let Ok(frame) = Frame::broadcast(message) {
            self.emit(TransportEvent::Frame(frame));
        }
    }
}

impl Transport for MockTransport {
    fn open(&self, request: OpenRequest, events: EventSink) -> Result<TransportHandle, TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_next_open.take() {
            return Err(error);
        }
        let id = request.id;
        state.links.push(LinkRecord {
            request,
            events,
            sent: Vec::new(),
            calls: Vec::new(),
            phase: LinkPhase::Handshake(Vec::new()),
        });
        Ok(TransportHandle::new(MockLink {
            id,
            index: state.links.len() - 1,
            state: self.state.clone(),
        }))
    }
}

struct MockLink {
    id: TransportId,
    index: usize,
    state: Rc<RefCell<MockState>>,
}

impl MockLink {
    fn with_record<R>(&self, f: impl FnOnce(&mut LinkRecord) -> R) -> R {
        let mut state = self.state.borrow_mut();
        f(&mut state.links[self.index])
    }
}

impl TransportLink for MockLink {
    fn id(&self) -> TransportId {
        self.id
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.with_record(|record| match &mut record.phase {
            LinkPhase::Handshake(held) => {
                held.push(frame);
                Ok(())
            }
            LinkPhase::Open => {
                record.sent.push(frame);
                Ok(())
            }
            LinkPhase::Down => Ok(()),
            LinkPhase::Closed => Err(TransportError::Closed),
        })
    }

    fn retry_in(&self, delay: Duration) {
        self.with_record(|record| record.calls.push(LinkCall::RetryIn(delay)));
    }

    fn close(&self) {
        self.with_record(|record| {
            record.phase = LinkPhase::Closed;
            record.calls.push(LinkCall::Close);
        });
    }
}
