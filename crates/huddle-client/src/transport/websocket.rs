//! WebSocket transport over `tokio-tungstenite`.
//!
//! `open` validates the request and spawns a driver on the current
//! `LocalSet`. The driver owns the socket and processes link commands
//! sequentially from an mpsc channel:
//!
//! ```text
//!   WebSocketLink (session side)     mpsc       LinkDriver (spawn_local)
//!   ┌───────────────────────┐    ─────────▶    ┌─────────────────────────┐
//!   │ .send(frame)          │    LinkCommand   │ connect_async + timeout │
//!   │ .retry_in(delay)      │                  │ pump frames both ways   │
//!   │ .close()              │    ◀─────────    │ idle until told to retry│
//!   └───────────────────────┘    EventSink     └─────────────────────────┘
//! ```
//!
//! Frames sent during the first handshake are held and flushed in call
//! order once it completes; if it fails they are discarded. After that, a
//! frame sent while the link is down is dropped.
//!
//! Must be used from within a `tokio::task::LocalSet` because the event sink
//! is `!Send`.

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use huddle_protocol::Frame;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::{
    DisconnectReason, EventSink, OpenRequest, Transport, TransportError, TransportEvent,
    TransportHandle, TransportId, TransportLink,
};
use crate::constants::CONNECT_TIMEOUT;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket links. Cheap; one instance can open many links.
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, request: OpenRequest, events: EventSink) -> Result<TransportHandle, TransportError> {
        // Fail fast on a bad URL or token instead of retrying forever
        build_request(&request.endpoint, request.auth_token.as_deref())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = LinkDriver {
            id: request.id,
            endpoint: request.endpoint,
            auth_token: request.auth_token,
            connect_timeout: self.connect_timeout,
            events,
        };
        tokio::task::spawn_local(driver.run(rx));

        Ok(TransportHandle::new(WebSocketLink { id: request.id, tx }))
    }
}

/// Build the upgrade request, attaching the bearer token if any.
fn build_request(endpoint: &str, auth_token: Option<&str>) -> Result<Request, TransportError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    if let Some(token) = auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| TransportError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

// ============================================================================
// Link (session side)
// ============================================================================

enum LinkCommand {
    Send(Frame),
    RetryIn(Duration),
    Close,
}

struct WebSocketLink {
    id: TransportId,
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl TransportLink for WebSocketLink {
    fn id(&self) -> TransportId {
        self.id
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(LinkCommand::Send(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn retry_in(&self, delay: Duration) {
        let _ = self.tx.send(LinkCommand::RetryIn(delay));
    }

    fn close(&self) {
        let _ = self.tx.send(LinkCommand::Close);
    }
}

// ============================================================================
// Driver (spawn_local, owns the socket)
// ============================================================================

struct LinkDriver {
    id: TransportId,
    endpoint: String,
    auth_token: Option<String>,
    connect_timeout: Duration,
    events: EventSink,
}

/// Outcome of waiting while not connected.
enum Wait {
    Elapsed,
    Stop,
}

impl LinkDriver {
    fn emit(&self, event: TransportEvent) {
        (self.events)(event);
    }

    /// Run until closed or until every `LinkCommand` sender is gone.
    async fn run(self, mut rx: mpsc::UnboundedReceiver<LinkCommand>) {
        let mut next_delay = Some(Duration::ZERO);
        // Only the first handshake buffers; `None` afterwards
        let mut initial: Option<Vec<Frame>> = Some(Vec::new());

        loop {
            // Idle: a failed attempt waits for the session's retry decision
            let delay = match next_delay.take() {
                Some(delay) => delay,
                None => match self.idle(&mut rx).await {
                    Some(delay) => delay,
                    None => break,
                },
            };

            if let Wait::Stop = self.wait(delay, &mut rx).await {
                break;
            }

            let outcome = self.attempt(&mut rx, initial.as_mut()).await;
            let ws = match outcome {
                Some(Ok(ws)) => ws,
                Some(Err(error)) => {
                    if let Some(pending) = initial.take().filter(|p| !p.is_empty()) {
                        debug!(count = pending.len(), "discarding frames sent during failed handshake");
                    }
                    warn!(transport = %self.id.short(), %error, "connect error");
                    self.emit(TransportEvent::ConnectError { error });
                    continue;
                }
                None => break,
            };

            info!(transport = %self.id.short(), endpoint = %self.endpoint, "connected");
            // Anything queued in reaction to Connected lands behind the held frames
            self.emit(TransportEvent::Connected);
            let pending = initial.take().unwrap_or_default();

            match self.pump(ws, pending, &mut rx).await {
                DisconnectReason::ClientInitiated => break,
                reason => {
                    info!(transport = %self.id.short(), %reason, "disconnected");
                    self.emit(TransportEvent::Disconnected { reason });
                }
            }
        }

        debug!(transport = %self.id.short(), "link driver exiting");
    }

    /// Wait for a retry request. `None` means stop.
    async fn idle(&self, rx: &mut mpsc::UnboundedReceiver<LinkCommand>) -> Option<Duration> {
        loop {
            match rx.recv().await? {
                LinkCommand::RetryIn(delay) => return Some(delay),
                LinkCommand::Send(_) => debug!("dropping frame: link not established"),
                LinkCommand::Close => return None,
            }
        }
    }

    /// Sleep for `delay`, still honoring close. A newer retry request
    /// replaces the pending delay.
    async fn wait(&self, delay: Duration, rx: &mut mpsc::UnboundedReceiver<LinkCommand>) -> Wait {
        if delay.is_zero() {
            return Wait::Elapsed;
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Wait::Elapsed,
                cmd = rx.recv() => match cmd {
                    None | Some(LinkCommand::Close) => return Wait::Stop,
                    Some(LinkCommand::RetryIn(delay)) => {
                        sleep.as_mut().reset(tokio::time::Instant::now() + delay);
                    }
                    Some(LinkCommand::Send(_)) => debug!("dropping frame: link not established"),
                },
            }
        }
    }

    /// One handshake attempt. `None` means close was requested mid-attempt.
    /// Frames arriving meanwhile go to `hold` when given, else are dropped.
    async fn attempt(
        &self,
        rx: &mut mpsc::UnboundedReceiver<LinkCommand>,
        mut hold: Option<&mut Vec<Frame>>,
    ) -> Option<Result<WsStream, String>> {
        let request = match build_request(&self.endpoint, self.auth_token.as_deref()) {
            Ok(request) => request,
            Err(e) => return Some(Err(e.to_string())),
        };

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(request));
        tokio::pin!(handshake);
        loop {
            tokio::select! {
                result = &mut handshake => {
                    return Some(match result {
                        Ok(Ok((ws, _response))) => Ok(ws),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("handshake timed out after {:?}", self.connect_timeout)),
                    });
                }
                cmd = rx.recv() => match cmd {
                    None | Some(LinkCommand::Close) => return None,
                    Some(LinkCommand::Send(frame)) => match hold.as_deref_mut() {
                        Some(held) => held.push(frame),
                        None => debug!("dropping frame: reconnect in progress"),
                    },
                    Some(LinkCommand::RetryIn(_)) => {}
                },
            }
        }
    }

    /// Move frames both ways until the link goes away, writing `pending`
    /// first.
    async fn pump(
        &self,
        ws: WsStream,
        pending: Vec<Frame>,
        rx: &mut mpsc::UnboundedReceiver<LinkCommand>,
    ) -> DisconnectReason {
        let (mut sink, mut stream) = ws.split();

        if !pending.is_empty() {
            debug!(count = pending.len(), "flushing frames held during handshake");
        }
        for frame in pending {
            if let Some(reason) = write_frame(&mut sink, frame).await {
                return reason;
            }
        }

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    None | Some(LinkCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        return DisconnectReason::ClientInitiated;
                    }
                    Some(LinkCommand::Send(frame)) => {
                        if let Some(reason) = write_frame(&mut sink, frame).await {
                            return reason;
                        }
                    }
                    Some(LinkCommand::RetryIn(_)) => debug!("ignoring retry request: already connected"),
                },
                msg = stream.next() => match msg {
                    None => return DisconnectReason::TransportClosed,
                    Some(Err(e)) => return DisconnectReason::TransportError(e.to_string()),
                    Some(Ok(Message::Text(text))) => match Frame::from_text(&text) {
                        Ok(frame) => self.emit(TransportEvent::Frame(frame)),
                        Err(e) => self.emit(TransportEvent::Malformed(e.to_string())),
                    },
                    Some(Ok(Message::Close(close))) => {
                        return match close {
                            Some(frame) if frame.code != CloseCode::Normal => {
                                DisconnectReason::TransportError(format!(
                                    "closed with {}: {}",
                                    frame.code, frame.reason
                                ))
                            }
                            _ => DisconnectReason::ServerInitiated,
                        };
                    }
                    Some(Ok(Message::Binary(_))) => {
                        self.emit(TransportEvent::Malformed("unexpected binary frame".into()));
                    }
                    // Ping/pong are answered by tungstenite on the next write
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

/// Encode and write one frame. `Some` means the link is gone.
async fn write_frame(
    sink: &mut SplitSink<WsStream, Message>,
    frame: Frame,
) -> Option<DisconnectReason> {
    let text = match frame.to_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(event = %frame.event, error = %e, "failed to encode frame");
            return None;
        }
    };
    trace!(event = %frame.event, "sending frame");
    sink.send(Message::Text(text.into()))
        .await
        .err()
        .map(|e| DisconnectReason::TransportError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_attaches_bearer() {
        let request = build_request("ws://localhost:3000", Some("tok")).unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn test_build_request_without_token() {
        let request = build_request("ws://localhost:3000", None).unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_build_request_rejects_bad_endpoint() {
        assert!(matches!(
            build_request("not a url", None),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_build_request_rejects_newline_in_token() {
        assert!(matches!(
            build_request("ws://localhost:3000", Some("bad\ntoken")),
            Err(TransportError::InvalidToken)
        ));
    }
}
