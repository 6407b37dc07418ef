//! Integration tests for the WebSocket transport against a local server.
//!
//! Each test binds a `tokio-tungstenite` server on an ephemeral port and
//! drives a real `Session` over it.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::LocalSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

use huddle_client::protocol::{BroadcastMessage, Frame, RoomJoining, SendMessage};
use huddle_client::{
    ClientConfig, ConnectionState, ReconnectPolicy, Session, SessionEvent, StaticToken,
    WebSocketTransport,
};

/// Helper to run async test code that requires LocalSet (the session is !Send)
fn run_local<F: std::future::Future<Output = ()>>(f: F) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = LocalSet::new();
    rt.block_on(local.run_until(f));
}

fn session_for(addr: SocketAddr, policy: ReconnectPolicy) -> Session {
    let config = ClientConfig {
        reconnect: policy,
        connect_timeout_ms: 2_000,
        ..ClientConfig::with_endpoint(format!("http://{addr}"))
    };
    let transport = WebSocketTransport::new(config.connect_timeout());
    Session::with_credentials(config, transport, StaticToken::new("test-token"))
}

/// Wait (bounded) for the first event matching `pred`.
async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for session event")
}

fn is_connected(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::StateChanged(ConnectionState::Connected))
}

/// What the test server observed.
#[derive(Debug)]
enum Observed {
    Auth(Option<String>),
    Frame(Frame),
}

#[test]
fn test_bearer_header_and_frame_round_trip() {
    run_local(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        tokio::task::spawn_local(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth = None;
            let mut ws = accept_hdr_async(
                stream,
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    auth = req
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Ok(resp)
                },
            )
            .await
            .unwrap();
            seen_tx.send(Observed::Auth(auth)).unwrap();

            for _ in 0..2 {
                let msg = ws.next().await.unwrap().unwrap();
                let frame = Frame::from_text(msg.to_text().unwrap()).unwrap();
                seen_tx.send(Observed::Frame(frame)).unwrap();
            }

            let reply = Frame::broadcast(&BroadcastMessage::text("chan-1", "hello back")).unwrap();
            ws.send(Message::Text(reply.to_text().unwrap().into()))
                .await
                .unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let session = session_for(addr, ReconnectPolicy::default());
        let mut events = session.subscribe_events();
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
        let _sub = session.on_message(move |msg| {
            let _ = msg_tx.send(msg.clone());
        });

        session.connect("user-1", Some("Alice")).unwrap();
        wait_for(&mut events, is_connected).await;

        session.join_channel("chan-1", "srv-1", None).unwrap();
        session.send_message("chan-1", "hi", "srv-1", None).unwrap();

        let mut observed = Vec::new();
        for _ in 0..3 {
            let item = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            observed.push(item);
        }

        match &observed[0] {
            Observed::Auth(auth) => assert_eq!(auth.as_deref(), Some("Bearer test-token")),
            other => panic!("expected auth first, got {other:?}"),
        }
        match &observed[1] {
            Observed::Frame(frame) => {
                let join: RoomJoining = frame.to_envelope().unwrap().decode().unwrap();
                assert_eq!(join.channel_id, "chan-1");
                assert_eq!(join.entity_id, "user-1");
            }
            other => panic!("expected join frame, got {other:?}"),
        }
        match &observed[2] {
            Observed::Frame(frame) => {
                let send: SendMessage = frame.to_envelope().unwrap().decode().unwrap();
                assert_eq!(send.sender_name, "Alice");
                assert_eq!(send.message, "hi");
                assert_eq!(send.source, "custom_ui");
            }
            other => panic!("expected send frame, got {other:?}"),
        }

        let broadcast = tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(broadcast.text.as_deref(), Some("hello back"));
        assert!(broadcast.is_for_channel("chan-1"));

        session.disconnect();
        assert!(!session.is_connected());
    });
}

#[test]
fn test_frames_sent_while_connecting_are_delivered() {
    run_local(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();

        tokio::task::spawn_local(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for _ in 0..2 {
                let msg = ws.next().await.unwrap().unwrap();
                frame_tx.send(Frame::from_text(msg.to_text().unwrap()).unwrap()).unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let session = session_for(addr, ReconnectPolicy::default());

        // No wait for Connected: both frames go out during the handshake
        session.connect("user-1", None).unwrap();
        assert!(!session.is_connected());
        session.join_channel("chan-1", "srv-1", None).unwrap();
        session.send_message("chan-1", "early", "srv-1", None).unwrap();

        let mut frames = Vec::new();
        for _ in 0..2 {
            let frame = tokio::time::timeout(Duration::from_secs(5), frame_rx.recv())
                .await
                .expect("timed out waiting for frame")
                .unwrap();
            frames.push(frame);
        }

        let join: RoomJoining = frames[0].to_envelope().unwrap().decode().unwrap();
        assert_eq!(join.channel_id, "chan-1");
        let send: SendMessage = frames[1].to_envelope().unwrap().decode().unwrap();
        assert_eq!(send.message, "early");

        session.disconnect();
    });
}

#[test]
fn test_reconnects_after_connection_drop() {
    run_local(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::task::spawn_local(async move {
            // First connection is dropped without a close handshake
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let policy = ReconnectPolicy::fixed(Duration::from_millis(20), 3);
        let session = session_for(addr, policy);
        let mut events = session.subscribe_events();

        let handle = session.connect("user-1", None).unwrap();
        wait_for(&mut events, is_connected).await;
        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ReconnectScheduled { attempt: 1, .. })
        })
        .await;
        wait_for(&mut events, is_connected).await;

        // Same handle across the reconnect
        assert!(session.transport().unwrap().same_as(&handle));
        assert!(session.is_connected());
        session.disconnect();
    });
}

#[test]
fn test_server_close_does_not_reconnect() {
    run_local(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::task::spawn_local(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let session = session_for(addr, ReconnectPolicy::fixed(Duration::from_millis(20), 3));
        let mut events = session.subscribe_events();
        session.connect("user-1", None).unwrap();
        wait_for(&mut events, is_connected).await;

        wait_for(&mut events, |e| {
            matches!(
                e,
                SessionEvent::StateChanged(ConnectionState::Disconnected)
                    | SessionEvent::ReconnectScheduled { .. }
            )
        })
        .await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.transport().is_none());
    });
}

#[test]
fn test_unreachable_server_exhausts_retries() {
    run_local(async {
        // Bind then release to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session = session_for(addr, ReconnectPolicy::fixed(Duration::from_millis(10), 2));
        let mut events = session.subscribe_events();
        session.connect("user-1", None).unwrap();
        session.join_channel("chan-1", "srv-1", None).unwrap();

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ReconnectExhausted { .. })
        })
        .await;

        assert_eq!(event, SessionEvent::ReconnectExhausted { attempts: 2 });
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.transport().is_none());
        assert!(session.is_member("chan-1"));
    });
}
