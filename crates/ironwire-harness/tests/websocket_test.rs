//! WebSocket connection scenarios over memory sessions.

use std::{
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use ironwire_core::{
    ChannelConfig, Completion, ConnectionError, WebSocketConfig, WebSocketConnection,
    websocket::{CloseInitiator, ConnectionState},
};
use ironwire_harness::{
    ChannelPair, MemorySession, SimEnv, ToyEngineConfig, WebSocketPair, WriteMode,
};
use ironwire_proto::{CloseInfo, Frame, FrameBody, ProtocolError, StatusCode, WebSocketPolicy};

const NO_KEEP_ALIVE: WebSocketConfig = WebSocketConfig { ping_interval: None };

fn plain_pair() -> WebSocketPair {
    WebSocketPair::new(SimEnv::with_seed(7), NO_KEEP_ALIVE).unwrap()
}

fn bodies(frames: Vec<Frame>) -> Vec<FrameBody> {
    frames.into_iter().map(|frame| frame.body).collect()
}

#[tokio::test]
async fn client_masks_and_server_does_not() {
    let pair = plain_pair();

    assert!(pair.client.send_text("hi").await.unwrap());
    let client_wire = pair.client_session.take_bytes();
    assert_eq!(client_wire[0], 0x81);
    assert_ne!(client_wire[1] & 0x80, 0, "client frames carry a mask");
    assert_eq!(client_wire.len(), 2 + 4 + 2);

    assert!(pair.server.send_text("hi").await.unwrap());
    let server_wire = pair.server_session.take_bytes();
    assert_eq!(&server_wire[..], &[0x81, 0x02, b'h', b'i']);
}

#[tokio::test]
async fn pre_masked_client_frame_keeps_its_key() {
    let pair = plain_pair();
    let mut frame = Frame::binary(Bytes::from_static(b"abc"));
    frame.set_mask([1, 2, 3, 4]);

    let (completion, outcome) = Completion::channel();
    pair.client.outgoing_frame(frame, completion);
    outcome.await.unwrap().unwrap();

    let wire = pair.client_session.take_bytes();
    assert_eq!(&wire[2..6], &[1, 2, 3, 4]);
}

#[tokio::test]
async fn messages_reach_the_peer_sink_in_order() {
    let pair = plain_pair();
    pair.client.send_text("one").await.unwrap();
    pair.client.send_binary(Bytes::from_static(b"two")).await.unwrap();
    pair.client.send_text("three").await.unwrap();

    // Deliver byte by byte to exercise partial-frame buffering.
    let wire = pair.client_session.take_bytes();
    for i in 0..wire.len() {
        pair.server.on_bytes(wire.slice(i..=i));
    }

    assert_eq!(
        bodies(pair.server_sink.take_frames()),
        vec![
            FrameBody::Text("one".into()),
            FrameBody::Binary(Bytes::from_static(b"two")),
            FrameBody::Text("three".into()),
        ]
    );
}

#[test]
fn ping_is_answered_with_exactly_one_pong() {
    let pair = plain_pair();
    pair.client.outgoing_frame(Frame::ping(Bytes::from_static(b"probe")), Completion::noop());
    pair.client_to_server();

    assert_eq!(pair.server_session.buffered_writes(), 1);
    assert_eq!(pair.server_to_client(), 1);

    // The ping is forwarded to the server application as well.
    assert_eq!(bodies(pair.server_sink.take_frames()), vec![FrameBody::Ping(Bytes::from_static(b"probe"))]);
    assert_eq!(bodies(pair.client_sink.take_frames()), vec![FrameBody::Pong(Bytes::from_static(b"probe"))]);

    // The pong itself triggers nothing further.
    assert_eq!(pair.client_session.buffered_writes(), 0);
}

#[test]
fn remote_close_is_echoed_and_both_sides_close() {
    let pair = plain_pair();
    let closed = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::clone(&closed);
    pair.server.on_close(move |event| {
        events.lock().unwrap().push(event.close_info.clone());
        Ok(())
    });

    pair.client.outgoing_frame(
        Frame::close(CloseInfo::new(StatusCode::GOING_AWAY, Some("done".into()))),
        Completion::noop(),
    );
    assert!(!pair.client.is_open());
    let client_state = pair.client.io_state();
    assert_eq!(client_state.initiator(), Some(CloseInitiator::Local));
    assert_eq!(client_state.state(), ConnectionState::Closed);

    pair.client_to_server();
    assert!(!pair.server.is_open());
    assert_eq!(pair.server_session.close_count(), 1);

    let server_state = pair.server.io_state();
    assert_eq!(server_state.initiator(), Some(CloseInitiator::Remote));
    assert!(server_state.was_clean_close());
    assert_eq!(server_state.close_info().and_then(|info| info.reason.clone()), Some("done".into()));

    // Echo carries the same status code without the reason.
    let echo = pair.server_session.take_bytes();
    assert_eq!(&echo[..], &[0x88, 0x02, 0x03, 0xE9]);

    let closed = closed.lock().unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].as_ref().map(|info| info.code), Some(StatusCode::GOING_AWAY));

    assert!(matches!(
        bodies(pair.server_sink.take_frames()).as_slice(),
        [FrameBody::Close(info)] if info.code == StatusCode::GOING_AWAY
    ));
}

#[tokio::test]
async fn sends_after_close_are_rejected() {
    let pair = plain_pair();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    pair.client.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    pair.client.close();
    pair.client.close();
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let err = pair.client.send_text("late").await.unwrap_err();
    assert!(matches!(err, ConnectionError::Closed));
    assert_eq!(pair.client_session.buffered_writes(), 0);
}

#[test]
fn detached_sink_drops_frames() {
    let pair = plain_pair();
    pair.server.set_incoming_frames(None);
    pair.client.outgoing_frame(Frame::text("dropped"), Completion::noop());
    pair.client_to_server();
    assert!(pair.server_sink.take_frames().is_empty());

    pair.server.set_incoming_frames(Some(pair.server_sink.clone()));
    pair.client.outgoing_frame(Frame::text("kept"), Completion::noop());
    pair.client_to_server();
    assert_eq!(bodies(pair.server_sink.take_frames()), vec![FrameBody::Text("kept".into())]);
}

#[test]
fn protocol_error_closes_with_matching_code() {
    let pair = plain_pair();
    let exceptions = Arc::new(AtomicUsize::new(0));
    pair.server.on_exception(|_| Err("listener failure".into()));
    let counter = Arc::clone(&exceptions);
    pair.server.on_exception(move |event| {
        assert!(matches!(event.error, ConnectionError::Protocol(ProtocolError::UnmaskedClientFrame)));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    // Unmasked text frame sent to a server.
    pair.server.on_bytes(Bytes::from_static(&[0x81, 0x02, b'h', b'i']));

    assert_eq!(exceptions.load(Ordering::SeqCst), 1);
    assert_eq!(pair.server_sink.errors().len(), 1);
    assert_eq!(&pair.server_session.take_bytes()[..], &[0x88, 0x02, 0x03, 0xEA]);
    assert!(!pair.server.is_open());
    assert_eq!(pair.server.io_state().initiator(), Some(CloseInitiator::Local));
}

#[test]
fn invalid_utf8_closes_with_bad_payload() {
    let pair = plain_pair();
    // Masked (zero key) text frame with an invalid UTF-8 payload.
    pair.server.on_bytes(Bytes::from_static(&[0x81, 0x82, 0, 0, 0, 0, 0xC3, 0x28]));
    assert_eq!(&pair.server_session.take_bytes()[..], &[0x88, 0x02, 0x03, 0xEF]);
}

#[test]
fn frames_before_a_fault_are_still_delivered() {
    let pair = plain_pair();
    pair.client.outgoing_frame(Frame::text("ok"), Completion::noop());
    let mut wire = pair.client_session.take_bytes().to_vec();
    // Reserved bit set on the next frame.
    wire.extend_from_slice(&[0xC1, 0x80, 0, 0, 0, 0]);

    pair.server.on_bytes(Bytes::from(wire));
    assert_eq!(bodies(pair.server_sink.take_frames()), vec![FrameBody::Text("ok".into())]);
    assert_eq!(pair.server_sink.errors().len(), 1);
    assert!(!pair.server.is_open());
}

#[tokio::test]
async fn transport_failure_fails_the_send() {
    let pair = plain_pair();
    pair.client_session.set_mode(WriteMode::FailAfter(0));
    let err = pair.client.send_text("lost").await.unwrap_err();
    assert!(matches!(err, ConnectionError::Io(_)));
    // A failed send does not close the connection.
    assert!(pair.client.is_open());
}

#[tokio::test(start_paused = true)]
async fn keep_alive_pings_until_closed() {
    let config = WebSocketConfig { ping_interval: Some(Duration::from_millis(100)) };
    let pair = WebSocketPair::new(SimEnv::with_seed(1), config).unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let pings = pair.client_session.take_written();
    assert_eq!(pings.len(), 2);
    for ping in &pings {
        assert_eq!(ping[0], 0x89);
        assert_eq!(ping[1], 0x80);
    }

    // Servers never ping.
    assert_eq!(pair.server_session.buffered_writes(), 0);

    pair.client.close();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pair.client_session.buffered_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_pings_do_not_close_the_connection() {
    let config = WebSocketConfig { ping_interval: Some(Duration::from_millis(100)) };
    let pair = WebSocketPair::new(SimEnv::with_seed(2), config).unwrap();
    pair.client_session.set_mode(WriteMode::FailAfter(0));

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(pair.client.is_open());
    assert_eq!(pair.client.io_state().state(), ConnectionState::Opened);
}

#[test]
fn client_keep_alive_requires_a_runtime() {
    let session = MemorySession::new(9);
    let err = WebSocketConnection::builder(session, WebSocketPolicy::client()).build().unwrap_err();
    assert!(matches!(err, ConnectionError::NoRuntime));
}

#[test]
fn server_needs_no_runtime() {
    let session = MemorySession::new(9);
    let server = WebSocketConnection::builder(session, WebSocketPolicy::server()).build().unwrap();
    assert!(server.is_open());
    assert_eq!(server.io_state().state(), ConnectionState::Opened);
    assert!(!server.is_encrypted());
}

#[tokio::test]
async fn websocket_over_secure_channel() {
    let engine = ToyEngineConfig { record_capacity: 8 * 1024, ..ToyEngineConfig::default() };
    let pair = WebSocketPair::secure(SimEnv::with_seed(3), NO_KEEP_ALIVE, engine).unwrap();
    assert!(pair.client.is_encrypted());
    assert!(pair.client.is_handshake_finished());

    let text = "x".repeat(60_000);
    assert!(pair.client.send_text(text.clone()).await.unwrap());

    // Records, not raw frames, on the wire: 60 KB over 8 KiB records.
    let records = pair.client_session.take_written();
    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|record| record[0] == 23));
    for record in records {
        pair.server.on_bytes(record);
    }
    assert_eq!(bodies(pair.server_sink.take_frames()), vec![FrameBody::Text(text)]);

    pair.server.outgoing_frame(Frame::ping(Bytes::new()), Completion::noop());
    pair.server_to_client();
    pair.client_to_server();
    assert_eq!(bodies(pair.server_sink.take_frames()), vec![FrameBody::Pong(Bytes::new())]);
}

#[tokio::test]
async fn secure_close_sends_close_frame_then_close_notify() {
    let pair =
        WebSocketPair::secure(SimEnv::with_seed(4), NO_KEEP_ALIVE, ToyEngineConfig::default()).unwrap();

    pair.client.outgoing_frame(Frame::close(CloseInfo::normal()), Completion::noop());
    let records = pair.client_session.take_written();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0][0], 23);
    assert_eq!(&records[1][..], &[21, 0, 0]);
    assert_eq!(pair.client_session.close_count(), 1);
}

#[test]
fn handshake_listener_may_send_on_its_connection() {
    let channels = ChannelPair::new(ToyEngineConfig::default(), ChannelConfig::default()).unwrap();
    let server_handle: Arc<OnceLock<WebSocketConnection<SimEnv>>> = Arc::default();
    let handle = Arc::clone(&server_handle);
    channels.server.on_handshake_finished(move |_| {
        if let Some(server) = handle.get() {
            server.outgoing_frame(Frame::text("welcome"), Completion::noop());
        }
        Ok(())
    });

    let pair = WebSocketPair::from_channels(SimEnv::with_seed(5), NO_KEEP_ALIVE, channels).unwrap();
    server_handle.set(pair.server.clone()).unwrap();
    assert!(!pair.server.is_handshake_finished());

    for _ in 0..4 {
        pair.client_to_server();
        pair.server_to_client();
    }
    assert!(pair.client.is_handshake_finished());
    assert!(pair.server.is_handshake_finished());
    assert_eq!(bodies(pair.client_sink.take_frames()), vec![FrameBody::Text("welcome".into())]);
}

#[test]
fn completion_may_chain_the_next_send() {
    let pair =
        WebSocketPair::secure(SimEnv::with_seed(6), NO_KEEP_ALIVE, ToyEngineConfig::default()).unwrap();

    let again = pair.client.clone();
    let (chained, mut chained_outcome) = Completion::channel();
    let (first, mut first_outcome) = Completion::channel();
    pair.client.outgoing_frame(
        Frame::text("first"),
        Completion::new(move |result| {
            first.complete(result);
            again.outgoing_frame(Frame::text("second"), chained);
        }),
    );

    assert!(matches!(first_outcome.try_recv(), Ok(Ok(()))));
    assert!(matches!(chained_outcome.try_recv(), Ok(Ok(()))));

    pair.client_to_server();
    assert_eq!(
        bodies(pair.server_sink.take_frames()),
        vec![FrameBody::Text("first".into()), FrameBody::Text("second".into())]
    );
}
