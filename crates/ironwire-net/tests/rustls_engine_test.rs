//! Secure channels and WebSocket connections over real TLS, pumped in memory.

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use common::TlsConfigs;
use ironwire_core::{
    ChannelError, Completion, SecureChannel, WebSocketConfig, WebSocketConnection,
    secure::Status,
};
use ironwire_harness::{
    CollectingSink, MemorySession,
    link::{deliver, pump},
};
use ironwire_net::RustlsEngine;
use ironwire_proto::{Frame, FrameBody, WebSocketPolicy};
use rustls::pki_types::ServerName;

struct Endpoints {
    client: SecureChannel,
    server: SecureChannel,
    client_session: Arc<MemorySession>,
    server_session: Arc<MemorySession>,
    finished: Arc<AtomicUsize>,
}

impl Endpoints {
    fn new(tls: &TlsConfigs) -> Self {
        Self::with_engines(tls.client_engine(), tls.server_engine())
    }

    fn with_engines(client_engine: RustlsEngine, server_engine: RustlsEngine) -> Self {
        let client_session = MemorySession::new(1);
        let server_session = MemorySession::new(2);
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        let client = SecureChannel::builder(client_session.clone(), Box::new(client_engine))
            .on_handshake_finished(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();
        let counter = Arc::clone(&finished);
        let server = SecureChannel::builder(server_session.clone(), Box::new(server_engine))
            .on_handshake_finished(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        Self { client, server, client_session, server_session, finished }
    }

    fn handshake(&mut self) {
        for _ in 0..8 {
            deliver(&self.client_session, &mut self.server).unwrap();
            deliver(&self.server_session, &mut self.client).unwrap();
            if self.client.is_handshake_finished() && self.server.is_handshake_finished() {
                return;
            }
        }
        panic!("TLS handshake did not finish");
    }
}

fn concat(chunks: Vec<Bytes>) -> Vec<u8> {
    chunks.iter().flat_map(|chunk| chunk.iter().copied()).collect()
}

#[test]
fn handshake_and_application_data() {
    let tls = TlsConfigs::localhost();
    let mut endpoints = Endpoints::new(&tls);
    assert_eq!(endpoints.client_session.buffered_writes(), 1, "ClientHello written while building");

    endpoints.handshake();
    assert_eq!(endpoints.finished.load(Ordering::SeqCst), 2);
    assert_eq!(endpoints.client.negotiated_protocol(), None);

    endpoints.client.write(b"ping over tls", Completion::noop()).unwrap();
    let wire = endpoints.client_session.take_written();
    assert!(wire.iter().all(|record| !record.windows(4).any(|w| w == b"ping")));
    let plain: Vec<_> = wire
        .into_iter()
        .filter_map(|record| endpoints.server.read(record).unwrap())
        .collect();
    assert_eq!(concat(plain), b"ping over tls");

    endpoints.server.write(b"pong", Completion::noop()).unwrap();
    let plain = deliver(&endpoints.server_session, &mut endpoints.client).unwrap();
    assert_eq!(concat(plain), b"pong");
}

#[test]
fn large_write_spans_several_records() {
    let tls = TlsConfigs::localhost();
    let mut endpoints = Endpoints::new(&tls);
    endpoints.handshake();

    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(endpoints.client.write(&data, Completion::noop()).unwrap(), data.len());
    assert!(endpoints.client_session.buffered_writes() > 1);

    let plain = deliver(&endpoints.client_session, &mut endpoints.server).unwrap();
    assert_eq!(concat(plain), data);
}

#[test]
fn ciphertext_split_into_small_chunks() {
    let tls = TlsConfigs::localhost();
    let mut endpoints = Endpoints::new(&tls);

    // Handshake flights and data delivered seven bytes at a time.
    for _ in 0..8 {
        for chunk in endpoints.client_session.take_written() {
            for piece in chunk.chunks(7) {
                endpoints.server.read(Bytes::copy_from_slice(piece)).unwrap();
            }
        }
        for chunk in endpoints.server_session.take_written() {
            for piece in chunk.chunks(7) {
                endpoints.client.read(Bytes::copy_from_slice(piece)).unwrap();
            }
        }
    }
    assert!(endpoints.client.is_handshake_finished());
    assert!(endpoints.server.is_handshake_finished());

    endpoints.client.write(b"fragmented", Completion::noop()).unwrap();
    let mut plain = Vec::new();
    for piece in endpoints.client_session.take_bytes().chunks(7) {
        if let Some(bytes) = endpoints.server.read(Bytes::copy_from_slice(piece)).unwrap() {
            plain.extend_from_slice(&bytes);
        }
    }
    assert_eq!(plain, b"fragmented");
}

#[test]
fn tampered_record_is_an_engine_fault() {
    let tls = TlsConfigs::localhost();
    let mut endpoints = Endpoints::new(&tls);
    endpoints.handshake();

    endpoints.client.write(b"integrity", Completion::noop()).unwrap();
    let mut record = endpoints.client_session.take_bytes().to_vec();
    let last = record.len() - 1;
    record[last] ^= 0xff;

    let err = endpoints.server.read(Bytes::from(record)).unwrap_err();
    assert!(matches!(err, ChannelError::Engine(_)));
}

#[test]
fn close_notify_reaches_the_peer() {
    let tls = TlsConfigs::localhost();
    let mut endpoints = Endpoints::new(&tls);
    endpoints.handshake();

    endpoints.client.close();
    assert!(!endpoints.client.is_open());
    assert_eq!(endpoints.client_session.buffered_writes(), 1);

    let err = deliver(&endpoints.client_session, &mut endpoints.server).unwrap_err();
    assert_eq!(err, ChannelError::Decode { status: Status::Closed });
}

#[test]
fn websocket_frames_over_tls() {
    let tls = TlsConfigs::localhost();
    let mut endpoints = Endpoints::new(&tls);
    endpoints.handshake();
    let Endpoints { client, server, client_session, server_session, .. } = endpoints;

    let config = WebSocketConfig { ping_interval: None };
    let client_sink = CollectingSink::new();
    let server_sink = CollectingSink::new();
    let client = WebSocketConnection::builder(client_session.clone(), WebSocketPolicy::client())
        .config(config)
        .secure(client)
        .incoming(client_sink.clone())
        .build()
        .unwrap();
    let server = WebSocketConnection::builder(server_session.clone(), WebSocketPolicy::server())
        .config(config)
        .secure(server)
        .incoming(server_sink.clone())
        .build()
        .unwrap();
    assert!(client.is_encrypted() && client.is_handshake_finished());

    client.outgoing_frame(Frame::text("hello over tls"), Completion::noop());
    client.outgoing_frame(Frame::ping(Bytes::from_static(b"hb")), Completion::noop());
    pump(&client_session, &server);
    let bodies: Vec<_> = server_sink.take_frames().into_iter().map(|frame| frame.body).collect();
    assert_eq!(
        bodies,
        vec![FrameBody::Text("hello over tls".into()), FrameBody::Ping(Bytes::from_static(b"hb"))]
    );

    pump(&server_session, &client);
    let bodies: Vec<_> = client_sink.take_frames().into_iter().map(|frame| frame.body).collect();
    assert_eq!(bodies, vec![FrameBody::Pong(Bytes::from_static(b"hb"))]);
}

#[test]
fn alpn_agrees_on_a_common_protocol() {
    let tls = TlsConfigs::localhost();
    let name = ServerName::try_from("localhost").unwrap();
    let client =
        RustlsEngine::client_with_protocols(&tls.client, name, &[b"h2", b"http/1.1"]).unwrap();
    let server = RustlsEngine::server_with_protocols(&tls.server, &[b"http/1.1"]).unwrap();

    let mut endpoints = Endpoints::with_engines(client, server);
    assert_eq!(endpoints.client.negotiated_protocol(), None);
    endpoints.handshake();

    assert_eq!(endpoints.client.negotiated_protocol(), Some(&b"http/1.1"[..]));
    assert_eq!(endpoints.server.negotiated_protocol(), Some(&b"http/1.1"[..]));
}

#[test]
fn alpn_without_a_common_protocol_fails_the_handshake() {
    let tls = TlsConfigs::localhost();
    let name = ServerName::try_from("localhost").unwrap();
    let client = RustlsEngine::client_with_protocols(&tls.client, name, &[b"h2"]).unwrap();
    let server = RustlsEngine::server_with_protocols(&tls.server, &[b"http/1.1"]).unwrap();

    let mut endpoints = Endpoints::with_engines(client, server);
    let err = deliver(&endpoints.client_session, &mut endpoints.server).unwrap_err();
    assert!(matches!(err, ChannelError::Engine(_)));
    assert!(!endpoints.server.is_handshake_finished());
}
