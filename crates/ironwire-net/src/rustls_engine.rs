//! [`RecordEngine`] over a rustls connection.
//!
//! rustls buffers internally and exposes `read_tls` / `process_new_packets`
//! / `reader` for the inbound side and `writer` / `write_tls` for the
//! outbound side. This adapter maps those onto wrap and unwrap:
//!
//! - `unwrap` feeds the source into rustls, processes it and copies
//!   whatever plaintext is ready into the destination. Partial records are
//!   held inside rustls, so a source is consumed even when it completes
//!   nothing.
//! - `wrap` hands at most one record's worth of plaintext to rustls, then
//!   copies the TLS bytes it produced into the destination. TLS bytes that
//!   do not fit stay staged for the next call.
//!
//! rustls runs no delegated tasks. ALPN is configured on the rustls configs;
//! the `*_with_protocols` constructors set the protocol list for one engine.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use ironwire_core::secure::{
    DelegatedTask, EngineError, EngineResult, HandshakeStatus, RecordEngine, Status,
};
use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    pki_types::ServerName,
};
use tracing::debug;

/// Largest plaintext carried by one TLS record.
const MAX_PLAINTEXT: usize = 16 * 1024;

/// Header, padding and tag bytes a record may add to its plaintext.
const RECORD_OVERHEAD: usize = 5 + 2048;

/// TLS record engine backed by rustls.
pub struct RustlsEngine {
    conn: Connection,
    /// TLS bytes produced by rustls but not yet handed out by `wrap`
    outbound: Vec<u8>,
    finished_reported: bool,
    inbound_closed: bool,
    outbound_closed: bool,
}

impl RustlsEngine {
    /// Client engine connecting to `server_name`.
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, EngineError> {
        let conn = ClientConnection::new(config, server_name).map_err(tls_failure)?;
        Ok(Self::new(conn.into()))
    }

    /// Client engine offering `protocols` through ALPN, most preferred
    /// first. Replaces any protocol list already set on `config`.
    pub fn client_with_protocols(
        config: &ClientConfig,
        server_name: ServerName<'static>,
        protocols: &[&[u8]],
    ) -> Result<Self, EngineError> {
        let mut config = config.clone();
        config.alpn_protocols = protocol_list(protocols);
        Self::client(Arc::new(config), server_name)
    }

    /// Server engine.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, EngineError> {
        let conn = ServerConnection::new(config).map_err(tls_failure)?;
        Ok(Self::new(conn.into()))
    }

    /// Server engine accepting `protocols` through ALPN, most preferred
    /// first. A client offering protocols that all miss this list fails the
    /// handshake.
    pub fn server_with_protocols(
        config: &ServerConfig,
        protocols: &[&[u8]],
    ) -> Result<Self, EngineError> {
        let mut config = config.clone();
        config.alpn_protocols = protocol_list(protocols);
        Self::server(Arc::new(config))
    }

    fn new(conn: Connection) -> Self {
        Self {
            conn,
            outbound: Vec::new(),
            finished_reported: false,
            inbound_closed: false,
            outbound_closed: false,
        }
    }

    fn status(&self) -> HandshakeStatus {
        if self.finished_reported {
            HandshakeStatus::NotHandshaking
        } else if self.conn.wants_write() || !self.outbound.is_empty() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::Finished
        }
    }

    /// Like `status`, but `Finished` is returned only once.
    fn next_status(&mut self) -> HandshakeStatus {
        let status = self.status();
        if status == HandshakeStatus::Finished {
            self.finished_reported = true;
        }
        status
    }

    fn result(&mut self, status: Status, consumed: usize, produced: usize) -> EngineResult {
        EngineResult {
            status,
            handshake_status: self.next_status(),
            bytes_consumed: consumed,
            bytes_produced: produced,
        }
    }

    fn stage_outbound(&mut self) -> Result<(), EngineError> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.outbound).map_err(io_failure)?;
        }
        Ok(())
    }
}

impl RecordEngine for RustlsEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        // rustls queues the ClientHello when the connection is created.
        Ok(())
    }

    fn is_client_mode(&self) -> bool {
        matches!(self.conn, Connection::Client(_))
    }

    fn handshake_status(&self) -> HandshakeStatus {
        self.status()
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let mut consumed = 0;
        let accepts_plaintext =
            !self.outbound_closed && !self.conn.is_handshaking() && self.outbound.is_empty();
        if accepts_plaintext && !src.is_empty() {
            if dst.len() <= RECORD_OVERHEAD {
                return Ok(self.result(Status::BufferOverflow, 0, 0));
            }
            let chunk = src.len().min(MAX_PLAINTEXT).min(dst.len() - RECORD_OVERHEAD);
            consumed = self.conn.writer().write(&src[..chunk]).map_err(io_failure)?;
        }

        self.stage_outbound()?;
        if !self.outbound.is_empty() && dst.is_empty() {
            return Ok(self.result(Status::BufferOverflow, consumed, 0));
        }

        let produced = self.outbound.len().min(dst.len());
        dst[..produced].copy_from_slice(&self.outbound[..produced]);
        self.outbound.drain(..produced);

        let status = if self.outbound_closed { Status::Closed } else { Status::Ok };
        Ok(self.result(status, consumed, produced))
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if self.inbound_closed {
            return Ok(self.result(Status::Closed, 0, 0));
        }

        // Plaintext left over from an overflow is drained before rustls
        // takes more input.
        let pending = self.conn.process_new_packets().map_err(tls_failure)?.plaintext_bytes_to_read();

        let mut consumed = 0;
        if pending == 0 && !src.is_empty() {
            // An empty reader would be taken as end of stream.
            let mut reader = src;
            consumed = self.conn.read_tls(&mut reader).map_err(io_failure)?;
        }
        let io_state = self.conn.process_new_packets().map_err(tls_failure)?;

        let available = io_state.plaintext_bytes_to_read();
        let produced = if available > 0 && !dst.is_empty() {
            self.conn.reader().read(dst).map_err(io_failure)?
        } else {
            0
        };

        let status = if produced < available {
            Status::BufferOverflow
        } else if produced == 0 && io_state.peer_has_closed() {
            debug!("peer sent close_notify");
            Status::Closed
        } else if consumed == 0 && produced == 0 {
            Status::BufferUnderflow
        } else {
            Status::Ok
        };
        Ok(self.result(status, consumed, produced))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.outbound_closed = true;
            self.conn.send_close_notify();
        }
    }

    fn application_buffer_size(&self) -> usize {
        MAX_PLAINTEXT
    }

    fn packet_buffer_size(&self) -> usize {
        MAX_PLAINTEXT + RECORD_OVERHEAD
    }

    fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }
}

fn protocol_list(protocols: &[&[u8]]) -> Vec<Vec<u8>> {
    protocols.iter().map(|protocol| protocol.to_vec()).collect()
}

fn tls_failure(error: rustls::Error) -> EngineError {
    EngineError::Failure(error.to_string())
}

fn io_failure(error: io::Error) -> EngineError {
    EngineError::Failure(error.to_string())
}
