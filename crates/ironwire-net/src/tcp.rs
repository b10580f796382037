//! tokio TCP transport.
//!
//! The stream is split. The write half belongs to a writer task that drains
//! a command queue in order, so [`Session::write`] never blocks. The read
//! half is returned as a [`TcpReader`] for the caller to drive.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::{Bytes, BytesMut};
use ironwire_core::{Completion, ConnectionError, Environment, Session, WebSocketConnection};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::read_size::AdaptiveReadSize;

enum Command {
    Write(Bytes, Completion),
    Shutdown,
}

/// Write side of a TCP connection.
#[derive(Debug)]
pub struct TcpSession {
    id: u64,
    open: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl TcpSession {
    /// Split `stream` and start its writer task on the current runtime.
    pub fn new(stream: TcpStream, id: u64) -> Result<(Arc<Self>, TcpReader), ConnectionError> {
        let runtime = Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;
        if let Err(error) = stream.set_nodelay(true) {
            debug!(session_id = id, %error, "TCP_NODELAY not set");
        }
        let (read_half, write_half) = stream.into_split();
        let (commands, queue) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        runtime.spawn(write_loop(id, write_half, queue, Arc::clone(&open)));

        let session = Arc::new(Self { id, open, commands });
        let reader = TcpReader { id, half: read_half, size: AdaptiveReadSize::new() };
        Ok((session, reader))
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write(data, _) => f.debug_tuple("Write").field(&data.len()).finish(),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl Session for TcpSession {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn write(&self, data: Bytes, completion: Completion) {
        if !self.is_open() {
            completion.failed(ConnectionError::Closed);
            return;
        }
        if let Err(mpsc::error::SendError(Command::Write(_, completion))) =
            self.commands.send(Command::Write(data, completion))
        {
            completion.failed(ConnectionError::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queued writes are flushed before the write half shuts down.
    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(session_id = self.id, "closing TCP session");
            // The writer may already be gone after a failed write.
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

async fn write_loop(
    id: u64,
    mut half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
) {
    while let Some(command) = queue.recv().await {
        match command {
            Command::Write(data, completion) => match half.write_all(&data).await {
                Ok(()) => completion.succeeded(),
                Err(error) => {
                    warn!(session_id = id, %error, "TCP write failed");
                    open.store(false, Ordering::Release);
                    completion.failed(error.into());
                    break;
                },
            },
            Command::Shutdown => {
                if let Err(error) = half.shutdown().await {
                    debug!(session_id = id, %error, "TCP shutdown failed");
                }
                break;
            },
        }
    }

    queue.close();
    while let Ok(command) = queue.try_recv() {
        if let Command::Write(_, completion) = command {
            completion.failed(ConnectionError::Closed);
        }
    }
}

/// Read side of a TCP connection.
#[derive(Debug)]
pub struct TcpReader {
    id: u64,
    half: OwnedReadHalf,
    size: AdaptiveReadSize,
}

impl TcpReader {
    /// Next chunk from the peer. `Ok(None)` at end of stream.
    pub async fn read(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = BytesMut::zeroed(self.size.current());
        let read = self.half.read(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        self.size.record(read);
        buf.truncate(read);
        Ok(Some(buf.freeze()))
    }

    /// Buffer size the next read will use
    pub fn read_size(&self) -> usize {
        self.size.current()
    }

    /// Feed everything the peer sends into `connection` until end of stream,
    /// then close it. Read errors are reported through
    /// [`WebSocketConnection::incoming_error`].
    pub async fn run<E: Environment>(mut self, connection: WebSocketConnection<E>) {
        loop {
            match self.read().await {
                Ok(Some(data)) => {
                    connection.on_bytes(data);
                    if !connection.is_open() {
                        break;
                    }
                },
                Ok(None) => {
                    debug!(session_id = self.id, "peer closed the stream");
                    connection.close();
                    break;
                },
                Err(error) => {
                    connection.incoming_error(error.into());
                    break;
                },
            }
        }
    }
}
