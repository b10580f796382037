//! Connection lifecycle state machine.
//!
//! ```text
//! Connecting ──on_opened──> Opened ──on_close_local──> LocalClosing ──on_close_remote──┐
//!                             │                                                        v
//!                             └────on_close_remote──> RemoteClosing ──on_close_local──> Closed
//! ```
//!
//! `on_disconnected` moves any state to `Closed`. Every transition is
//! idempotent; repeating one leaves the recorded close details untouched.

use ironwire_proto::CloseInfo;

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not yet opened
    Connecting,
    /// Open in both directions
    Opened,
    /// We sent a Close frame and wait for the peer's
    LocalClosing,
    /// The peer sent a Close frame we have not answered
    RemoteClosing,
    /// Terminal
    Closed,
}

/// Which side started the close handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseInitiator {
    /// This endpoint sent the first Close frame
    Local,
    /// The peer sent the first Close frame
    Remote,
}

/// Lifecycle state plus the close details recorded along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoState {
    state: ConnectionState,
    initiator: Option<CloseInitiator>,
    local_close: Option<CloseInfo>,
    remote_close: Option<CloseInfo>,
}

impl IoState {
    /// State machine in [`ConnectionState::Connecting`].
    pub fn new() -> Self {
        Self { state: ConnectionState::Connecting, initiator: None, local_close: None, remote_close: None }
    }

    /// The connection was established.
    pub fn on_opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Opened;
        }
    }

    /// A Close frame was sent.
    pub fn on_close_local(&mut self, info: CloseInfo) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Opened => {
                self.initiator = Some(CloseInitiator::Local);
                self.local_close = Some(info);
                self.state = ConnectionState::LocalClosing;
            },
            ConnectionState::RemoteClosing => {
                self.local_close = Some(info);
                self.state = ConnectionState::Closed;
            },
            ConnectionState::LocalClosing | ConnectionState::Closed => {},
        }
    }

    /// A Close frame was received.
    pub fn on_close_remote(&mut self, info: CloseInfo) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Opened => {
                self.initiator = Some(CloseInitiator::Remote);
                self.remote_close = Some(info);
                self.state = ConnectionState::RemoteClosing;
            },
            ConnectionState::LocalClosing => {
                self.remote_close = Some(info);
                self.state = ConnectionState::Closed;
            },
            ConnectionState::RemoteClosing | ConnectionState::Closed => {},
        }
    }

    /// The transport went away.
    pub fn on_disconnected(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether frames may flow in both directions
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Opened
    }

    /// Whether `Closed` was reached
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Which side started closing, if any
    pub fn initiator(&self) -> Option<CloseInitiator> {
        self.initiator
    }

    /// Close details sent by this endpoint
    pub fn local_close(&self) -> Option<&CloseInfo> {
        self.local_close.as_ref()
    }

    /// Close details received from the peer
    pub fn remote_close(&self) -> Option<&CloseInfo> {
        self.remote_close.as_ref()
    }

    /// Close details of the side that initiated closing.
    pub fn close_info(&self) -> Option<&CloseInfo> {
        match self.initiator? {
            CloseInitiator::Local => self.local_close.as_ref(),
            CloseInitiator::Remote => self.remote_close.as_ref(),
        }
    }

    /// Whether both Close frames were exchanged
    pub fn was_clean_close(&self) -> bool {
        self.local_close.is_some() && self.remote_close.is_some()
    }
}

impl Default for IoState {
    fn default() -> Self {
        Self::new()
    }
}
