/// Serial port profile link state
///
/// Tracks the classic Bluetooth link of the SPP path. The socket itself is
/// owned by the byte bridge; this only records whether a session is live,
/// which one, and since when.

use crate::transport::abstraction::LinkState;
use parking_lot::RwLock;
use std::time::Instant;
use tracing::{debug, info};

/// Identifier of one SPP session (one `ServiceOpen`)
pub type SessionId = u64;

#[derive(Debug)]
struct SppRecord {
    state: LinkState,
    session: Option<SessionId>,
    next_session: SessionId,
    established_at: Option<Instant>,
}

/// Link context of the SPP path
#[derive(Debug)]
pub struct SppLink {
    record: RwLock<SppRecord>,
}

impl SppLink {
    pub fn new() -> Self {
        Self {
            record: RwLock::new(SppRecord {
                state: LinkState::Idle,
                session: None,
                next_session: 1,
                established_at: None,
            }),
        }
    }

    /// Server started and discoverable
    pub fn on_server_started(&self) {
        let mut record = self.record.write();
        if record.state == LinkState::Idle {
            record.state = LinkState::Advertising;
        }
        debug!("SPP server listening (state {})", record.state);
    }

    /// A client opened the service; returns the new session id
    pub fn on_connect(&self) -> SessionId {
        let mut record = self.record.write();
        let id = record.next_session;
        record.next_session += 1;
        record.state = LinkState::Connected;
        record.session = Some(id);
        record.established_at = Some(Instant::now());
        info!("SPP session {} opened", id);
        id
    }

    /// Session ended. Ignored if `session` is no longer the current one.
    pub fn on_disconnect(&self, session: SessionId) {
        let mut record = self.record.write();
        if record.session != Some(session) {
            debug!("SPP session {} already superseded", session);
            return;
        }
        record.state = LinkState::Advertising;
        record.session = None;
        record.established_at = None;
        info!("SPP session {} closed", session);
    }

    pub fn state(&self) -> LinkState {
        self.record.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.record.read().state == LinkState::Connected
    }

    pub fn session(&self) -> Option<SessionId> {
        self.record.read().session
    }

    pub fn established_at(&self) -> Option<Instant> {
        self.record.read().established_at
    }
}

impl Default for SppLink {
    fn default() -> Self {
        Self::new()
    }
}
