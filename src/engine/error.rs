//! Fatal execution errors. Soft failures (publish, subscribe, log I/O)
//! are logged where they happen and never surface here.

use thiserror::Error;

use crate::mqtt::session::SessionError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The initial broker handshake failed; the script cannot proceed.
    #[error("CONNECT failed: {0}")]
    Connect(SessionError),

    /// `CFG_*` after the first `CONNECT`; the connection snapshot is
    /// frozen once a session exists.
    #[error("{0} issued after CONNECT; configuration is frozen once a session exists")]
    ConfigAfterConnect(&'static str),

    /// A command that needs a live session ran without one.
    #[error("{0} requires an active session (no CONNECT yet, or already disconnected)")]
    NotConnected(&'static str),

    /// `CONNECT` while a session is already live.
    #[error("CONNECT while a session is already active; DISCONNECT first")]
    AlreadyConnected,
}
