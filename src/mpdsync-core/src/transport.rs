use crate::models::{ServerStats, ServerStatus, Song};
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a transport. Every variant leaves the handle unusable
/// from the session's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("i/o error: {message}")]
    Io { message: String },
    #[error("authentication rejected: {message}")]
    Auth { message: String },
    #[error("server rejected `{command}` (code {code}): {message}")]
    Server {
        code: u32,
        command: String,
        message: String,
    },
    #[error("malformed server response: {message}")]
    Protocol { message: String },
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Protocol-level rejections, as opposed to failures of the connection itself.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            TransportError::Server { .. } | TransportError::Protocol { .. }
        )
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Remote operations the session issues, either alone or inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { path: String },
    DeleteId { id: u32 },
    Delete { pos: u32 },
    Move { from: u32, to: u32 },
    Play,
    Pause(bool),
    Stop,
    Next,
    Previous,
    SetVolume(u8),
    SetRandom(bool),
    SetRepeat(bool),
    Seek { pos: u32, seconds: u32 },
}

/// Opens transports. Held by the session for its whole lifetime so it can
/// reconnect any number of times.
pub trait Connector: Send + Sync {
    fn open(&self, host: &str, port: u16, timeout: Duration) -> TransportResult<Box<dyn Transport>>;
}

/// An open connection to the media server.
///
/// Implementations record the most recent failure so it can be read back via
/// [`Transport::last_error`] after a sequence of operations.
pub trait Transport: Send {
    fn authenticate(&mut self, password: &str) -> TransportResult<()>;

    fn status(&mut self) -> TransportResult<ServerStatus>;

    fn stats(&mut self) -> TransportResult<ServerStats>;

    /// The song the server considers current, if any.
    fn current_song(&mut self) -> TransportResult<Option<Song>>;

    /// Playlist entries whose position or content changed since `version`.
    fn playlist_changes(&mut self, version: i64) -> TransportResult<Vec<Song>>;

    /// The entire playlist in position order.
    fn playlist_info(&mut self) -> TransportResult<Vec<Song>> {
        self.playlist_changes(0)
    }

    fn execute(&mut self, command: &Command) -> TransportResult<()>;

    /// Executes `commands` as one atomic list; all or nothing from the caller's view.
    fn execute_batch(&mut self, commands: &[Command]) -> TransportResult<()>;

    fn last_error(&self) -> Option<&TransportError>;

    fn close(&mut self);
}
