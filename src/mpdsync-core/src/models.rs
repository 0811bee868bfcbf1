use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Song id reported by the server when nothing is queued for playback.
pub const NO_SONG: i32 = -1;

/// Playlist version used while the server's playlist has never been observed.
pub const UNKNOWN_PLAYLIST_VERSION: i64 = -1;

/// Playback state as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Unknown,
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Unknown => "unknown",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// A song record as returned by the server.
///
/// `file` is the unique key within a playlist. `pos` and `id` are only present
/// for entries that live in the current playlist.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Song {
    pub file: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<String>,
    /// Duration in seconds when known.
    pub duration_seconds: Option<u32>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub pos: Option<u32>,
    pub id: Option<u32>,
}

impl Song {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// Title when tagged, otherwise the last path component of `file`.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => self.file.rsplit('/').next().unwrap_or(&self.file),
        }
    }
}

/// Typed result of the server's combined status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub song_id: i32,
    pub state: PlaybackState,
    pub volume: Option<u8>,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub playlist_version: i64,
    pub playlist_length: u32,
    pub random: bool,
    pub repeat: bool,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self {
            song_id: NO_SONG,
            state: PlaybackState::Unknown,
            volume: None,
            elapsed_seconds: 0,
            total_seconds: 0,
            playlist_version: UNKNOWN_PLAYLIST_VERSION,
            playlist_length: 0,
            random: false,
            repeat: false,
        }
    }
}

/// Typed result of the server's stats query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerStats {
    pub artists: u32,
    pub albums: u32,
    pub songs: u32,
    pub uptime_seconds: u64,
    pub db_playtime_seconds: u64,
    /// Unix timestamp of the last database update.
    pub db_update: u64,
}

/// The cached set of scalar status fields describing the session.
///
/// Snapshots are only ever replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub song_id: i32,
    pub state: PlaybackState,
    pub volume: Option<u8>,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub playlist_version: i64,
    pub playlist_length: u32,
    pub random: bool,
    pub repeat: bool,
    pub db_update: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl StatusSnapshot {
    /// Value set used whenever the session has no server connection.
    pub fn disconnected() -> Self {
        Self {
            song_id: 0,
            state: PlaybackState::Unknown,
            volume: None,
            elapsed_seconds: 0,
            total_seconds: 0,
            playlist_version: UNKNOWN_PLAYLIST_VERSION,
            playlist_length: 0,
            random: false,
            repeat: false,
            db_update: 0,
        }
    }

    pub fn from_server(status: &ServerStatus, stats: &ServerStats) -> Self {
        Self {
            song_id: status.song_id,
            state: status.state,
            volume: status.volume,
            elapsed_seconds: status.elapsed_seconds,
            total_seconds: status.total_seconds,
            playlist_version: status.playlist_version,
            playlist_length: status.playlist_length,
            random: status.random,
            repeat: status.repeat,
            db_update: stats.db_update,
        }
    }

    /// Fields whose values differ between `self` (previous) and `next`.
    pub fn diff(&self, next: &StatusSnapshot) -> ChangeSet {
        let mut changed = ChangeSet::new();
        if self.song_id != next.song_id {
            changed.insert(ChangedField::Song);
        }
        if self.state != next.state {
            changed.insert(ChangedField::State);
        }
        if self.volume != next.volume {
            changed.insert(ChangedField::Volume);
        }
        if self.elapsed_seconds != next.elapsed_seconds || self.total_seconds != next.total_seconds
        {
            changed.insert(ChangedField::Elapsed);
        }
        if self.playlist_version != next.playlist_version
            || self.playlist_length != next.playlist_length
        {
            changed.insert(ChangedField::Playlist);
        }
        if self.random != next.random {
            changed.insert(ChangedField::Random);
        }
        if self.repeat != next.repeat {
            changed.insert(ChangedField::Repeat);
        }
        if self.db_update != next.db_update {
            changed.insert(ChangedField::DbTime);
        }
        changed
    }
}

/// Notification topics, one per snapshot field group.
///
/// Declaration order is the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Song,
    State,
    Volume,
    /// Elapsed or total track time.
    Elapsed,
    /// Playlist version or length.
    Playlist,
    Random,
    Repeat,
    DbTime,
}

impl ChangedField {
    pub const ALL: [ChangedField; 8] = [
        ChangedField::Song,
        ChangedField::State,
        ChangedField::Volume,
        ChangedField::Elapsed,
        ChangedField::Playlist,
        ChangedField::Random,
        ChangedField::Repeat,
        ChangedField::DbTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangedField::Song => "song",
            ChangedField::State => "state",
            ChangedField::Volume => "volume",
            ChangedField::Elapsed => "elapsed",
            ChangedField::Playlist => "playlist",
            ChangedField::Random => "random",
            ChangedField::Repeat => "repeat",
            ChangedField::DbTime => "dbtime",
        }
    }
}

/// Ordered set of changed fields produced by one poll.
pub type ChangeSet = BTreeSet<ChangedField>;

/// A single queued structural edit to the remote playlist.
///
/// Positions and ids are signed so stale UI state can hand in values that are
/// skipped at commit time instead of being rejected at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Append(String),
    DeleteById(i32),
    DeleteByPosition(i32),
    Move { from: i32, to: i32 },
}
