#![allow(dead_code)]
//! Scripted in-memory server for session tests.

use mpdsync_core::{
    Command, Connector, PlaybackState, ServerStats, ServerStatus, Song, Transport,
    TransportError, TransportResult,
};
use mpdsync_session::{ConnectOptions, Session};
use std::collections::BTreeMap;
use std::sync::{Arc, Barrier, Mutex, MutexGuard};
use std::time::Duration;

/// Every operation the session performed against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Authenticate(String),
    Status,
    Stats,
    CurrentSong,
    PlaylistChanges(i64),
    PlaylistInfo,
    Execute(Command),
    Batch(Vec<Command>),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Status,
    Stats,
    Batch,
    Execute,
}

/// Holds a fake round trip open until the test lets it go.
#[derive(Debug)]
pub struct Gate {
    entered: Barrier,
    released: Barrier,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Barrier::new(2),
            released: Barrier::new(2),
        })
    }

    /// Blocks until a gated call is in progress.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Lets the gated call return.
    pub fn release(&self) {
        self.released.wait();
    }

    fn pass(&self) {
        self.entered.wait();
        self.released.wait();
    }
}

#[derive(Debug)]
pub struct ServerState {
    pub status: ServerStatus,
    pub stats: ServerStats,
    pub current_song: Option<Song>,
    pub playlist: Vec<Song>,
    /// `playlist_changes` responses, keyed by the version asked about.
    pub changes: BTreeMap<i64, Vec<Song>>,
    pub password: Option<String>,
    pub refuse: bool,
    pub fail_on: Option<FailOn>,
    /// Every `status` call waits on this gate.
    pub status_gate: Option<Arc<Gate>>,
    /// Every batch waits on this gate after it has been recorded.
    pub batch_gate: Option<Arc<Gate>>,
    pub calls: Vec<Call>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            status: ServerStatus {
                song_id: -1,
                state: PlaybackState::Stopped,
                volume: Some(50),
                elapsed_seconds: 0,
                total_seconds: 0,
                playlist_version: 1,
                playlist_length: 0,
                random: false,
                repeat: false,
            },
            stats: ServerStats {
                db_update: 1_700_000_000,
                ..ServerStats::default()
            },
            current_song: None,
            playlist: Vec::new(),
            changes: BTreeMap::new(),
            password: None,
            refuse: false,
            fail_on: None,
            status_gate: None,
            batch_gate: None,
            calls: Vec::new(),
        }
    }
}

impl ServerState {
    /// Replaces the playlist and keeps status length/version consistent.
    pub fn set_playlist(&mut self, version: i64, songs: Vec<Song>) {
        self.status.playlist_version = version;
        self.status.playlist_length = songs.len() as u32;
        self.playlist = songs;
    }

    /// Starts `song` playing; it must be in the playlist.
    pub fn play_position(&mut self, pos: usize) {
        let song = self.playlist[pos].clone();
        self.status.song_id = song.id.map(|id| id as i32).unwrap_or(-1);
        self.status.state = PlaybackState::Playing;
        self.status.total_seconds = song.duration_seconds.unwrap_or(0);
        self.current_song = Some(song);
    }
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(FakeConnector {
            state: Arc::clone(&self.state),
        })
    }

    pub fn session(&self) -> Session {
        Session::new(self.connector())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state().calls)
    }

    pub fn count(&self, call: &Call) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    pub fn batches(&self) -> Vec<Vec<Command>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Batch(commands) => Some(commands.clone()),
                _ => None,
            })
            .collect()
    }
}

struct FakeConnector {
    state: Arc<Mutex<ServerState>>,
}

impl Connector for FakeConnector {
    fn open(
        &self,
        host: &str,
        port: u16,
        _timeout: Duration,
    ) -> TransportResult<Box<dyn Transport>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Open);
        if state.refuse {
            return Err(TransportError::Connect {
                address: format!("{host}:{port}"),
                message: "connection refused".into(),
            });
        }
        Ok(Box::new(FakeTransport {
            state: Arc::clone(&self.state),
            last_error: None,
        }))
    }
}

struct FakeTransport {
    state: Arc<Mutex<ServerState>>,
    last_error: Option<TransportError>,
}

impl FakeTransport {
    fn record(&mut self, call: Call, fail: Option<FailOn>) -> TransportResult<MutexGuard<'_, ServerState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if fail.is_some() && state.fail_on == fail {
            let err = TransportError::Io {
                message: "broken pipe".into(),
            };
            self.last_error = Some(err.clone());
            return Err(err);
        }
        Ok(state)
    }
}

impl Transport for FakeTransport {
    fn authenticate(&mut self, password: &str) -> TransportResult<()> {
        let state = self.record(Call::Authenticate(password.to_string()), None)?;
        if state.password.as_deref() == Some(password) {
            return Ok(());
        }
        drop(state);
        let err = TransportError::Auth {
            message: "incorrect password".into(),
        };
        self.last_error = Some(err.clone());
        Err(err)
    }

    fn status(&mut self) -> TransportResult<ServerStatus> {
        let (status, gate) = {
            let state = self.record(Call::Status, Some(FailOn::Status))?;
            (state.status.clone(), state.status_gate.clone())
        };
        if let Some(gate) = gate {
            gate.pass();
        }
        Ok(status)
    }

    fn stats(&mut self) -> TransportResult<ServerStats> {
        Ok(self.record(Call::Stats, Some(FailOn::Stats))?.stats)
    }

    fn current_song(&mut self) -> TransportResult<Option<Song>> {
        Ok(self.record(Call::CurrentSong, None)?.current_song.clone())
    }

    fn playlist_changes(&mut self, version: i64) -> TransportResult<Vec<Song>> {
        let state = self.record(Call::PlaylistChanges(version), None)?;
        Ok(state
            .changes
            .get(&version)
            .cloned()
            .unwrap_or_else(|| state.playlist.clone()))
    }

    fn playlist_info(&mut self) -> TransportResult<Vec<Song>> {
        Ok(self.record(Call::PlaylistInfo, None)?.playlist.clone())
    }

    fn execute(&mut self, command: &Command) -> TransportResult<()> {
        self.record(Call::Execute(command.clone()), Some(FailOn::Execute))?;
        Ok(())
    }

    /// A successful batch bumps the playlist version, as the real server does.
    fn execute_batch(&mut self, commands: &[Command]) -> TransportResult<()> {
        let gate = {
            let mut state = self.record(Call::Batch(commands.to_vec()), Some(FailOn::Batch))?;
            state.status.playlist_version += 1;
            state.batch_gate.clone()
        };
        if let Some(gate) = gate {
            gate.pass();
        }
        Ok(())
    }

    fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    fn close(&mut self) {
        self.state.lock().unwrap().calls.push(Call::Close);
    }
}

pub fn song(pos: u32, id: u32) -> Song {
    Song {
        file: format!("music/track{id}.mp3"),
        title: Some(format!("Track {id}")),
        artist: Some("Artist".into()),
        duration_seconds: Some(180 + id),
        pos: Some(pos),
        id: Some(id),
        ..Song::default()
    }
}

pub fn songs(count: u32) -> Vec<Song> {
    (0..count).map(|pos| song(pos, pos + 1)).collect()
}

pub fn options() -> ConnectOptions {
    ConnectOptions::new("localhost", 6600).with_timeout(Duration::from_secs(1))
}

/// Connected session that has already absorbed the server's initial state.
pub fn connected(server: &FakeServer) -> Session {
    let session = server.session();
    session.connect(&options()).expect("connect");
    session.poll();
    server.take_calls();
    session
}
