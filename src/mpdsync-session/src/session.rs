use mpdsync_core::{
    ChangedField, Command, Connector, Mutation, PlaybackState, ServerConfig, Song,
    StatusSnapshot, Transport, TransportError, TransportResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::mutations::{to_commands, MutationQueue};
use crate::notify::{ConnectionEvent, Notifier, SubscriptionId};
use crate::playlist::{PlaylistEntry, PlaylistView};
use crate::lock;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to a server")]
    NotConnected,
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: TransportError,
    },
    #[error("connection lost: {0}")]
    Transport(#[from] TransportError),
    #[error("no song is currently playing")]
    NoCurrentSong,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Parameters for [`Session::connect`].
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub password: Option<String>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(10),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&ServerConfig> for ConnectOptions {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            timeout: server.timeout(),
            password: server.password.clone(),
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Outcome of a [`Session::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitSummary {
    /// Commands sent in the batch.
    pub submitted: usize,
    /// Mutations dropped because their arguments could never be valid.
    pub skipped: usize,
    /// Mutations thrown away because the session was offline.
    pub discarded: usize,
}

/// Cached view of the server. Never locked across a network round trip.
pub(crate) struct SessionState {
    pub(crate) snapshot: StatusSnapshot,
    pub(crate) current_song: Option<Song>,
    pub(crate) playlist: PlaylistView,
}

pub(crate) type Link = Option<Box<dyn Transport>>;

/// Client-side session with one media server.
///
/// All methods take `&self`; share it behind an `Arc` when polling runs on a
/// worker thread. Only `connect`, `poll*`, `commit`, `sync_playlist` and the
/// playback controls touch the network; they serialize on the link lock while
/// the cached reads only take the short-lived state lock.
///
/// Lock order: `commit_lock`, then `link`, then `state`.
pub struct Session {
    connector: Box<dyn Connector>,
    pub(crate) link: Mutex<Link>,
    connected: AtomicBool,
    pub(crate) state: Mutex<SessionState>,
    mutations: MutationQueue,
    pub(crate) notifier: Notifier,
    pub(crate) poll_in_flight: AtomicBool,
    commit_lock: Mutex<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Session")
            .field("connected", &self.is_connected())
            .field("snapshot", &state.snapshot)
            .field("playlist_length", &state.playlist.len())
            .field("pending_mutations", &self.mutations.len())
            .finish()
    }
}

impl Session {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            link: Mutex::new(None),
            connected: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                snapshot: StatusSnapshot::disconnected(),
                current_song: None,
                playlist: PlaylistView::new(),
            }),
            mutations: MutationQueue::new(),
            notifier: Notifier::new(),
            poll_in_flight: AtomicBool::new(false),
            commit_lock: Mutex::new(()),
        }
    }

    /// Opens a connection, authenticates when a password is given and checks
    /// the link with a stats query. Does nothing when already connected.
    ///
    /// Failures leave the session disconnected and are also reported to error
    /// subscribers.
    pub fn connect(&self, options: &ConnectOptions) -> SessionResult<()> {
        {
            let mut link = lock(&self.link);
            if link.is_some() {
                tracing::debug!(host = %options.host, port = options.port, "already connected");
                return Ok(());
            }

            match self.open_validated(options) {
                Ok(transport) => {
                    *link = Some(transport);
                    self.connected.store(true, Ordering::Release);
                }
                Err(source) => {
                    drop(link);
                    tracing::warn!(
                        host = %options.host,
                        port = options.port,
                        error = %source,
                        "connection attempt failed"
                    );
                    let err = SessionError::Connect {
                        host: options.host.clone(),
                        port: options.port,
                        source,
                    };
                    self.notifier.error(&err.to_string());
                    return Err(err);
                }
            }
        }

        tracing::info!(host = %options.host, port = options.port, "connected");
        self.notifier.connection(ConnectionEvent::Connected);
        Ok(())
    }

    fn open_validated(&self, options: &ConnectOptions) -> TransportResult<Box<dyn Transport>> {
        let mut transport = self
            .connector
            .open(&options.host, options.port, options.timeout)?;
        if let Err(err) = validate(transport.as_mut(), options.password.as_deref()) {
            transport.close();
            return Err(err);
        }
        Ok(transport)
    }

    /// Drops the connection. The snapshot is left alone until the next poll.
    pub fn disconnect(&self) {
        let released = self.release(&mut lock(&self.link));
        if released {
            tracing::info!("disconnected");
            self.notifier.connection(ConnectionEvent::Disconnected);
        }
    }

    /// Does not wait for a round trip in flight on another thread.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Closes and forgets the transport. Returns whether one was present.
    pub(crate) fn release(&self, link: &mut Link) -> bool {
        match link.take() {
            Some(mut transport) => {
                self.connected.store(false, Ordering::Release);
                transport.close();
                true
            }
            None => false,
        }
    }

    /// Called with the state lock already released, after a transport failure
    /// has torn the connection down.
    pub(crate) fn report_connection_lost(&self, err: &TransportError) {
        tracing::warn!(error = %err, "transport error, disconnecting");
        self.notifier.error(&format!("Connection lost: {err}"));
        self.notifier.connection(ConnectionEvent::Disconnected);
    }

    // Notifications.

    pub fn subscribe<F>(&self, field: ChangedField, callback: F) -> SubscriptionId
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        self.notifier.subscribe(field, callback)
    }

    pub fn on_connection<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        self.notifier.on_connection(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.notifier.on_error(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // Cached reads.

    pub fn snapshot(&self) -> StatusSnapshot {
        lock(&self.state).snapshot.clone()
    }

    pub fn current_song(&self) -> Option<Song> {
        lock(&self.state).current_song.clone()
    }

    pub fn current_state(&self) -> PlaybackState {
        lock(&self.state).snapshot.state
    }

    pub fn current_volume(&self) -> Option<u8> {
        lock(&self.state).snapshot.volume
    }

    pub fn current_elapsed(&self) -> u32 {
        lock(&self.state).snapshot.elapsed_seconds
    }

    pub fn current_total(&self) -> u32 {
        lock(&self.state).snapshot.total_seconds
    }

    pub fn playlist_length(&self) -> u32 {
        lock(&self.state).snapshot.playlist_length
    }

    pub fn playlist_id(&self) -> i64 {
        lock(&self.state).snapshot.playlist_version
    }

    pub fn random(&self) -> bool {
        lock(&self.state).snapshot.random
    }

    pub fn repeat(&self) -> bool {
        lock(&self.state).snapshot.repeat
    }

    pub fn db_update(&self) -> u64 {
        lock(&self.state).snapshot.db_update
    }

    /// Value copy of the local playlist view.
    pub fn playlist(&self) -> Vec<PlaylistEntry> {
        lock(&self.state).playlist.entries().to_vec()
    }

    pub fn now_playing_position(&self) -> Option<usize> {
        lock(&self.state).playlist.now_playing()
    }

    // Mutation queue.

    pub fn enqueue_append(&self, path: impl Into<String>) {
        self.mutations.push(Mutation::Append(path.into()));
    }

    pub fn enqueue_delete_by_id(&self, id: i32) {
        self.mutations.push(Mutation::DeleteById(id));
    }

    pub fn enqueue_delete_by_position(&self, position: i32) {
        self.mutations.push(Mutation::DeleteByPosition(position));
    }

    pub fn enqueue_move(&self, from: i32, to: i32) {
        self.mutations.push(Mutation::Move { from, to });
    }

    pub fn pending_mutations(&self) -> Vec<Mutation> {
        self.mutations.pending()
    }

    /// Flushes queued mutations as one command list, then polls once.
    ///
    /// Offline, the queue is discarded. If the batch fails the session
    /// disconnects and none of the batch is assumed applied. Concurrent calls
    /// are serialized up to the point the batch is sent; the follow-up poll
    /// runs outside the commit lock, so a subscriber may commit again.
    pub fn commit(&self) -> SessionResult<CommitSummary> {
        // Callbacks only run once the commit lock is released.
        let sent = {
            let _commit = lock(&self.commit_lock);
            self.send_batch()
        };
        match sent {
            Ok(summary) => {
                if summary.submitted > 0 {
                    self.resync_after("commit");
                }
                Ok(summary)
            }
            Err(err) => {
                self.report_connection_lost(&err);
                Err(SessionError::Transport(err))
            }
        }
    }

    /// Drains the queue and submits it. On failure the transport has already
    /// been released.
    fn send_batch(&self) -> TransportResult<CommitSummary> {
        let batch = self.mutations.drain();

        let mut link = lock(&self.link);
        let Some(transport) = link.as_mut() else {
            if !batch.is_empty() {
                tracing::debug!(discarded = batch.len(), "not connected, discarding queued mutations");
            }
            return Ok(CommitSummary {
                discarded: batch.len(),
                ..CommitSummary::default()
            });
        };

        let (commands, skipped) = to_commands(&batch);
        if commands.is_empty() {
            return Ok(CommitSummary {
                skipped,
                ..CommitSummary::default()
            });
        }

        if let Err(err) = checked(transport.as_mut(), |t| t.execute_batch(&commands)) {
            self.release(&mut link);
            return Err(err);
        }
        drop(link);

        tracing::debug!(submitted = commands.len(), skipped, "committed playlist mutations");
        Ok(CommitSummary {
            submitted: commands.len(),
            skipped,
            discarded: 0,
        })
    }

    // Playback controls.

    fn run(&self, command: Command) -> SessionResult<()> {
        let mut link = lock(&self.link);
        let transport = link.as_mut().ok_or(SessionError::NotConnected)?;
        if let Err(err) = checked(transport.as_mut(), |t| t.execute(&command)) {
            self.release(&mut link);
            drop(link);
            self.report_connection_lost(&err);
            return Err(SessionError::Transport(err));
        }
        drop(link);

        tracing::debug!(?command, "executed playback command");
        self.resync_after("playback command");
        Ok(())
    }

    pub fn play(&self) -> SessionResult<()> {
        self.run(Command::Play)
    }

    pub fn pause(&self) -> SessionResult<()> {
        self.run(Command::Pause(true))
    }

    pub fn resume(&self) -> SessionResult<()> {
        self.run(Command::Pause(false))
    }

    /// Pauses while playing, resumes while paused, starts otherwise.
    pub fn toggle_pause(&self) -> SessionResult<()> {
        match self.current_state() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            _ => self.play(),
        }
    }

    pub fn stop(&self) -> SessionResult<()> {
        self.run(Command::Stop)
    }

    pub fn next(&self) -> SessionResult<()> {
        self.run(Command::Next)
    }

    pub fn previous(&self) -> SessionResult<()> {
        self.run(Command::Previous)
    }

    /// Values above 100 are clamped.
    pub fn set_volume(&self, volume: u8) -> SessionResult<()> {
        self.run(Command::SetVolume(volume.min(100)))
    }

    pub fn set_random(&self, random: bool) -> SessionResult<()> {
        self.run(Command::SetRandom(random))
    }

    pub fn set_repeat(&self, repeat: bool) -> SessionResult<()> {
        self.run(Command::SetRepeat(repeat))
    }

    /// Seeks within the current song.
    pub fn seek(&self, seconds: u32) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let pos = {
            let state = lock(&self.state);
            state
                .current_song
                .as_ref()
                .and_then(|song| song.pos)
                .ok_or(SessionError::NoCurrentSong)?
        };
        self.run(Command::Seek { pos, seconds })
    }
}

fn validate(transport: &mut dyn Transport, password: Option<&str>) -> TransportResult<()> {
    if let Some(password) = password {
        transport.authenticate(password)?;
    }
    transport.stats()?;
    Ok(())
}

/// Runs `op` and then consults the transport's error flag, so failures the
/// transport recorded without returning them still count.
pub(crate) fn checked<T>(
    transport: &mut dyn Transport,
    op: impl FnOnce(&mut dyn Transport) -> TransportResult<T>,
) -> TransportResult<T> {
    let value = op(&mut *transport)?;
    match transport.last_error() {
        Some(err) => Err(err.clone()),
        None => Ok(value),
    }
}
