//! Status polling: fetch a fresh snapshot, diff it against the cached one,
//! and keep the current song and playlist view in step.

use mpdsync_core::{
    ChangeSet, ChangedField, Song, StatusSnapshot, Transport, TransportResult,
};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::lock;
use crate::playlist::PlaylistChange;
use crate::session::{checked, Session, SessionError, SessionResult, SessionState};

/// Clears the in-flight flag on drop.
struct PollGuard<'a>(&'a AtomicBool);

impl<'a> PollGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| PollGuard(flag))
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything one connected poll fetched, gathered before any state changes.
struct Fetched {
    snapshot: StatusSnapshot,
    current_song: Option<Option<Song>>,
    playlist: Option<(bool, Vec<Song>)>,
}

impl Session {
    /// Refreshes the snapshot and returns the fields that changed, without
    /// notifying subscribers.
    ///
    /// Returns an empty set if another poll is still in flight.
    pub fn poll_status(&self) -> ChangeSet {
        let Some(_guard) = PollGuard::acquire(&self.poll_in_flight) else {
            tracing::trace!("poll already in flight");
            return ChangeSet::new();
        };
        self.refresh().0
    }

    /// [`Session::poll_status`] followed by one notification per changed field.
    /// The in-flight guard stays held until every callback has returned.
    pub fn poll(&self) -> ChangeSet {
        let Some(_guard) = PollGuard::acquire(&self.poll_in_flight) else {
            tracing::trace!("poll already in flight");
            return ChangeSet::new();
        };
        self.refresh_and_dispatch()
    }

    /// Poll following a remote edit or playback command. When a poll is
    /// already in flight (the edit came from one of its subscribers) nothing
    /// is fetched here and the next poll reports the change.
    pub(crate) fn resync_after(&self, cause: &'static str) {
        let Some(_guard) = PollGuard::acquire(&self.poll_in_flight) else {
            tracing::debug!(cause, "poll in flight, resync left to the next poll");
            return;
        };
        self.refresh_and_dispatch();
    }

    fn refresh_and_dispatch(&self) -> ChangeSet {
        let (changed, snapshot) = self.refresh();
        if !changed.is_empty() {
            tracing::debug!(?changed, "status changed");
        }
        self.notifier.dispatch(&changed, &snapshot);
        changed
    }

    /// Round trips run under the link lock only; `state` is locked for the
    /// diff and swap, so cached reads never wait on the network.
    fn refresh(&self) -> (ChangeSet, StatusSnapshot) {
        let mut link = lock(&self.link);
        let previous = lock(&self.state).snapshot.clone();

        let Some(transport) = link.as_mut() else {
            let next = StatusSnapshot::disconnected();
            let mut state = lock(&self.state);
            let changed = state.snapshot.diff(&next);
            state.current_song = None;
            state.playlist.clear();
            state.snapshot = next.clone();
            return (changed, next);
        };

        match fetch(transport.as_mut(), &previous) {
            Ok(fetched) => {
                let next = fetched.snapshot.clone();
                let changed = previous.diff(&next);
                apply_fetched(&mut lock(&self.state), &changed, fetched);
                (changed, next)
            }
            Err(err) => {
                // Snapshot stays as it was; the next tick takes the offline branch.
                self.release(&mut link);
                drop(link);
                self.report_connection_lost(&err);
                (ChangeSet::new(), previous)
            }
        }
    }

    /// Fetches the playlist entries changed since `previous_version` and applies
    /// them to the local view, truncating to the snapshot's playlist length.
    pub fn sync_playlist(&self, previous_version: i64) -> SessionResult<Vec<PlaylistChange>> {
        let mut link = lock(&self.link);
        let transport = link.as_mut().ok_or(SessionError::NotConnected)?;

        match checked(transport.as_mut(), |t| fetch_playlist(t, previous_version)) {
            Ok((reset, songs)) => {
                let mut state = lock(&self.state);
                let new_length = state.snapshot.playlist_length as usize;
                if reset {
                    state.playlist.clear();
                }
                let changes = state.playlist.apply(songs, new_length);
                let song_id = state.snapshot.song_id;
                state.playlist.highlight(song_id);
                Ok(changes)
            }
            Err(err) => {
                self.release(&mut link);
                drop(link);
                self.report_connection_lost(&err);
                Err(SessionError::Transport(err))
            }
        }
    }

    /// Re-marks the now-playing entry from the cached song id.
    pub fn sync_current_song_highlight(&self) -> Option<usize> {
        let mut state = lock(&self.state);
        let song_id = state.snapshot.song_id;
        state.playlist.highlight(song_id)
    }
}

fn fetch(transport: &mut dyn Transport, previous: &StatusSnapshot) -> TransportResult<Fetched> {
    checked(transport, |t| {
        let status = t.status()?;
        let stats = t.stats()?;
        let snapshot = StatusSnapshot::from_server(&status, &stats);

        let current_song = if snapshot.song_id != previous.song_id {
            Some(t.current_song()?)
        } else {
            None
        };

        let playlist = if snapshot.playlist_version != previous.playlist_version {
            Some(fetch_playlist(t, previous.playlist_version)?)
        } else {
            None
        };

        Ok(Fetched {
            snapshot,
            current_song,
            playlist,
        })
    })
}

/// `(reset, songs)`: an unknown previous version means the view is rebuilt
/// from the full listing.
fn fetch_playlist(
    transport: &mut dyn Transport,
    previous_version: i64,
) -> TransportResult<(bool, Vec<Song>)> {
    if previous_version < 0 {
        Ok((true, transport.playlist_info()?))
    } else {
        Ok((false, transport.playlist_changes(previous_version)?))
    }
}

fn apply_fetched(state: &mut SessionState, changed: &ChangeSet, fetched: Fetched) {
    let Fetched {
        snapshot,
        current_song,
        playlist,
    } = fetched;

    if let Some(song) = current_song {
        state.current_song = song;
    }

    if let Some((reset, songs)) = playlist {
        if reset {
            state.playlist.clear();
        }
        let changes = state.playlist.apply(songs, snapshot.playlist_length as usize);
        tracing::debug!(
            version = snapshot.playlist_version,
            length = snapshot.playlist_length,
            applied = changes.len(),
            "playlist synchronized"
        );
    }

    let needs_highlight = changed.contains(&ChangedField::Song)
        || changed.contains(&ChangedField::State)
        || changed.contains(&ChangedField::Playlist);
    if needs_highlight {
        state.playlist.highlight(snapshot.song_id);
    }

    state.snapshot = snapshot;
}
