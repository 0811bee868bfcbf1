use mpdsync_core::Song;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub song: Song,
    pub now_playing: bool,
}

/// One slot touched by a delta sync, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistChange {
    Update { position: usize, song: Song },
    Append { position: usize, song: Song },
    Remove { position: usize },
}

impl PlaylistChange {
    pub fn position(&self) -> usize {
        match self {
            PlaylistChange::Update { position, .. }
            | PlaylistChange::Append { position, .. }
            | PlaylistChange::Remove { position } => *position,
        }
    }

    /// `None` for removals.
    pub fn song(&self) -> Option<&Song> {
        match self {
            PlaylistChange::Update { song, .. } | PlaylistChange::Append { song, .. } => Some(song),
            PlaylistChange::Remove { .. } => None,
        }
    }
}

/// Local mirror of the server playlist, indexed by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistView {
    entries: Vec<PlaylistEntry>,
}

impl PlaylistView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn get(&self, position: usize) -> Option<&PlaylistEntry> {
        self.entries.get(position)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn now_playing(&self) -> Option<usize> {
        self.entries.iter().position(|entry| entry.now_playing)
    }

    /// Applies the entries the server reported as changed, then truncates the
    /// tail down to `new_length`.
    ///
    /// Entries below the length the view had before this call replace their
    /// slot; the rest are appended. Removals run from the highest position
    /// down.
    pub fn apply(&mut self, changed: Vec<Song>, new_length: usize) -> Vec<PlaylistChange> {
        let previous_length = self.entries.len();
        let mut applied = Vec::with_capacity(changed.len());

        for song in changed {
            let Some(position) = song.pos.map(|pos| pos as usize) else {
                tracing::warn!(file = %song.file, "playlist change without a position, skipping");
                continue;
            };

            if position < previous_length {
                let entry = &mut self.entries[position];
                entry.song = song.clone();
                applied.push(PlaylistChange::Update { position, song });
            } else if position == self.entries.len() {
                self.entries.push(PlaylistEntry {
                    song: song.clone(),
                    now_playing: false,
                });
                applied.push(PlaylistChange::Append { position, song });
            } else {
                tracing::warn!(
                    position,
                    length = self.entries.len(),
                    "playlist change leaves a gap, skipping"
                );
            }
        }

        while self.entries.len() > new_length {
            self.entries.pop();
            applied.push(PlaylistChange::Remove {
                position: self.entries.len(),
            });
        }

        applied
    }

    /// Marks the entry whose playlist id equals `song_id` and clears every
    /// other one. Returns the marked position.
    pub fn highlight(&mut self, song_id: i32) -> Option<usize> {
        let target = u32::try_from(song_id).ok();
        let mut marked = None;
        for (position, entry) in self.entries.iter_mut().enumerate() {
            let is_match = marked.is_none() && target.is_some() && entry.song.id == target;
            entry.now_playing = is_match;
            if is_match {
                marked = Some(position);
            }
        }
        marked
    }
}
