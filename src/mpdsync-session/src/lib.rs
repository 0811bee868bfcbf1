//! Client-side session with a media server: connection lifecycle, status
//! polling with per-field change notifications, incremental playlist sync and
//! batched playlist edits.

mod mutations;
mod notify;
mod playlist;
mod session;
mod status;

pub use mutations::{to_command, to_commands, MutationQueue};
pub use notify::{ConnectionEvent, Notifier, SubscriptionId};
pub use playlist::{PlaylistChange, PlaylistEntry, PlaylistView};
pub use session::{CommitSummary, ConnectOptions, Session, SessionError, SessionResult};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// A panicking subscriber must not wedge the session, so poisoned locks are
/// recovered rather than propagated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
