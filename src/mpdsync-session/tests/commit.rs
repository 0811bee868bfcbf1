mod common;

use common::{connected, songs, Call, FailOn, FakeServer};
use mpdsync_core::{ChangeSet, ChangedField, Command, Mutation};
use mpdsync_session::{CommitSummary, SessionError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

#[test]
fn commit_sends_one_ordered_batch_then_polls_once() {
    let server = FakeServer::new();
    server.state().set_playlist(2, songs(6));
    let session = connected(&server);

    session.enqueue_append("a.mp3");
    session.enqueue_delete_by_position(2);
    session.enqueue_move(0, 5);

    let summary = session.commit().expect("commit");
    assert_eq!(
        summary,
        CommitSummary {
            submitted: 3,
            skipped: 0,
            discarded: 0,
        }
    );

    assert_eq!(
        server.calls(),
        vec![
            Call::Batch(vec![
                Command::Add {
                    path: "a.mp3".into()
                },
                Command::Delete { pos: 2 },
                Command::Move { from: 0, to: 5 },
            ]),
            Call::Status,
            Call::Stats,
            Call::PlaylistChanges(2),
        ]
    );
    assert!(session.pending_mutations().is_empty());
    assert_eq!(session.playlist_id(), 3);
}

#[test]
fn commit_preserves_order_for_long_batches() {
    let server = FakeServer::new();
    let session = connected(&server);

    for id in 0..25 {
        if id % 2 == 0 {
            session.enqueue_delete_by_id(id);
        } else {
            session.enqueue_append(format!("song{id}.flac"));
        }
    }
    session.commit().expect("commit");

    let batches = server.batches();
    assert_eq!(batches.len(), 1);
    let expected: Vec<Command> = (0..25u32)
        .map(|id| {
            if id % 2 == 0 {
                Command::DeleteId { id }
            } else {
                Command::Add {
                    path: format!("song{id}.flac"),
                }
            }
        })
        .collect();
    assert_eq!(batches[0], expected);
}

#[test]
fn invalid_mutations_are_skipped_not_sent() {
    let server = FakeServer::new();
    let session = connected(&server);

    session.enqueue_delete_by_position(-1);
    session.enqueue_delete_by_position(1);
    session.enqueue_move(-3, 2);

    let summary = session.commit().expect("commit");
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(server.batches(), vec![vec![Command::Delete { pos: 1 }]]);
}

#[test]
fn batch_of_only_invalid_mutations_makes_no_remote_call() {
    let server = FakeServer::new();
    let session = connected(&server);

    session.enqueue_delete_by_id(-1);
    let summary = session.commit().expect("commit");

    assert_eq!(summary.skipped, 1);
    assert!(server.calls().is_empty());
}

#[test]
fn offline_commit_discards_queue() {
    let server = FakeServer::new();
    let session = server.session();

    session.enqueue_append("x.ogg");
    session.enqueue_move(1, 2);
    let summary = session.commit().expect("offline commit is not an error");

    assert_eq!(summary.discarded, 2);
    assert!(session.pending_mutations().is_empty());
    assert!(server.calls().is_empty());
}

#[test]
fn failed_batch_disconnects_and_drains() {
    let server = FakeServer::new();
    let session = connected(&server);
    server.state().fail_on = Some(FailOn::Batch);

    for pos in 0..4 {
        session.enqueue_delete_by_position(pos);
    }
    let err = session.commit().expect_err("batch fails");

    assert!(matches!(err, SessionError::Transport(_)));
    assert!(!session.is_connected());
    assert!(session.pending_mutations().is_empty());
    assert_eq!(server.count(&Call::Status), 0);
    assert_eq!(server.count(&Call::Close), 1);
}

#[test]
fn mutations_queued_after_commit_form_the_next_batch() {
    let server = FakeServer::new();
    let session = connected(&server);

    session.enqueue_append("first.mp3");
    session.commit().expect("commit");
    session.enqueue_append("second.mp3");

    assert_eq!(
        session.pending_mutations(),
        vec![Mutation::Append("second.mp3".into())]
    );
    assert_eq!(server.batches().len(), 1);
}

#[test]
fn empty_commit_is_a_no_op() {
    let server = FakeServer::new();
    let session = connected(&server);

    assert_eq!(session.commit().expect("commit"), CommitSummary::default());
    assert!(server.calls().is_empty());
}

#[test]
fn playlist_subscriber_can_commit_again() {
    let server = FakeServer::new();
    server.state().set_playlist(2, songs(3));
    let session = Arc::new(connected(&server));
    let reacted = Arc::new(AtomicBool::new(false));
    {
        let inner = Arc::clone(&session);
        let reacted = Arc::clone(&reacted);
        session.subscribe(ChangedField::Playlist, move |_| {
            if !reacted.swap(true, Ordering::SeqCst) {
                inner.enqueue_append("b.mp3");
                inner.commit().expect("commit from subscriber");
            }
        });
    }

    session.enqueue_append("a.mp3");
    let (tx, rx) = mpsc::channel();
    {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let _ = tx.send(session.commit());
        });
    }
    let summary = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("outer commit returned")
        .expect("commit");

    assert_eq!(summary.submitted, 1);
    assert!(reacted.load(Ordering::SeqCst));
    assert_eq!(
        server.batches(),
        vec![
            vec![Command::Add { path: "a.mp3".into() }],
            vec![Command::Add { path: "b.mp3".into() }],
        ]
    );

    // The nested commit ran inside a poll, so its resync waits for the next one.
    assert_eq!(session.playlist_id(), 3);
    assert_eq!(
        session.poll_status(),
        ChangeSet::from([ChangedField::Playlist])
    );
    assert_eq!(session.playlist_id(), 4);
}
