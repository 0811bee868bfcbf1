use mpdsync_core::{Command, Mutation};
use std::sync::Mutex;

use crate::lock;

/// Pending playlist edits, flushed by `Session::commit`.
///
/// Arguments are not validated on the way in; translation to commands drops
/// the ones that can never be valid.
#[derive(Debug, Default)]
pub struct MutationQueue {
    pending: Mutex<Vec<Mutation>>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mutation: Mutation) {
        lock(&self.pending).push(mutation);
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    /// Copy of the queued mutations in enqueue order.
    pub fn pending(&self) -> Vec<Mutation> {
        lock(&self.pending).clone()
    }

    /// Takes the whole queue. Later pushes start the next batch.
    pub fn drain(&self) -> Vec<Mutation> {
        std::mem::take(&mut *lock(&self.pending))
    }
}

/// Remote command for a single mutation, or `None` when it is unsendable.
pub fn to_command(mutation: &Mutation) -> Option<Command> {
    match mutation {
        Mutation::Append(path) if !path.is_empty() => Some(Command::Add { path: path.clone() }),
        Mutation::Append(_) => None,
        Mutation::DeleteById(id) => u32::try_from(*id).ok().map(|id| Command::DeleteId { id }),
        Mutation::DeleteByPosition(pos) => {
            u32::try_from(*pos).ok().map(|pos| Command::Delete { pos })
        }
        Mutation::Move { from, to } => match (u32::try_from(*from), u32::try_from(*to)) {
            (Ok(from), Ok(to)) => Some(Command::Move { from, to }),
            _ => None,
        },
    }
}

/// Translates a batch 1:1 in order. Returns the commands and how many
/// mutations were skipped.
pub fn to_commands(batch: &[Mutation]) -> (Vec<Command>, usize) {
    let mut skipped = 0;
    let commands = batch
        .iter()
        .filter_map(|mutation| {
            let command = to_command(mutation);
            if command.is_none() {
                tracing::debug!(?mutation, "skipping invalid playlist mutation");
                skipped += 1;
            }
            command
        })
        .collect();
    (commands, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_enqueue_order_and_empties_queue() {
        let queue = MutationQueue::new();
        queue.push(Mutation::Append("a.mp3".into()));
        queue.push(Mutation::DeleteByPosition(2));
        queue.push(Mutation::Move { from: 0, to: 5 });

        let batch = queue.drain();
        assert_eq!(
            batch,
            vec![
                Mutation::Append("a.mp3".into()),
                Mutation::DeleteByPosition(2),
                Mutation::Move { from: 0, to: 5 },
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn pushes_after_drain_start_a_new_batch() {
        let queue = MutationQueue::new();
        queue.push(Mutation::DeleteById(1));
        let first = queue.drain();
        queue.push(Mutation::DeleteById(2));

        assert_eq!(first, vec![Mutation::DeleteById(1)]);
        assert_eq!(queue.pending(), vec![Mutation::DeleteById(2)]);
    }

    #[test]
    fn translation_is_one_to_one() {
        let (commands, skipped) = to_commands(&[
            Mutation::Append("a.mp3".into()),
            Mutation::DeleteByPosition(2),
            Mutation::Move { from: 0, to: 5 },
            Mutation::DeleteById(17),
        ]);

        assert_eq!(skipped, 0);
        assert_eq!(
            commands,
            vec![
                Command::Add {
                    path: "a.mp3".into()
                },
                Command::Delete { pos: 2 },
                Command::Move { from: 0, to: 5 },
                Command::DeleteId { id: 17 },
            ]
        );
    }

    #[test]
    fn negative_arguments_are_skipped() {
        let (commands, skipped) = to_commands(&[
            Mutation::DeleteByPosition(-1),
            Mutation::DeleteById(-4),
            Mutation::Move { from: 3, to: -1 },
            Mutation::Append(String::new()),
            Mutation::DeleteByPosition(0),
        ]);

        assert_eq!(skipped, 4);
        assert_eq!(commands, vec![Command::Delete { pos: 0 }]);
    }
}
