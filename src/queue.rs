//! Per-actor ordered buffer of pending task submissions.

use crate::types::{ActorId, SequenceNumber, TaskId, TaskSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Send state of a queued task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SendState {
    /// Waiting to be sent (dependency resolution may still be outstanding).
    Queued,

    /// Pushed to the transport; awaiting a reply.
    InFlight,

    /// A reply was processed. Retained until the next reconnect so the
    /// server-side counter can be replayed forward.
    Completed,
}

#[derive(Debug)]
struct Entry {
    spec: TaskSpec,
    resolved: bool,
    state: SendState,
    /// Promoted to in-flight at least once. A re-send of such an entry may
    /// bypass ordering at the transport since the server has already assigned
    /// its position.
    sent: bool,
}

/// Orders task submissions for a single actor.
///
/// Tasks are keyed by their caller-assigned sequence number, which is the
/// authoritative execution order at the server. A task becomes sendable once
/// its dependencies are resolved and every earlier task has either been sent
/// or removed (dependency failure). Completed entries are retained so that,
/// after a reconnect, they can be replayed with the skip-execution flag to
/// advance a restarted server's counter.
pub(crate) struct SubmitQueue {
    /// Actor the queue belongs to. Only used for logging.
    actor: ActorId,

    entries: BTreeMap<SequenceNumber, Entry>,
}

impl SubmitQueue {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            entries: BTreeMap::new(),
        }
    }

    /// Inserts a task at the given sequence number.
    ///
    /// Returns `false` if the sequence number is already present.
    pub fn emplace(&mut self, sequence: SequenceNumber, spec: TaskSpec) -> bool {
        if self.entries.contains_key(&sequence) {
            return false;
        }
        self.entries.insert(
            sequence,
            Entry {
                spec,
                resolved: false,
                state: SendState::Queued,
                sent: false,
            },
        );
        true
    }

    /// Returns whether a task is queued at the given sequence number.
    pub fn contains(&self, sequence: SequenceNumber) -> bool {
        self.entries.contains_key(&sequence)
    }

    /// Returns the task at the given sequence number.
    ///
    /// Panics if the sequence number is absent.
    pub fn get(&self, sequence: SequenceNumber) -> &TaskSpec {
        &self
            .entries
            .get(&sequence)
            .expect("sequence number not queued")
            .spec
    }

    /// Marks the dependencies of a task as available.
    ///
    /// Panics if the sequence number is absent.
    pub fn mark_dependency_resolved(&mut self, sequence: SequenceNumber) {
        self.entries
            .get_mut(&sequence)
            .expect("sequence number not queued")
            .resolved = true;
    }

    /// Removes a task whose dependencies failed to resolve; the caller
    /// reports the failure.
    ///
    /// Removal unblocks later tasks: a dependency failure must not stall the
    /// actor's pipeline.
    ///
    /// Panics if the sequence number is absent.
    pub fn mark_dependency_failed(&mut self, sequence: SequenceNumber) {
        self.entries
            .remove(&sequence)
            .expect("sequence number not queued");
    }

    /// Returns the next task to push, if any, promoting it to in-flight.
    ///
    /// The next task is the entry with the smallest sequence number not yet
    /// sent on the current channel. It is returned only if its dependencies
    /// are resolved; otherwise nothing is sendable (strict ordering). The
    /// returned flag indicates the entry was already sent on an earlier
    /// channel and may bypass ordering at the transport.
    pub fn pop_next_task_to_send(&mut self) -> Option<(TaskSpec, bool)> {
        let entry = self
            .entries
            .values_mut()
            .find(|entry| entry.state == SendState::Queued)?;
        if !entry.resolved {
            return None;
        }
        let resend = entry.sent;
        entry.state = SendState::InFlight;
        entry.sent = true;
        Some((entry.spec.clone(), resend))
    }

    /// Records that a reply for the given sequence number was processed.
    ///
    /// Tolerates absent entries: replies race with queue clearing on actor
    /// death, and skip-execution replays complete after their entries have
    /// been popped.
    pub fn mark_task_completed(&mut self, sequence: SequenceNumber) {
        let Some(entry) = self.entries.get_mut(&sequence) else {
            return;
        };
        entry.state = SendState::Completed;
        debug!(
            actor = ?self.actor,
            sequence,
            total = self.entries.len(),
            "task completed"
        );
    }

    /// Removes and returns every retained completed entry in sequence order.
    ///
    /// Called on reconnection: the new incarnation of the server may have
    /// restarted with a zeroed counter, so completed tasks are replayed with
    /// the skip-execution flag to bring it forward.
    pub fn pop_all_out_of_order_completed_tasks(&mut self) -> Vec<(SequenceNumber, TaskSpec)> {
        let completed: Vec<SequenceNumber> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == SendState::Completed)
            .map(|(sequence, _)| *sequence)
            .collect();
        completed
            .into_iter()
            .map(|sequence| {
                let entry = self.entries.remove(&sequence).unwrap(); // collected above
                (sequence, entry.spec)
            })
            .collect()
    }

    /// Drops every entry and returns the identifiers of tasks that had not
    /// yet been sent, so the caller can fail them.
    ///
    /// In-flight tasks are not returned: their reply callbacks are failed
    /// separately when the channel is torn down.
    pub fn clear_all_tasks(&mut self) -> Vec<TaskId> {
        let ids = self
            .entries
            .values()
            .filter(|entry| entry.state == SendState::Queued)
            .map(|entry| entry.spec.task.clone())
            .collect();
        self.entries.clear();
        ids
    }

    /// Resumes sending on a fresh channel.
    ///
    /// In-flight entries never completed on the previous channel are demoted
    /// so the next drain re-sends them.
    pub fn on_client_connected(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.state == SendState::InFlight {
                entry.state = SendState::Queued;
            }
        }
    }

    /// Returns the server-visible sequence number for a task.
    pub fn get_sequence_number(&self, spec: &TaskSpec) -> SequenceNumber {
        spec.sequence
    }
}
