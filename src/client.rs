//! Per-actor submission state.

use crate::{
    queue::SubmitQueue,
    types::{ActorId, ActorState, KillRequest, TaskId, TaskSpec, WorkerId},
    Channel, ReplyCallback,
};
use bytes::Bytes;
use std::{
    collections::{HashMap, VecDeque},
    time::SystemTime,
};

/// Everything the submitter tracks for one actor.
///
/// A plain state container: all fields are read and written by the submitter
/// under its mutex and the struct is never shared outside it.
pub(crate) struct ClientQueue<C: Channel> {
    /// Lifecycle state. [ActorState::Dead] is terminal: every other field
    /// except the cached creation failure is ignored once reached.
    pub state: ActorState,

    /// Why the actor died. Only set when state is [ActorState::Dead];
    /// attached to every subsequent failure report for this actor.
    pub creation_failure: Option<Bytes>,

    /// Restart epoch of the incarnation this queue last heard about. Used to
    /// drop stale lifecycle messages.
    pub restarts: u64,

    /// Worker hosting the current incarnation. Cleared on disconnect.
    pub worker: Option<WorkerId>,

    /// Channel to the current incarnation. Cleared on disconnect.
    pub channel: Option<C>,

    /// A kill request to send once a channel is available. At most one is
    /// retained; later requests may only strengthen it.
    pub pending_kill: Option<KillRequest>,

    /// Tasks ordered for submission.
    pub queue: SubmitQueue,

    /// Reply handlers for tasks awaiting a reply on the current channel.
    /// Flushed exactly once with a synthetic failure when the channel is
    /// torn down.
    pub inflight: HashMap<TaskId, ReplyCallback>,

    /// Tasks that hit a network failure and are waiting for the authoritative
    /// death cause. Insertion order equals deadline order because every entry
    /// uses the same timeout.
    pub wait_for_death_info: VecDeque<(SystemTime, TaskSpec)>,

    /// Backlog at which the next excess-queueing warning fires. Doubles on
    /// each trip.
    pub next_warn_threshold: u64,
}

impl<C: Channel> ClientQueue<C> {
    pub fn new(actor: ActorId, warn_threshold: u64) -> Self {
        Self {
            state: ActorState::Pending,
            creation_failure: None,
            restarts: 0,
            worker: None,
            channel: None,
            pending_kill: None,
            queue: SubmitQueue::new(actor),
            inflight: HashMap::new(),
            wait_for_death_info: VecDeque::new(),
            next_warn_threshold: warn_threshold,
        }
    }
}
