//! Dispatch ordered tasks to long-lived, stateful remote actors.
//!
//! An actor executes the tasks submitted by a caller in the caller's order,
//! identified by a per-actor sequence number. This crate implements the
//! client side of that contract: a [Submitter] that queues tasks per actor,
//! interlocks dependency resolution with sending, survives actor restarts by
//! replaying completed work with a skip-execution flag, and classifies
//! failures as retryable, awaiting-death-info, or terminal.
//!
//! # Design
//!
//! Three asynchronous event sources race over shared per-actor state: user
//! submissions, dependency-resolver callbacks, and RPC reply callbacks. All
//! of them, plus lifecycle events (connect, disconnect, kill, timeout sweep),
//! serialize on a single mutex owned by the submitter. Callbacks into
//! collaborators are never invoked while that mutex is held: state transitions
//! capture the work to perform, release the lock, and then invoke it.
//!
//! The submitter owns no timer and performs no I/O of its own. Lifecycle
//! notifications, dependency resolution, the RPC channel pool, task
//! finalization, and the periodic timeout sweep are all driven externally
//! through the traits defined here.

use bytes::Bytes;
use thiserror::Error;

mod client;
mod metrics;
mod queue;
pub mod types;

mod submitter;
pub use submitter::{Config, Submitter, WarnExcessQueueing};

#[cfg(test)]
pub mod mocks;

use types::{Address, KillRequest, PushTaskReply, PushTaskRequest, SequenceNumber, TaskId, TaskSpec, WorkerId};

/// Underlying cause attached to reports that cross a trait seam.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A dependency of the task could not be resolved.
    #[error("dependency resolution failed: {0}")]
    DependencyResolution(String),

    /// The transport failed to deliver the request or its reply.
    #[error("network failure: {0}")]
    Network(String),

    /// Synthetic failure delivered to in-flight tasks when their channel is
    /// torn down.
    #[error("in-flight task failed due to actor state change")]
    ActorStateChange,

    /// The task was addressed to an actor that is permanently dead.
    #[error("canceling task of dead actor")]
    DeadActor,
}

/// Task failure classes surfaced to the [Finisher].
///
/// No other kinds originate in this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A task dependency could not be resolved. Terminal for that task only.
    DependencyResolutionFailed,

    /// The target actor restarted or died before the task could complete.
    ActorDied,
}

/// Invoked with the outcome of a dependency resolution.
pub type ResolveCallback = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// Invoked with the reply to a pushed task.
pub type ReplyCallback = Box<dyn FnOnce(Result<PushTaskReply, Error>) + Send>;

/// Invoked with the outcome of a kill request.
pub type KillCallback = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// Resolves the dependencies of a task before it is sent.
pub trait DependencyResolver: Clone + Send + Sync + 'static {
    /// Begin resolving the dependencies of `spec`, invoking `callback` with
    /// the outcome.
    ///
    /// The callback may be invoked on any thread, including synchronously on
    /// the calling thread before this method returns; the submitter releases
    /// its lock before calling.
    fn resolve_dependencies(&self, spec: TaskSpec, callback: ResolveCallback);
}

/// Produces channels to remote workers.
pub trait ClientPool: Clone + Send + Sync + 'static {
    type Channel: Channel;

    /// Returns a channel to the worker at `address`, opening one if needed.
    fn get_or_connect(&self, address: &Address) -> Self::Channel;

    /// Releases the connection to `worker`.
    fn disconnect(&self, worker: &WorkerId);
}

/// Point-to-point RPC channel to a worker hosting an actor.
///
/// Methods must not call back into the [Submitter] synchronously: they may be
/// invoked while its mutex is held.
pub trait Channel: Clone + Send + Sync + 'static {
    /// Push a task for execution. The reply callback fires on an arbitrary
    /// thread.
    ///
    /// Requests with `skip_queue` bypass ordering at the transport; they are
    /// used for replays whose position the server already knows.
    fn push_task(&self, request: PushTaskRequest, skip_queue: bool, callback: ReplyCallback);

    /// Ask the hosting worker to terminate the actor.
    fn kill_actor(&self, request: KillRequest, callback: Option<KillCallback>);

    /// Address this channel is connected to.
    fn address(&self) -> Address;

    /// Highest sequence number the server reports having processed, or
    /// `None` before the first report. Used only for the backlog warning.
    fn processed_up_to(&self) -> Option<SequenceNumber>;
}

/// Materializes task outcomes and owns the retry policy.
pub trait Finisher: Clone + Send + Sync + 'static {
    /// Deliver the reply of a successfully executed task.
    fn complete_pending_task(&self, task: TaskId, reply: PushTaskReply, address: Address);

    /// Report a task failure.
    ///
    /// Returns `true` if the finisher will retry the task instead of failing
    /// it, in which case the submitter keeps its queue entry for the next
    /// connect. `immediately_mark_failed` is set when the actor is already
    /// known dead and no death information is outstanding.
    fn pending_task_failed(
        &self,
        task: TaskId,
        kind: ErrorKind,
        error: Error,
        creation_failure: Option<Bytes>,
        immediately_mark_failed: bool,
    ) -> bool;

    /// Record that a task was canceled before it could be sent.
    fn mark_task_canceled(&self, task: TaskId);

    /// Fail a task that is no longer retryable.
    fn mark_pending_task_failed(
        &self,
        spec: TaskSpec,
        kind: ErrorKind,
        creation_failure: Option<Bytes>,
    );
}
