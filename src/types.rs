//! Identifiers and messages exchanged with the collaborators of the submitter.

use bytes::Bytes;
use commonware_utils::sequence::FixedBytes;
use std::net::SocketAddr;

/// Uniquely identifies a remote actor.
pub type ActorId = FixedBytes<16>;

/// Uniquely identifies a single task (one method invocation on an actor).
pub type TaskId = FixedBytes<24>;

/// Uniquely identifies the worker process hosting an actor incarnation.
pub type WorkerId = FixedBytes<28>;

/// Uniquely identifies an object a task may depend on.
pub type ObjectId = FixedBytes<32>;

/// Per-actor ordering key assigned by the caller.
///
/// Sequence numbers increase strictly with submission order and define the
/// order in which the server executes tasks.
pub type SequenceNumber = u64;

/// Dialable location of an actor incarnation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    /// Socket the hosting worker listens on.
    pub socket: SocketAddr,

    /// Worker process hosting the actor.
    pub worker: WorkerId,
}

/// Specification of one method invocation on an actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSpec {
    /// Identifier of this invocation.
    pub task: TaskId,

    /// Actor the task is addressed to.
    pub actor: ActorId,

    /// Caller-assigned sequence number (strictly increasing per actor).
    pub sequence: SequenceNumber,

    /// Objects that must be available before the task can be sent.
    pub dependencies: Vec<ObjectId>,

    /// Serialized method invocation.
    pub payload: Bytes,

    /// Advance the server-side counter without re-running the method.
    ///
    /// Set on completed tasks replayed after a reconnect.
    pub skip_execution: bool,
}

/// Request to execute a task on an actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushTaskRequest {
    /// The task to execute.
    pub spec: TaskSpec,

    /// Worker the request is intended for. A request that arrives at a worker
    /// hosting a different incarnation is rejected by the server.
    pub intended_worker: WorkerId,

    /// Position of the task in the actor's execution order.
    pub sequence: SequenceNumber,
}

/// Reply to a [PushTaskRequest].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushTaskReply {
    /// Serialized outputs of the invocation.
    pub payload: Bytes,
}

/// Request to terminate an actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillRequest {
    /// Actor the request is intended for.
    pub intended_actor: ActorId,

    /// Terminate the actor immediately instead of letting it exit cleanly.
    pub force_kill: bool,

    /// Prevent the actor from being restarted after termination.
    pub no_restart: bool,
}

/// Lifecycle state of an actor as observed by the submitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorState {
    /// Known but never connected.
    Pending,

    /// Connected; tasks can be pushed.
    Alive,

    /// Disconnected; awaiting a new incarnation.
    Restarting,

    /// Permanently failed. Terminal.
    Dead,
}
