//! Process-wide dispatch of tasks to remote actors.

use crate::{
    client::ClientQueue,
    metrics::Metrics,
    types::{
        ActorId, ActorState, Address, KillRequest, PushTaskReply, PushTaskRequest, SequenceNumber,
        TaskId, TaskSpec,
    },
    Channel, ClientPool, DependencyResolver, Error, ErrorKind, Finisher, ReplyCallback,
};
use bytes::Bytes;
use commonware_runtime::{Clock, Metrics as RuntimeMetrics};
use commonware_utils::sync::Mutex;
use std::{collections::HashMap, mem, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Invoked when the backlog of un-processed tasks for an actor crosses the
/// warning threshold.
///
/// Called on the push path with the submitter's internal lock held; the hook
/// must not call back into the [Submitter].
pub type WarnExcessQueueing = Arc<dyn Fn(&ActorId, u64) + Send + Sync>;

/// Configuration for a [Submitter].
pub struct Config<R: DependencyResolver, F: Finisher, P: ClientPool> {
    /// Resolves task dependencies before dispatch.
    pub resolver: R,

    /// Materializes task outcomes and owns the retry policy.
    pub finisher: F,

    /// Produces channels to remote workers.
    pub pool: P,

    /// How long a task that hit a network failure waits for the authoritative
    /// death cause before the timeout sweep fails it.
    pub wait_for_death_info_timeout: Duration,

    /// Initial per-actor backlog at which the excess-queueing warning fires.
    /// The threshold doubles on each trip.
    pub excess_queueing_warn_threshold: u64,

    /// Invoked when an actor's backlog crosses the warning threshold.
    pub warn_excess_queueing: WarnExcessQueueing,
}

/// Dispatches tasks to remote actors, preserving caller order per actor.
///
/// Cheap to clone; all clones share one actor map guarded by a single mutex.
/// Methods may be called from any thread. Callbacks into the resolver,
/// finisher, and channel reply handlers are never invoked while the mutex is
/// held: work is captured under the lock and performed after release.
pub struct Submitter<E, R, F, P>
where
    E: Clock + RuntimeMetrics,
    R: DependencyResolver,
    F: Finisher,
    P: ClientPool,
{
    context: E,
    resolver: R,
    finisher: F,
    pool: P,

    wait_for_death_info_timeout: Duration,
    initial_warn_threshold: u64,
    warn_excess_queueing: WarnExcessQueueing,

    metrics: Arc<Metrics>,

    /// Guards every [ClientQueue]. Critical sections are short and never span
    /// a callback into a collaborator.
    actors: Arc<Mutex<HashMap<ActorId, ClientQueue<P::Channel>>>>,
}

impl<E, R, F, P> Clone for Submitter<E, R, F, P>
where
    E: Clock + RuntimeMetrics + Clone,
    R: DependencyResolver,
    F: Finisher,
    P: ClientPool,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            resolver: self.resolver.clone(),
            finisher: self.finisher.clone(),
            pool: self.pool.clone(),
            wait_for_death_info_timeout: self.wait_for_death_info_timeout,
            initial_warn_threshold: self.initial_warn_threshold,
            warn_excess_queueing: self.warn_excess_queueing.clone(),
            metrics: self.metrics.clone(),
            actors: self.actors.clone(),
        }
    }
}

impl<E, R, F, P> Submitter<E, R, F, P>
where
    E: Clock + RuntimeMetrics + Clone,
    R: DependencyResolver,
    F: Finisher,
    P: ClientPool,
{
    /// Creates a new submitter.
    pub fn new(context: E, config: Config<R, F, P>) -> Self {
        let metrics = Arc::new(Metrics::init(&context));
        Self {
            context,
            resolver: config.resolver,
            finisher: config.finisher,
            pool: config.pool,
            wait_for_death_info_timeout: config.wait_for_death_info_timeout,
            initial_warn_threshold: config.excess_queueing_warn_threshold,
            warn_excess_queueing: config.warn_excess_queueing,
            metrics,
            actors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts tracking an actor. Idempotent: the same actor may be referenced
    /// many times.
    ///
    /// Must be called before any other operation mentions the actor.
    pub fn add_actor_if_unknown(&self, actor: &ActorId) {
        let mut actors = self.actors.lock();
        actors.entry(actor.clone()).or_insert_with(|| {
            debug!(?actor, "tracking actor");
            ClientQueue::new(actor.clone(), self.initial_warn_threshold)
        });
        self.metrics.actors.set(actors.len() as i64);
    }

    /// Submits a task for execution on its actor.
    ///
    /// Always succeeds at call time: the real outcome is delivered through
    /// the [Finisher]. Panics if the actor is unknown or the sequence number
    /// was already submitted.
    pub fn submit(&self, spec: TaskSpec) {
        let task = spec.task.clone();
        let actor = spec.actor.clone();
        debug!(?task, ?actor, sequence = spec.sequence, "submitting task");

        let queued = {
            let mut actors = self.actors.lock();
            let queue = actors.get_mut(&actor).expect("unknown actor");
            if queue.state == ActorState::Dead {
                false
            } else {
                // The send order must be fixed before resolution starts:
                // dependencies may resolve out of order, and the server
                // executes tasks by this sequence number.
                assert!(
                    queue.queue.emplace(spec.sequence, spec.clone()),
                    "duplicate sequence number"
                );
                true
            }
        };

        if queued {
            self.metrics.submitted.inc();
            // The callback may fire in this call stack, so the lock must be
            // released before resolution begins.
            let submitter = self.clone();
            let sequence = spec.sequence;
            let resolved_actor = actor;
            self.resolver.resolve_dependencies(
                spec,
                Box::new(move |status| {
                    submitter.handle_dependencies_resolved(resolved_actor, sequence, status)
                }),
            );
        } else {
            self.finisher.mark_task_canceled(task.clone());
            let creation_failure = {
                let actors = self.actors.lock();
                actors
                    .get(&actor)
                    .expect("unknown actor")
                    .creation_failure
                    .clone()
            };
            self.metrics.failed.inc();
            let _ = self.finisher.pending_task_failed(
                task,
                ErrorKind::ActorDied,
                Error::DeadActor,
                creation_failure,
                false,
            );
        }
    }

    /// Outcome of dependency resolution for a queued task.
    fn handle_dependencies_resolved(
        &self,
        actor: ActorId,
        sequence: SequenceNumber,
        status: Result<(), Error>,
    ) {
        let failed = {
            let mut actors = self.actors.lock();
            let queue = actors.get_mut(&actor).expect("unknown actor");
            // The task may have been dequeued if the actor has since died.
            if !queue.queue.contains(sequence) {
                return;
            }
            match status {
                Ok(()) => {
                    queue.queue.mark_dependency_resolved(sequence);
                    self.send_pending_tasks(&actor, queue);
                    None
                }
                Err(error) => {
                    let task = queue.queue.get(sequence).task.clone();
                    queue.queue.mark_dependency_failed(sequence);
                    Some((task, error))
                }
            }
        };

        if let Some((task, error)) = failed {
            warn!(?task, ?actor, ?error, "dependency resolution failed");
            self.metrics.failed.inc();
            let _ = self.finisher.pending_task_failed(
                task,
                ErrorKind::DependencyResolutionFailed,
                error,
                None,
                false,
            );
        }
    }

    /// Asks an actor to exit.
    ///
    /// The request is retained until a channel is available and merged with
    /// any request already pending: a force kill supersedes a clean one, and
    /// a force kill's no-restart flag is sticky.
    pub fn kill_actor(&self, actor: &ActorId, force_kill: bool, no_restart: bool) {
        let mut actors = self.actors.lock();
        // Callers can only kill actors they hold a reference to.
        let queue = actors.get_mut(actor).expect("unknown actor");
        match &mut queue.pending_kill {
            None => {
                queue.pending_kill = Some(KillRequest {
                    intended_actor: actor.clone(),
                    force_kill,
                    no_restart,
                });
            }
            Some(pending) if force_kill => {
                pending.force_kill = true;
                if no_restart {
                    pending.no_restart = true;
                }
            }
            Some(_) => {}
        }
        self.send_pending_tasks(actor, queue);
    }

    /// Connects to an incarnation of an actor and drains its queue.
    ///
    /// Stale notifications (an epoch the actor has already restarted past, an
    /// address it is already connected to, or an actor that has since died)
    /// are ignored.
    pub fn connect_actor(&self, actor: &ActorId, address: Address, restart_epoch: u64) {
        debug!(?actor, worker = ?address.worker, "connecting to actor");

        let mut captured = HashMap::new();
        {
            let mut actors = self.actors.lock();
            let queue = actors.get_mut(actor).expect("unknown actor");
            if restart_epoch < queue.restarts {
                info!(
                    ?actor,
                    restart_epoch, "skipping connect to already-restarted actor"
                );
                return;
            }
            if let Some(channel) = &queue.channel {
                if channel.address().socket == address.socket {
                    debug!(?actor, "skipping connect to already-connected actor");
                    return;
                }
            }
            if queue.state == ActorState::Dead {
                return;
            }

            queue.restarts = restart_epoch;
            if queue.channel.is_some() {
                // Tear down the channel to the previous incarnation.
                self.disconnect_channel(queue);
                captured = mem::take(&mut queue.inflight);
            }

            queue.state = ActorState::Alive;
            queue.worker = Some(address.worker.clone());
            queue.channel = Some(self.pool.get_or_connect(&address));
            queue.queue.on_client_connected();
            info!(?actor, worker = ?address.worker, restart_epoch, "connected to actor");

            self.resend_out_of_order_tasks(actor, queue);
            self.send_pending_tasks(actor, queue);
        }

        self.fail_inflight_tasks(captured);
    }

    /// Disconnects from a failed incarnation of an actor.
    ///
    /// With `dead` set the actor is permanently gone: every queued and stashed
    /// task is failed with the supplied cause, and the cause is cached for
    /// later submissions. Otherwise the actor is restarting and its queue is
    /// left intact for the next connect.
    ///
    /// Panics if `dead` is unset and the epoch never advanced.
    pub fn disconnect_actor(
        &self,
        actor: &ActorId,
        restart_epoch: u64,
        dead: bool,
        creation_failure: Option<Bytes>,
    ) {
        debug!(?actor, restart_epoch, dead, "disconnecting from actor");

        let mut captured = HashMap::new();
        let mut dropped = Vec::new();
        let mut stashed = Vec::new();
        {
            let mut actors = self.actors.lock();
            let queue = actors.get_mut(actor).expect("unknown actor");
            if !dead {
                assert!(restart_epoch > 0, "disconnect without epoch advance");
                if restart_epoch <= queue.restarts {
                    info!(
                        ?actor,
                        restart_epoch, "skipping disconnect from already-restarted actor"
                    );
                    return;
                }
            }

            // Either the actor is permanently dead or a new channel is
            // opened once it restarts.
            self.disconnect_channel(queue);
            captured = mem::take(&mut queue.inflight);

            if dead {
                queue.state = ActorState::Dead;
                queue.creation_failure = creation_failure.clone();
                dropped = queue.queue.clear_all_tasks();
                stashed = queue
                    .wait_for_death_info
                    .drain(..)
                    .map(|(_, spec)| spec)
                    .collect();
                info!(
                    ?actor,
                    pending = dropped.len(),
                    awaiting_death_info = stashed.len(),
                    "failing tasks of dead actor"
                );
                // Sequencing state survives so later submissions are failed
                // immediately.
            } else if queue.state != ActorState::Dead {
                queue.state = ActorState::Restarting;
                queue.restarts = restart_epoch;
            }
        }

        for task in dropped {
            self.finisher.mark_task_canceled(task.clone());
            self.metrics.failed.inc();
            let _ = self.finisher.pending_task_failed(
                task,
                ErrorKind::ActorDied,
                Error::DeadActor,
                creation_failure.clone(),
                false,
            );
        }
        for spec in stashed {
            self.metrics.failed.inc();
            self.finisher
                .mark_pending_task_failed(spec, ErrorKind::ActorDied, creation_failure.clone());
        }
        self.fail_inflight_tasks(captured);
    }

    /// Fails every stashed task whose death-info deadline has elapsed.
    ///
    /// Must be driven periodically by an external ticker; the submitter owns
    /// no timer.
    pub fn check_timeout_tasks(&self) {
        let mut expired = Vec::new();
        {
            let mut actors = self.actors.lock();
            let now = self.context.current();
            for queue in actors.values_mut() {
                // Every stash uses the same timeout, so insertion order is
                // deadline order and only the front can be expired.
                while let Some((deadline, _)) = queue.wait_for_death_info.front() {
                    if *deadline >= now {
                        break;
                    }
                    let (_, spec) = queue.wait_for_death_info.pop_front().unwrap(); // front exists
                    expired.push(spec);
                }
            }
        }

        for spec in expired {
            warn!(task = ?spec.task, "task timed out waiting for death info");
            self.metrics.failed.inc();
            self.finisher
                .mark_pending_task_failed(spec, ErrorKind::ActorDied, None);
        }
    }

    /// Returns whether the actor is known and currently connected.
    pub fn is_actor_alive(&self, actor: &ActorId) -> bool {
        let actors = self.actors.lock();
        actors
            .get(actor)
            .is_some_and(|queue| queue.channel.is_some())
    }

    /// Drops the channel and releases its pooled connection.
    fn disconnect_channel(&self, queue: &mut ClientQueue<P::Channel>) {
        queue.channel = None;
        if let Some(worker) = queue.worker.take() {
            self.pool.disconnect(&worker);
        }
        queue.pending_kill = None;
    }

    /// Invokes the reply callbacks of tasks that were in flight on a
    /// torn-down channel with a synthetic failure, unblocking their waiters.
    ///
    /// Must be called with the mutex released: the callbacks re-enter the
    /// submitter and call into the finisher.
    fn fail_inflight_tasks(&self, callbacks: HashMap<TaskId, ReplyCallback>) {
        for (task, callback) in callbacks {
            debug!(?task, "failing in-flight task");
            callback(Err(Error::ActorStateChange));
        }
    }

    /// Sends everything sendable for an actor: a pending kill first, then the
    /// ready prefix of the submit queue in sequence order.
    ///
    /// Called under the mutex. Returns immediately if there is no channel.
    fn send_pending_tasks(&self, actor: &ActorId, queue: &mut ClientQueue<P::Channel>) {
        if queue.channel.is_none() {
            return;
        }

        // An opportunistic kill goes out ahead of queued work. Delivery
        // failure is acceptable: the target may already be dead.
        if let Some(request) = queue.pending_kill.take() {
            info!(
                ?actor,
                force_kill = request.force_kill,
                no_restart = request.no_restart,
                "sending kill request"
            );
            self.metrics.kills.inc();
            let channel = queue.channel.as_ref().unwrap(); // checked above
            channel.kill_actor(request, None);
        }

        while let Some((spec, skip_queue)) = queue.queue.pop_next_task_to_send() {
            self.push_actor_task(queue, spec, skip_queue);
        }
    }

    /// Replays tasks that completed on a previous channel with the
    /// skip-execution flag, advancing the server-side counter without
    /// re-running them.
    ///
    /// Called under the mutex on reconnection.
    fn resend_out_of_order_tasks(&self, actor: &ActorId, queue: &mut ClientQueue<P::Channel>) {
        if queue.channel.is_none() {
            return;
        }
        for (sequence, mut spec) in queue.queue.pop_all_out_of_order_completed_tasks() {
            debug!(?actor, sequence, "replaying completed task");
            self.metrics.resent.inc();
            spec.skip_execution = true;
            self.push_actor_task(queue, spec, true);
        }
    }

    /// Pushes one task on the actor's channel and registers its reply
    /// callback.
    ///
    /// Called under the mutex with a channel present.
    fn push_actor_task(&self, queue: &mut ClientQueue<P::Channel>, spec: TaskSpec, skip_queue: bool) {
        let channel = queue.channel.clone().expect("pushing task without a channel");
        let worker = queue.worker.clone().expect("pushing task without a worker");
        let sequence = queue.queue.get_sequence_number(&spec);

        // The request carries a copy of the spec: failure recovery needs the
        // original.
        let request = PushTaskRequest {
            spec: spec.clone(),
            intended_worker: worker,
            sequence,
        };

        let backlog = match channel.processed_up_to() {
            Some(processed) => sequence.saturating_sub(processed),
            None => sequence + 1,
        };
        debug!(task = ?spec.task, actor = ?spec.actor, sequence, backlog, "pushing task");
        if backlog >= queue.next_warn_threshold {
            self.metrics.warnings.inc();
            (self.warn_excess_queueing)(&spec.actor, backlog);
            queue.next_warn_threshold *= 2;
        }

        // The reply handler proper is parked in the in-flight table; the
        // callback handed to the channel only moves it out. A reply whose
        // entry is gone was already failed synthetically by a disconnect.
        let reply: ReplyCallback = {
            let submitter = self.clone();
            let address = channel.address();
            let spec = spec.clone();
            Box::new(move |result| submitter.handle_reply(address, spec, result))
        };
        queue.inflight.insert(spec.task.clone(), reply);

        let wrapper: ReplyCallback = {
            let submitter = self.clone();
            let task = spec.task.clone();
            let actor = spec.actor.clone();
            Box::new(move |result| {
                let callback = {
                    let mut actors = submitter.actors.lock();
                    let queue = actors.get_mut(&actor).expect("unknown actor");
                    let Some(callback) = queue.inflight.remove(&task) else {
                        debug!(?task, "task already failed; ignoring reply");
                        return;
                    };
                    callback
                };
                callback(result);
            })
        };
        channel.push_task(request, skip_queue, wrapper);
    }

    /// Reply processing for a pushed task, invoked with the mutex released.
    fn handle_reply(&self, address: Address, spec: TaskSpec, result: Result<PushTaskReply, Error>) {
        let mut completed = true;
        match result {
            // A skip-execution push only advances the server counter: there
            // is no pending task to complete or fail.
            _ if spec.skip_execution => {}
            Ok(reply) => {
                self.metrics.completed.inc();
                self.finisher
                    .complete_pending_task(spec.task.clone(), reply, address);
            }
            Err(error) => {
                // Push failed due to a network error: the actor may be dead
                // without the death notification having arrived yet.
                let (dead, creation_failure) = {
                    let actors = self.actors.lock();
                    let queue = actors.get(&spec.actor).expect("unknown actor");
                    (queue.state == ActorState::Dead, queue.creation_failure.clone())
                };
                self.metrics.failed.inc();
                let will_retry = self.finisher.pending_task_failed(
                    spec.task.clone(),
                    ErrorKind::ActorDied,
                    error,
                    creation_failure,
                    dead,
                );
                if will_retry {
                    // The queue entry stays; it is re-sent on the next
                    // connect.
                    completed = false;
                } else if !dead {
                    let mut died = None;
                    {
                        let mut actors = self.actors.lock();
                        let queue = actors.get_mut(&spec.actor).expect("unknown actor");
                        if queue.state == ActorState::Dead {
                            // Death info arrived while the finisher was
                            // consulted.
                            died = Some(queue.creation_failure.clone());
                        } else {
                            let deadline =
                                self.context.current() + self.wait_for_death_info_timeout;
                            queue.wait_for_death_info.push_back((deadline, spec.clone()));
                            info!(
                                task = ?spec.task,
                                awaiting = queue.wait_for_death_info.len(),
                                "push failed; stashing task until death info arrives"
                            );
                        }
                    }
                    if let Some(creation_failure) = died {
                        self.metrics.failed.inc();
                        self.finisher.mark_pending_task_failed(
                            spec.clone(),
                            ErrorKind::ActorDied,
                            creation_failure,
                        );
                    }
                }
            }
        }

        if completed {
            let mut actors = self.actors.lock();
            if let Some(queue) = actors.get_mut(&spec.actor) {
                queue.queue.mark_task_completed(spec.sequence);
            }
        }
    }
}
