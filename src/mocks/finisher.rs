//! Mock finisher implementation for testing.

use crate::{
    types::{Address, PushTaskReply, TaskId, TaskSpec},
    Error, ErrorKind,
};
use bytes::Bytes;
use commonware_utils::sync::Mutex;
use std::sync::Arc;

/// One report received from the submitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Completed {
        task: TaskId,
        reply: PushTaskReply,
        address: Address,
    },
    Failed {
        task: TaskId,
        kind: ErrorKind,
        error: Error,
        creation_failure: Option<Bytes>,
        immediately_mark_failed: bool,
    },
    Canceled {
        task: TaskId,
    },
    PendingFailed {
        task: TaskId,
        kind: ErrorKind,
        creation_failure: Option<Bytes>,
    },
}

struct Inner {
    will_retry: bool,
    events: Vec<Event>,
    reentry: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Finisher that records every report and returns a configurable retry
/// decision.
#[derive(Clone)]
pub struct Finisher {
    inner: Arc<Mutex<Inner>>,
}

impl Finisher {
    pub fn new(will_retry: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                will_retry,
                events: Vec::new(),
                reentry: None,
            })),
        }
    }

    /// Changes the retry decision returned to the submitter.
    pub fn set_will_retry(&self, will_retry: bool) {
        self.inner.lock().will_retry = will_retry;
    }

    /// Invokes the given hook on every report. Used to verify the submitter
    /// holds no lock across finisher calls: a hook that re-enters the
    /// submitter deadlocks if it does.
    pub fn set_reentry(&self, hook: Arc<dyn Fn() + Send + Sync>) {
        self.inner.lock().reentry = Some(hook);
    }

    /// Every report received so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.clone()
    }

    fn record(&self, event: Event) -> bool {
        let (will_retry, reentry) = {
            let mut inner = self.inner.lock();
            inner.events.push(event);
            (inner.will_retry, inner.reentry.clone())
        };
        if let Some(hook) = reentry {
            hook();
        }
        will_retry
    }
}

impl crate::Finisher for Finisher {
    fn complete_pending_task(&self, task: TaskId, reply: PushTaskReply, address: Address) {
        self.record(Event::Completed {
            task,
            reply,
            address,
        });
    }

    fn pending_task_failed(
        &self,
        task: TaskId,
        kind: ErrorKind,
        error: Error,
        creation_failure: Option<Bytes>,
        immediately_mark_failed: bool,
    ) -> bool {
        self.record(Event::Failed {
            task,
            kind,
            error,
            creation_failure,
            immediately_mark_failed,
        })
    }

    fn mark_task_canceled(&self, task: TaskId) {
        self.record(Event::Canceled { task });
    }

    fn mark_pending_task_failed(
        &self,
        spec: TaskSpec,
        kind: ErrorKind,
        creation_failure: Option<Bytes>,
    ) {
        self.record(Event::PendingFailed {
            task: spec.task,
            kind,
            creation_failure,
        });
    }
}
