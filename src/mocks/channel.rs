//! Mock channel and pool implementations for testing.

use crate::{
    types::{Address, KillRequest, PushTaskReply, PushTaskRequest, SequenceNumber, WorkerId},
    Error, KillCallback, ReplyCallback,
};
use commonware_utils::sync::Mutex;
use std::sync::Arc;

/// A recorded push.
#[derive(Clone, Debug)]
pub struct Pushed {
    pub request: PushTaskRequest,
    pub skip_queue: bool,
}

struct Inner {
    pushes: Vec<Pushed>,
    /// Reply callbacks, parallel to `pushes`. Consumed on delivery.
    callbacks: Vec<Option<ReplyCallback>>,
    kills: Vec<KillRequest>,
    processed_up_to: Option<SequenceNumber>,
}

/// Channel that records traffic and lets tests deliver replies manually.
#[derive(Clone)]
pub struct Channel {
    address: Address,
    inner: Arc<Mutex<Inner>>,
}

impl Channel {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            inner: Arc::new(Mutex::new(Inner {
                pushes: Vec::new(),
                callbacks: Vec::new(),
                kills: Vec::new(),
                processed_up_to: None,
            })),
        }
    }

    /// All pushes observed so far, in push order.
    pub fn pushes(&self) -> Vec<Pushed> {
        self.inner.lock().pushes.clone()
    }

    /// All kill requests observed so far.
    pub fn kills(&self) -> Vec<KillRequest> {
        self.inner.lock().kills.clone()
    }

    /// Indexes of pushes whose replies have not been delivered yet.
    pub fn undelivered(&self) -> Vec<usize> {
        self.inner
            .lock()
            .callbacks
            .iter()
            .enumerate()
            .filter(|(_, callback)| callback.is_some())
            .map(|(index, _)| index)
            .collect()
    }

    /// Sets the processed-sequence-number hint reported to the submitter.
    pub fn set_processed_up_to(&self, sequence: SequenceNumber) {
        self.inner.lock().processed_up_to = Some(sequence);
    }

    /// Delivers the reply for the index-th push.
    ///
    /// Panics if the reply was already delivered.
    pub fn reply(&self, index: usize, result: Result<PushTaskReply, Error>) {
        let callback = {
            let mut inner = self.inner.lock();
            inner.callbacks[index].take().expect("reply already delivered")
        };
        callback(result);
    }
}

impl crate::Channel for Channel {
    fn push_task(&self, request: PushTaskRequest, skip_queue: bool, callback: ReplyCallback) {
        let mut inner = self.inner.lock();
        inner.pushes.push(Pushed {
            request,
            skip_queue,
        });
        inner.callbacks.push(Some(callback));
    }

    fn kill_actor(&self, request: KillRequest, _callback: Option<KillCallback>) {
        self.inner.lock().kills.push(request);
    }

    fn address(&self) -> Address {
        self.address.clone()
    }

    fn processed_up_to(&self) -> Option<SequenceNumber> {
        self.inner.lock().processed_up_to
    }
}

struct PoolInner {
    created: Vec<Channel>,
    disconnected: Vec<WorkerId>,
}

/// Pool that vends recording channels keyed by socket address.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Mutex<PoolInner>>,
}

impl Pool {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                created: Vec::new(),
                disconnected: Vec::new(),
            })),
        }
    }

    /// All channels ever created, in creation order.
    pub fn channels(&self) -> Vec<Channel> {
        self.inner.lock().created.clone()
    }

    /// The index-th channel ever created.
    pub fn channel(&self, index: usize) -> Channel {
        self.inner.lock().created[index].clone()
    }

    /// Workers the submitter released connections to.
    pub fn disconnected(&self) -> Vec<WorkerId> {
        self.inner.lock().disconnected.clone()
    }
}

impl crate::ClientPool for Pool {
    type Channel = Channel;

    fn get_or_connect(&self, address: &Address) -> Channel {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .created
            .iter()
            .find(|channel| channel.address == *address)
        {
            return existing.clone();
        }
        let channel = Channel::new(address.clone());
        inner.created.push(channel.clone());
        channel
    }

    fn disconnect(&self, worker: &WorkerId) {
        self.inner.lock().disconnected.push(worker.clone());
    }
}
