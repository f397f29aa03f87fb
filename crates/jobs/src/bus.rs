//! Per-job progress bus.
//!
//! Fans progress events out to every currently registered subscriber without
//! ever waiting on them. Each subscriber owns a bounded mailbox; when a slow
//! subscriber's mailbox is full the oldest buffered event is dropped to make
//! room. The terminal event bypasses the queue entirely (it sits in its own
//! slot), so it is never dropped.
//!
//! Once the terminal event is published the bus is closed: the registry is
//! emptied and the terminal event is retained, so a late subscriber receives
//! exactly that one event followed by end-of-stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use autoinsights_types::{JobId, ProgressEvent};
use metrics::counter;
use tokio::sync::Notify;

/// Default per-subscriber mailbox size.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub type SubscriberId = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("progress bus for job {0} is closed")]
    Closed(JobId),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("progress bus mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

#[derive(Default)]
struct Slots {
    queue: VecDeque<ProgressEvent>,
    terminal: Option<ProgressEvent>,
    closed: bool,
    dropped: u64,
}

/// Single-consumer bounded queue with a dedicated terminal slot.
struct Mailbox {
    capacity: usize,
    slots: Mutex<Slots>,
    notify: Notify,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(Slots::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue an event. Returns `true` when an older event was evicted.
    fn push(&self, event: ProgressEvent) -> bool {
        let evicted = {
            let mut slots = lock(&self.slots);
            if slots.closed {
                return false;
            }
            if event.is_terminal() {
                slots.terminal = Some(event);
                slots.closed = true;
                false
            } else {
                let evicted = if slots.queue.len() >= self.capacity {
                    slots.queue.pop_front();
                    slots.dropped += 1;
                    true
                } else {
                    false
                };
                slots.queue.push_back(event);
                evicted
            }
        };
        // notify_one stores a permit when nobody is waiting yet.
        self.notify.notify_one();
        evicted
    }

    /// No further events will be enqueued; buffered ones remain readable.
    fn close(&self) {
        lock(&self.slots).closed = true;
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<ProgressEvent> {
        loop {
            {
                let mut slots = lock(&self.slots);
                if let Some(event) = slots.queue.pop_front() {
                    return Some(event);
                }
                if let Some(event) = slots.terminal.take() {
                    return Some(event);
                }
                if slots.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn dropped(&self) -> u64 {
        lock(&self.slots).dropped
    }
}

struct BusState {
    subscribers: HashMap<SubscriberId, Arc<Mailbox>>,
    terminal: Option<ProgressEvent>,
    published: u64,
}

struct BusInner {
    job_id: JobId,
    capacity: usize,
    next_subscriber: AtomicU64,
    state: Mutex<BusState>,
}

impl BusInner {
    fn remove(&self, id: SubscriberId) -> bool {
        lock(&self.state).subscribers.remove(&id).is_some()
    }
}

/// Publish/subscribe channel for one job's progress events.
///
/// Cheap to clone; all clones share the same subscriber registry.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl ProgressBus {
    pub fn new(job_id: JobId, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                job_id,
                capacity,
                next_subscriber: AtomicU64::new(1),
                state: Mutex::new(BusState {
                    subscribers: HashMap::new(),
                    terminal: None,
                    published: 0,
                }),
            }),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.inner.job_id
    }

    /// Deliver `event` to every registered subscriber, in publish order.
    ///
    /// Never waits on a subscriber. Publishing a terminal event closes the
    /// bus; anything published afterwards is rejected.
    pub fn publish(&self, event: ProgressEvent) -> Result<(), BusError> {
        let mut state = lock(&self.inner.state);
        if state.terminal.is_some() {
            return Err(BusError::Closed(self.inner.job_id.clone()));
        }

        for (id, mailbox) in &state.subscribers {
            if mailbox.push(event.clone()) {
                counter!("progress_events_dropped_total").increment(1);
                tracing::debug!(
                    job_id = %self.inner.job_id,
                    subscriber = id,
                    "slow subscriber, dropped oldest buffered event"
                );
            }
        }
        state.published += 1;
        counter!("progress_events_published_total").increment(1);

        if event.is_terminal() {
            // Every mailbox now holds the terminal event and is closed.
            state.subscribers.clear();
            state.terminal = Some(event);
            tracing::debug!(
                job_id = %self.inner.job_id,
                published = state.published,
                "progress bus closed"
            );
        }
        Ok(())
    }

    /// Register a new subscriber. It only sees events published from now on;
    /// on a closed bus it sees just the retained terminal event.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new(self.inner.capacity));

        {
            let mut state = lock(&self.inner.state);
            match &state.terminal {
                Some(terminal) => {
                    mailbox.push(terminal.clone());
                }
                None => {
                    state.subscribers.insert(id, Arc::clone(&mailbox));
                }
            }
        }

        Subscription {
            id,
            job_id: self.inner.job_id.clone(),
            mailbox,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Idempotent; only affects future publishes.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.state).subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).terminal.is_some()
    }

    /// The retained terminal event, once the bus is closed.
    pub fn terminal_event(&self) -> Option<ProgressEvent> {
        lock(&self.inner.state).terminal.clone()
    }
}

/// A subscriber's receiving end. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    job_id: JobId,
    mailbox: Arc<Mailbox>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next event in publish order, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.mailbox.recv().await
    }

    /// Stop receiving future publishes. Already-buffered events can still be
    /// drained with `recv`.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(self.id) {
                tracing::trace!(job_id = %self.job_id, subscriber = self.id, "unsubscribed");
            }
        }
        self.mailbox.close();
    }

    /// Events evicted from this subscriber's mailbox because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
