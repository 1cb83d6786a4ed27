//! Fan-out hub for live clients.
//!
//! Each subscription owns a bounded queue. Publishing never waits on a
//! client: when a queue is full the oldest queued event is dropped to make
//! room for the newest one. Closed subscriptions are pruned on the next
//! publish.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

use crate::history::HistoryStore;
use crate::types::{Event, Sample};

pub type SubscriptionId = u64;

struct Queue {
    events: Mutex<VecDeque<Event>>,
    cap: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Queue {
    fn new(cap: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, ev: Event) {
        {
            let mut q = self.events.lock().unwrap_or_else(|p| p.into_inner());
            if q.len() >= self.cap {
                q.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(ev);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A connected viewer. Dropping it marks the subscription closed.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<Queue>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next queued event; `None` once the subscription is closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            if let Some(ev) = self.queue.pop() {
                return Some(ev);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.queue.pop()
    }

    pub fn pending(&self) -> usize {
        self.queue
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Events lost to overwriting because this client fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Transport reported closed/broken.
    pub fn close(&self) {
        self.queue.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
    }
}

struct Subscribers {
    next_id: SubscriptionId,
    queues: HashMap<SubscriptionId, Arc<Queue>>,
    last_sample: Option<Arc<Sample>>,
}

pub struct Broadcaster {
    inner: Mutex<Subscribers>,
    queue_cap: usize,
}

impl Broadcaster {
    pub fn new(queue_cap: usize) -> Self {
        Self {
            inner: Mutex::new(Subscribers {
                next_id: 1,
                queues: HashMap::new(),
                last_sample: None,
            }),
            queue_cap: queue_cap.max(2),
        }
    }

    /// Register a client. Its queue starts with the current history snapshot
    /// and the last-known sample, so it has something to draw right away.
    pub fn subscribe(&self, history: &HistoryStore) -> Subscription {
        let queue = Arc::new(Queue::new(self.queue_cap));
        let mut inner = self.lock();
        // Under the subscriber lock no publish can slip in between the
        // snapshot and the registration.
        queue.push(Event::History(history.snapshot().into()));
        if let Some(s) = inner.last_sample.clone() {
            queue.push(Event::Sample(s));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.queues.insert(id, queue.clone());
        debug!(id, total = inner.queues.len(), "subscriber added");
        Subscription { id, queue }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        if let Some(q) = inner.queues.remove(&id) {
            q.close();
            debug!(id, total = inner.queues.len(), "subscriber removed");
        }
    }

    /// Deliver to every live subscriber in publish order. Never blocks on a client.
    pub fn publish(&self, ev: Event) {
        let mut inner = self.lock();
        if let Event::Sample(s) = &ev {
            inner.last_sample = Some(s.clone());
        }
        inner.queues.retain(|id, q| {
            if q.is_closed() {
                debug!(id, "pruning closed subscriber");
                return false;
            }
            q.push(ev.clone());
            true
        });
    }

    pub fn last_sample(&self) -> Option<Arc<Sample>> {
        self.lock().last_sample.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().queues.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
