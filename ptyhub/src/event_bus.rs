// Per-session subscriber fan-out. The teacher has no analog for this —
// it serves at most one attached client per session — so the queueing
// here is new, but it reuses the same Mutex+Condvar shape the teacher
// uses for its `ExitNotifier` (folded into `pty.rs`), generalized to a bounded
// multi-item queue with a drop-oldest-output backpressure policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ptyhub_protocol::{McpMessage, SessionId};

use crate::error::CoreError;

pub use ptyhub_protocol::SessionEvent;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One delivered event, annotated with how many prior events this
/// subscriber missed due to overflow since the last delivery.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub event: SessionEvent,
    pub overflow_count: u64,
}

struct Inner {
    queue: Mutex<VecDeque<SessionEvent>>,
    cvar: Condvar,
    capacity: usize,
    overflow_count: AtomicU64,
    closed: Mutex<bool>,
}

/// A subscriber's unsubscribe handle and delivery sink. Lifetime is tied
/// to this handle, not to a closure capture.
#[derive(Clone)]
pub struct Subscriber {
    id: u64,
    inner: Arc<Inner>,
}

impl Subscriber {
    fn new(id: u64, capacity: usize) -> Subscriber {
        Subscriber {
            id,
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                cvar: Condvar::new(),
                capacity,
                overflow_count: AtomicU64::new(0),
                closed: Mutex::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks until an event is available, the bus closes this
    /// subscriber (terminal `Exit` already delivered), or `timeout`
    /// elapses.
    pub fn recv(&self, timeout: Option<Duration>) -> Option<Delivered> {
        let mut queue = self.inner.queue.lock().unwrap();
        loop {
            if let Some(event) = queue.pop_front() {
                let overflow = self.inner.overflow_count.swap(0, Ordering::AcqRel);
                return Some(Delivered { event, overflow_count: overflow });
            }
            if *self.inner.closed.lock().unwrap() {
                return None;
            }
            match timeout {
                Some(d) => {
                    let (q, res) = self.inner.cvar.wait_timeout(queue, d).unwrap();
                    queue = q;
                    if res.timed_out() {
                        return None;
                    }
                }
                None => queue = self.inner.cvar.wait(queue).unwrap(),
            }
        }
    }

    fn push(&self, event: SessionEvent) {
        let mut queue = self.inner.queue.lock().unwrap();
        if event.is_control() {
            queue.push_back(event);
        } else {
            if queue.len() >= self.inner.capacity {
                // drop-oldest-output: evict non-control events from the
                // front until there's room, coalescing isn't necessary
                // since Output is byte-oriented and order is preserved.
                while queue.len() >= self.inner.capacity {
                    match queue.front() {
                        Some(SessionEvent::Output { .. }) => {
                            queue.pop_front();
                            self.inner.overflow_count.fetch_add(1, Ordering::AcqRel);
                        }
                        _ => break,
                    }
                }
            }
            queue.push_back(event);
        }
        self.inner.cvar.notify_all();
    }

    fn close(&self) {
        *self.inner.closed.lock().unwrap() = true;
        self.inner.cvar.notify_all();
    }
}

struct SessionSubscribers {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    terminated: bool,
}

/// Per-session subscriber fan-out. Ordering per subscriber matches
/// PTY-production order; ordering across sessions is unconstrained.
#[derive(Clone)]
pub struct EventBus {
    sessions: Arc<Mutex<std::collections::HashMap<SessionId, SessionSubscribers>>>,
    mcp_subscribers: Arc<Mutex<Vec<crossbeam_channel::Sender<McpMessage>>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            sessions: Arc::new(Mutex::new(std::collections::HashMap::new())),
            mcp_subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Process-wide, not tied to any session: server/attachment/client
    /// lifecycle broadcasts. Unbounded since these are rare and must
    /// never be dropped; a GUI observer that never drains its receiver
    /// is a bug in that observer, not something this bus works around.
    pub fn subscribe_mcp(&self) -> crossbeam_channel::Receiver<McpMessage> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.mcp_subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish_mcp(&self, msg: McpMessage) {
        let mut subs = self.mcp_subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(msg.clone()).is_ok());
    }

    pub fn register_session(&self, id: SessionId) {
        self.sessions
            .lock()
            .unwrap()
            .insert(id, SessionSubscribers { next_id: 1, subscribers: Vec::new(), terminated: false });
    }

    /// Registers a new subscriber for `id`, returning its handle. Fails
    /// with `NotFound` if the session was never registered or was
    /// already disposed.
    pub fn subscribe(&self, id: SessionId, capacity: usize) -> Result<Subscriber, CoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&id).ok_or(CoreError::NotFound(id))?;
        let sub_id = entry.next_id;
        entry.next_id += 1;
        let sub = Subscriber::new(sub_id, capacity);
        entry.subscribers.push(sub.clone());
        Ok(sub)
    }

    /// Unsubscribe is a no-op once the terminal Exit has already been
    /// delivered for this session.
    pub fn unsubscribe(&self, id: SessionId, sub_id: u64) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(&id) {
            entry.subscribers.retain(|s| s.id() != sub_id);
        }
    }

    /// Publishes `event` to every subscriber of `id`, in the order
    /// given. A session that has already terminated drops further
    /// publishes silently (idempotent after Exit).
    pub fn publish(&self, id: SessionId, event: SessionEvent) {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(entry) = sessions.get_mut(&id) else { return };
        if entry.terminated {
            return;
        }
        let is_exit = matches!(event, SessionEvent::Exit { .. });
        for sub in &entry.subscribers {
            sub.push(event.clone());
        }
        if is_exit {
            for sub in &entry.subscribers {
                sub.close();
            }
            entry.terminated = true;
        }
    }

    pub fn dispose_session(&self, id: SessionId) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.remove(&id) {
            for sub in &entry.subscribers {
                sub.close();
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sid(n: u64) -> SessionId {
        SessionId(n)
    }

    #[test]
    fn subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        bus.register_session(sid(1));
        let sub = bus.subscribe(sid(1), 16).unwrap();
        bus.publish(sid(1), SessionEvent::Output { bytes: b"a".to_vec() });
        bus.publish(sid(1), SessionEvent::Output { bytes: b"b".to_vec() });
        let first = sub.recv(Some(Duration::from_millis(100))).unwrap();
        let second = sub.recv(Some(Duration::from_millis(100))).unwrap();
        match (first.event, second.event) {
            (SessionEvent::Output { bytes: a }, SessionEvent::Output { bytes: b }) => {
                assert_eq!(a, b"a");
                assert_eq!(b, b"b");
            }
            _ => panic!("unexpected events"),
        }
    }

    #[test]
    fn control_events_survive_overflow() {
        let bus = EventBus::new();
        bus.register_session(sid(1));
        let sub = bus.subscribe(sid(1), 4).unwrap();
        for _ in 0..1000 {
            bus.publish(sid(1), SessionEvent::Output { bytes: b"x".to_vec() });
        }
        bus.publish(sid(1), SessionEvent::Resize { cols: 100, rows: 30 });

        let mut last = None;
        while let Some(d) = sub.recv(Some(Duration::from_millis(50))) {
            last = Some(d.event);
        }
        assert!(matches!(last, Some(SessionEvent::Resize { cols: 100, rows: 30 })));
    }

    #[test]
    fn unsubscribe_after_exit_is_noop() {
        let bus = EventBus::new();
        bus.register_session(sid(1));
        let sub = bus.subscribe(sid(1), 16).unwrap();
        bus.publish(sid(1), SessionEvent::Exit { code: Some(0) });
        bus.unsubscribe(sid(1), sub.id());
        let delivered = sub.recv(Some(Duration::from_millis(50)));
        assert!(matches!(delivered.map(|d| d.event), Some(SessionEvent::Exit { .. })));
    }
}
