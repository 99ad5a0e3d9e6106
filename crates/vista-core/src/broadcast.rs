//! Fan-out hub for log lines, plus the tracing layer that feeds it.
//!
//! Each subscriber gets a bounded queue. The registry lock is held for the
//! whole fan-out of one line, so every channel observes publishes in the same
//! order. A subscriber whose queue is full is disconnected rather than
//! waited on or silently skipped: it drains what it has, then sees the end of
//! the stream. Nothing is buffered for subscribers that join later.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::obs;

/// One line delivered to log-stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: String,
    pub line: String,
}

impl LogLine {
    pub fn new(level: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            line: line.into(),
        }
    }
}

/// Identifier of a registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

/// Lines a subscriber may have queued before it is disconnected.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

type Registry = BTreeMap<SubscriberId, mpsc::Sender<LogLine>>;

struct HubInner {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: Mutex<Registry>,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panicking subscriber must not take the hub down with it.
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        self.registry().remove(&id).is_some()
    }
}

/// Multi-subscriber broadcast hub. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Hub whose subscribers may each fall `capacity` lines behind.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                subscribers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a new channel. It receives every line published from now on.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.registry().insert(id, tx);
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a line to every registered channel. Never blocks.
    ///
    /// Channels whose receiver is gone are dropped from the registry silently;
    /// channels that are full are dropped and reported once the lock is
    /// released. Returns the number of channels the line was delivered to.
    pub fn publish(&self, level: &str, line: &str) -> usize {
        let msg = LogLine::new(level, line);
        let mut lagged = Vec::new();
        let mut delivered = 0;
        {
            let mut registry = self.inner.registry();
            let mut gone = Vec::new();
            for (id, tx) in registry.iter() {
                match tx.try_send(msg.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        lagged.push(*id);
                        gone.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => gone.push(*id),
                }
            }
            for id in gone {
                registry.remove(&id);
            }
        }
        // Outside the lock: this event may itself be mirrored into the hub.
        for id in lagged {
            obs::emit_log_subscriber_lagged(id.0, self.inner.capacity);
        }
        delivered
    }

    /// Remove a channel. Safe to call any number of times.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Tracing layer that mirrors every log event into this hub.
    pub fn layer(&self) -> BroadcastLayer {
        BroadcastLayer { hub: self.clone() }
    }
}

/// Receiving side of one channel. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<LogLine>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next line, or `None` once unsubscribed (or disconnected for lagging)
    /// and drained.
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    /// Leave the hub. Lines already queued can still be drained.
    pub fn unsubscribe(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

thread_local! {
    static MIRRORING: Cell<bool> = const { Cell::new(false) };
}

/// Resets the reentrancy flag even if publishing panics.
struct MirrorGuard;

impl MirrorGuard {
    fn acquire() -> Option<Self> {
        MIRRORING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(MirrorGuard)
            }
        })
    }
}

impl Drop for MirrorGuard {
    fn drop(&mut self) {
        MIRRORING.with(|flag| flag.set(false));
    }
}

/// `tracing_subscriber` layer that forwards formatted events to a hub.
///
/// Installed beside the regular fmt layer, so normal log output is unaffected.
/// Events emitted while a line is being mirrored on the same thread are not
/// mirrored again.
pub struct BroadcastLayer {
    hub: BroadcastHub,
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(_guard) = MirrorGuard::acquire() else {
            return;
        };
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let level = event.metadata().level().as_str().to_ascii_lowercase();
        self.hub.publish(&level, &visitor.finish());
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn push_field(&mut self, name: &str, value: &str) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), &format!("{value:?}"));
        }
    }
}
