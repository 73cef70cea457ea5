//! Invalidation event system.
//!
//! Content-lifecycle changes arrive as typed events on an in-memory queue
//! rather than as ad-hoc calls from arbitrary sites; the coordinator
//! consumes them in batches.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::content::ContentId;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_QUEUE_LEN: &str = "macp_cache_event_queue_len";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// Invalidation event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    /// The scope and cause of the invalidation.
    pub kind: EventKind,
    /// When the event was created.
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Lifecycle changes that trigger invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    // Content-id scope
    /// A content item was created or first published.
    ContentPublished { content_id: ContentId },
    /// A content item was updated.
    ContentUpdated { content_id: ContentId },
    /// A content item was trashed or unpublished.
    ContentTrashed { content_id: ContentId },
    /// A comment was posted on a content item.
    CommentPosted { content_id: ContentId },

    // Single-URL scope
    /// One URL's cached page must go.
    UrlTouched { url: String },

    // Global scope
    /// The active theme changed; every rendered page is stale.
    ThemeSwitched,
    /// Operator-requested full flush.
    FlushAll,
}

/// In-memory invalidation queue.
///
/// Events are published by write paths and consumed by the coordinator.
/// A mutex is enough here since contention is expected to be low.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish an event to the queue. The event is logged for
    /// observability.
    pub fn publish(&self, kind: EventKind) {
        let epoch = self.next_epoch();
        let event = CacheEvent::new(kind.clone(), epoch);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?kind,
            "invalidation event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(event);
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
