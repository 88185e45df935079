//! WebSocket connection tracking and per-connection send queues.
//!
//! Each connection owns a bounded outgoing queue with a shedding policy:
//! when full, `video_frame` messages are dropped first and
//! `inference_result` messages are never dropped. The manager fans one
//! serialized envelope out to every queue and supports force-closing all
//! connections on shutdown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::WS_SEND_QUEUE_CAPACITY;

/// One serialized message awaiting delivery.
#[derive(Clone)]
pub struct QueuedMessage {
    /// Serialized `{type, data, timestamp}` envelope.
    pub text: Arc<str>,
    /// Whether the message may be shed under backpressure.
    pub droppable: bool,
}

/// Bounded per-connection send queue that sheds droppable messages first.
pub struct SendQueue {
    items: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
    capacity: usize,
    dropped_frames: AtomicU64,
    closed: AtomicBool,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped_frames: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a message. On overflow, the oldest droppable entry in the
    /// queue is evicted; if none exists a droppable incoming message is
    /// discarded instead. Non-droppable messages are always accepted, even
    /// if the queue must briefly exceed its capacity.
    pub fn push(&self, message: QueuedMessage) {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                if let Some(pos) = items.iter().position(|m| m.droppable) {
                    items.remove(pos);
                    self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                } else if message.droppable {
                    self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            items.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Dequeues the next message, waiting for one. Returns `None` once the
    /// queue is closed and drained.
    pub async fn pop(&self) -> Option<QueuedMessage> {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.items.lock().pop_front() {
                return Some(message);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Frames shed under backpressure so far.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

/// Shared per-connection state visible to the fan-out pump.
#[derive(Clone)]
struct ConnectionState {
    queue: Arc<SendQueue>,
    streaming: Arc<AtomicBool>,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe for concurrent access from the handlers and the fan-out
/// pump. Uses hierarchical cancellation tokens for force-close.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Global cancellation token; replaced with a fresh one after
    /// `close_all` so new connections can still be accepted.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection and returns its RAII guard.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        let queue = Arc::new(SendQueue::new(WS_SEND_QUEUE_CAPACITY));
        let streaming = Arc::new(AtomicBool::new(false));
        self.connections.insert(
            conn_id.clone(),
            ConnectionState {
                queue: Arc::clone(&queue),
                streaming: Arc::clone(&streaming),
            },
        );
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            queue,
            streaming,
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if let Some((_, state)) = self.connections.remove(id) {
            state.queue.close();
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// True when at least one connection has streaming enabled. Gates the
    /// distributor-to-broadcaster frame path.
    #[must_use]
    pub fn any_streaming(&self) -> bool {
        self.connections
            .iter()
            .any(|entry| entry.streaming.load(Ordering::Relaxed))
    }

    /// Sets the streaming flag on every current connection (REST override).
    pub fn set_all_streaming(&self, enabled: bool) {
        for entry in self.connections.iter() {
            entry.streaming.store(enabled, Ordering::Relaxed);
        }
    }

    /// Fans a serialized envelope out to connections.
    ///
    /// `video_frame` messages go only to connections with streaming on;
    /// everything else goes to all.
    pub fn broadcast(&self, text: Arc<str>, droppable: bool) {
        for entry in self.connections.iter() {
            if droppable && !entry.streaming.load(Ordering::Relaxed) {
                continue;
            }
            entry.queue.push(QueuedMessage {
                text: Arc::clone(&text),
                droppable,
            });
        }
    }

    /// Force-closes all connections; returns how many were signaled.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a connection when dropped.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    queue: Arc<SendQueue>,
    streaming: Arc<AtomicBool>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<SendQueue> {
        &self.queue
    }

    /// Per-connection streaming flag, toggled by `start_stream` /
    /// `stop_stream` commands.
    pub fn set_streaming(&self, enabled: bool) {
        self.streaming.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    /// Token cancelled on force-close; select on it in the socket loops.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}
