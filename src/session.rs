//! Session — the per-connection state machine (§4.2).
//!
//! A `Session` owns a bounded outbound queue between the Room Hub and the
//! socket writer task. Enqueue never blocks: on overflow the oldest queued
//! `Droppable` frame is evicted first so a `state` snapshot always wins a
//! spot over chat or heartbeat noise. A `state` frame only overloads the
//! session when the queue holds nothing droppable left to evict.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::protocol::{close_codes, ServerMessage, UserId};

/// Lifecycle stage of a connection, advanced by the Gateway and Hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Ready,
    Closing,
    Closed,
}

/// Priority class used to decide which queued frame is sacrificed when the
/// outbound queue is full (§4.2, §8 scenario S6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Droppable,
    Critical,
}

fn classify(message: &ServerMessage) -> Priority {
    match message {
        ServerMessage::State { .. } => Priority::Critical,
        ServerMessage::Participants { .. }
        | ServerMessage::Sync { .. }
        | ServerMessage::Error { .. }
        | ServerMessage::Heartbeat { .. } => Priority::Droppable,
    }
}

/// Result of attempting to enqueue an outbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Enqueued directly; the queue had room.
    Queued,
    /// A lower-priority queued frame was evicted to make room.
    QueuedAfterEviction,
    /// The queue was full of frames at least as critical as this one; the
    /// frame itself was dropped.
    Dropped,
    /// The frame was `state` and the queue was saturated with other
    /// critical frames — the caller must close the session with 1011.
    Overloaded,
}

/// No close requested yet; `0` is not a valid WebSocket close code.
const NO_CLOSE_REQUESTED: u16 = 0;

/// State shared between a `Session` and every `SessionHandle` cloned from it:
/// the outbound queue itself (a `Mutex<VecDeque<_>>` rather than a bounded
/// `mpsc`, since a bounded channel's sender has no way to evict an
/// already-queued frame), the wakeup for a waiting receiver, the close
/// signal, and a count of live handles so `recv` can tell "queue drained and
/// nothing will ever send again" from "queue drained, more may still come".
struct Shared {
    queue: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    item_ready: Notify,
    close_requested: AtomicU16,
    close_notify: Notify,
    handles: AtomicUsize,
}

/// The write-side half of a session: a handle onto the shared queue plus the
/// eviction policy from §4.2. Cloned cheaply (an `Arc` clone) and handed to
/// the Room Hub so it can push frames without holding any session lock for
/// longer than a single push.
pub struct SessionHandle {
    user_id: UserId,
    inner: Arc<Shared>,
}

impl SessionHandle {
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Enqueue `message`, evicting the oldest queued `Droppable` frame if
    /// the queue is saturated and `message` is `Critical`. Never blocks. An
    /// [`EnqueueOutcome::Overloaded`] result also wakes the writer task so
    /// it can close with 1011.
    pub fn enqueue(&self, message: ServerMessage) -> EnqueueOutcome {
        let outcome = {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.len() < self.inner.capacity {
                queue.push_back(message);
                EnqueueOutcome::Queued
            } else {
                self.evict_and_retry(&mut queue, message)
            }
        };
        match outcome {
            EnqueueOutcome::Queued | EnqueueOutcome::QueuedAfterEviction => {
                self.inner.item_ready.notify_one();
            }
            EnqueueOutcome::Overloaded => self.request_close(close_codes::INTERNAL_ERROR),
            EnqueueOutcome::Dropped => {}
        }
        outcome
    }

    /// Ask this session's writer task to close with `code` at its next
    /// opportunity. Used both for overload (§4.2/§8 S6) and for replacing a
    /// stale connection on re-attach (§8 round-trip law).
    pub fn request_close(&self, code: u16) {
        self.inner.close_requested.store(code, Ordering::SeqCst);
        self.inner.close_notify.notify_one();
    }

    /// Called with the queue already full. A `Critical` frame evicts the
    /// oldest `Droppable` frame in the queue (front of the deque, since
    /// frames are always pushed at the back); if none exists to evict, the
    /// queue is saturated with frames this important or more and the
    /// session is overloaded. A `Droppable` frame arriving to a full queue
    /// is simply dropped.
    fn evict_and_retry(&self, queue: &mut VecDeque<ServerMessage>, message: ServerMessage) -> EnqueueOutcome {
        let priority = classify(&message);
        if priority != Priority::Critical {
            return EnqueueOutcome::Dropped;
        }

        match queue.iter().position(|queued| classify(queued) == Priority::Droppable) {
            Some(index) => {
                queue.remove(index);
                queue.push_back(message);
                EnqueueOutcome::QueuedAfterEviction
            }
            None => EnqueueOutcome::Overloaded,
        }
    }
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            user_id: self.user_id,
            inner: self.inner.clone(),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last handle gone: wake a waiting `recv` so it can observe the
            // queue is both empty and abandoned, and return `None`.
            self.inner.item_ready.notify_one();
        }
    }
}

/// Owns the receiving half of a session's outbound queue; lives in the
/// socket writer task.
pub struct Session {
    user_id: UserId,
    status: SessionStatus,
    inner: Arc<Shared>,
}

impl Session {
    /// Create a new session with the configured outbound queue depth
    /// (`Config::outbound_queue_depth`, default 64).
    #[must_use]
    pub fn new(user_id: UserId, queue_depth: usize) -> (Self, SessionHandle) {
        let inner = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            capacity: queue_depth.max(1),
            item_ready: Notify::new(),
            close_requested: AtomicU16::new(NO_CLOSE_REQUESTED),
            close_notify: Notify::new(),
            handles: AtomicUsize::new(1),
        });
        let session = Self {
            user_id,
            status: SessionStatus::Connecting,
            inner: inner.clone(),
        };
        let handle = SessionHandle { user_id, inner };
        (session, handle)
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    /// Await the next outbound frame, or `None` once every [`SessionHandle`]
    /// has been dropped and the queue is drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut queue = self.inner.queue.lock().unwrap();
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
                if self.inner.handles.load(Ordering::Acquire) == 0 {
                    return None;
                }
            }
            self.inner.item_ready.notified().await;
        }
    }

    /// Resolves with the requested WebSocket close code once a
    /// [`SessionHandle::request_close`] (overload, or supersession by a
    /// reconnect) has fired. The writer task should select on this
    /// alongside `recv()`.
    pub async fn wait_close_requested(&self) -> u16 {
        loop {
            let code = self.inner.close_requested.load(Ordering::SeqCst);
            if code != NO_CLOSE_REQUESTED {
                return code;
            }
            self.inner.close_notify.notified().await;
        }
    }
}

/// Tracks the heartbeat contract (§4.2): a client is expected to send either
/// a reciprocal frame or any client frame within `timeout` of the last one
/// seen, or the session is dead. Shared (via `Arc`) between the reader task,
/// which calls [`record_activity`](Self::record_activity) on every inbound
/// frame, and the writer task, which consults
/// [`is_expired`](Self::is_expired) on its own ticker.
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_activity: Mutex<Instant>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn record_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.last_activity.lock().unwrap().elapsed() >= self.timeout
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCode, ErrorPayload, HeartbeatPayload, RoomState};
    use chrono::Utc;

    fn state_message() -> ServerMessage {
        ServerMessage::State {
            payload: RoomState::new(uuid::Uuid::new_v4(), 0.0),
        }
    }

    fn heartbeat_message() -> ServerMessage {
        ServerMessage::Heartbeat {
            payload: HeartbeatPayload {
                timestamp: Utc::now(),
                user_id: uuid::Uuid::new_v4(),
            },
        }
    }

    #[tokio::test]
    async fn queues_until_capacity() {
        let (_session, handle) = Session::new(uuid::Uuid::new_v4(), 2);
        assert_eq!(handle.enqueue(heartbeat_message()), EnqueueOutcome::Queued);
        assert_eq!(handle.enqueue(heartbeat_message()), EnqueueOutcome::Queued);
    }

    #[tokio::test]
    async fn drops_droppable_frame_when_full() {
        let (_session, handle) = Session::new(uuid::Uuid::new_v4(), 1);
        assert_eq!(handle.enqueue(heartbeat_message()), EnqueueOutcome::Queued);
        assert_eq!(handle.enqueue(heartbeat_message()), EnqueueOutcome::Dropped);
    }

    #[tokio::test]
    async fn state_frame_evicts_oldest_droppable_frame() {
        let (session, handle) = Session::new(uuid::Uuid::new_v4(), 1);
        assert_eq!(handle.enqueue(heartbeat_message()), EnqueueOutcome::Queued);
        assert_eq!(handle.enqueue(state_message()), EnqueueOutcome::QueuedAfterEviction);

        let received = session.recv().await.unwrap();
        assert!(matches!(received, ServerMessage::State { .. }));
    }

    #[tokio::test]
    async fn state_frame_overloads_when_queue_has_nothing_droppable_to_evict() {
        let (_session, handle) = Session::new(uuid::Uuid::new_v4(), 1);
        assert_eq!(handle.enqueue(state_message()), EnqueueOutcome::Queued);
        assert_eq!(handle.enqueue(state_message()), EnqueueOutcome::Overloaded);
    }

    #[tokio::test]
    async fn overload_wakes_waiting_writer() {
        let (session, handle) = Session::new(uuid::Uuid::new_v4(), 1);
        handle.enqueue(state_message());
        handle.enqueue(state_message());
        let code = tokio::time::timeout(std::time::Duration::from_secs(1), session.wait_close_requested())
            .await
            .expect("wait_close_requested should resolve once overloaded");
        assert_eq!(code, close_codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn explicit_close_request_wakes_waiting_writer() {
        let (session, handle) = Session::new(uuid::Uuid::new_v4(), 1);
        handle.request_close(close_codes::NORMAL);
        let code = tokio::time::timeout(std::time::Duration::from_secs(1), session.wait_close_requested())
            .await
            .expect("wait_close_requested should resolve once requested");
        assert_eq!(code, close_codes::NORMAL);
    }

    #[tokio::test]
    async fn recv_yields_queued_frames_in_order() {
        let (session, handle) = Session::new(uuid::Uuid::new_v4(), 4);
        handle.enqueue(heartbeat_message());
        let received = session.recv().await;
        assert!(matches!(received, Some(ServerMessage::Heartbeat { .. })));
    }

    #[tokio::test]
    async fn recv_returns_none_once_every_handle_is_dropped() {
        let (session, handle) = Session::new(uuid::Uuid::new_v4(), 4);
        drop(handle);
        assert_eq!(session.recv().await, None);
    }

    #[test]
    fn heartbeat_monitor_expires_after_timeout() {
        let monitor = HeartbeatMonitor::new(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(1),
        );
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(monitor.is_expired());
    }

    #[test]
    fn heartbeat_monitor_resets_on_activity() {
        let monitor = HeartbeatMonitor::new(
            std::time::Duration::from_secs(20),
            std::time::Duration::from_secs(45),
        );
        monitor.record_activity();
        assert!(!monitor.is_expired());
    }

    #[allow(dead_code)]
    fn error_message_is_droppable() -> ServerMessage {
        ServerMessage::Error {
            payload: ErrorPayload {
                code: ErrorCode::InternalError,
                message: "x".into(),
            },
        }
    }
}
