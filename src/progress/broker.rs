// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-session progress queues.
//!
//! A session is created lazily by whichever comes first: a publish or a
//! subscribe. Events are delivered FIFO and at most once; a subscriber that
//! joins late only sees what is still queued. The run ends the queue with a
//! done sentinel, which subscribers see as [`StreamFrame::Complete`].
//!
//! Sessions are owned by the broker's concurrent map. A sweeper evicts sessions
//! that were fully consumed or have been idle longer than the TTL. Each session
//! carries a cancellation token; dropping a subscription before the terminal
//! frame cancels the run behind it. A session id may be reused;
//! [`ProgressBroker::begin_run`] clears what the previous run left behind.

use crate::progress::ProgressEvent;
use dashmap::DashMap;
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
enum QueueItem {
    Event(ProgressEvent),
    Done,
}

/// One frame of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(ProgressEvent),
    /// No event arrived within the heartbeat interval.
    Heartbeat,
    /// The run finished; the stream ends after this frame.
    Complete,
}

type Receiver = mpsc::UnboundedReceiver<QueueItem>;

#[derive(Debug)]
struct Session {
    sender: mpsc::UnboundedSender<QueueItem>,
    receiver: Arc<tokio::sync::Mutex<Receiver>>,
    cancel: Mutex<CancellationToken>,
    last_activity: Mutex<Instant>,
    /// Done sentinel published.
    finished: AtomicBool,
    /// Done sentinel delivered to a subscriber.
    drained: AtomicBool,
}

impl Session {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            cancel: Mutex::new(CancellationToken::new()),
            last_activity: Mutex::new(Instant::now()),
            finished: AtomicBool::new(false),
            drained: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        match self.last_activity.lock() {
            Ok(mut last) => *last = Instant::now(),
            Err(poisoned) => *poisoned.into_inner() = Instant::now(),
        }
    }

    fn idle_since(&self) -> Instant {
        match self.last_activity.lock() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reset a session left over from an earlier run with the same id.
    fn restart(&self) -> CancellationToken {
        if self.finished.swap(false, Ordering::SeqCst) {
            self.drained.store(false, Ordering::SeqCst);
            // Frames the previous run queued but nobody read.
            if let Ok(mut receiver) = self.receiver.try_lock() {
                while receiver.try_recv().is_ok() {}
            }
        }
        let mut token = match self.cancel.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        self.touch();
        token.clone()
    }

    fn send(&self, item: QueueItem) {
        // The session owns its receiver, so the channel cannot be closed here.
        if self.sender.send(item).is_err() {
            tracing::debug!("Progress queue closed; event dropped");
        }
        self.touch();
    }
}

/// Concurrent registry of progress sessions.
#[derive(Debug)]
pub struct ProgressBroker {
    sessions: DashMap<String, Arc<Session>>,
    heartbeat: Duration,
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT)
    }
}

impl ProgressBroker {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            heartbeat,
        }
    }

    fn session(&self, session_id: &str) -> Arc<Session> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Created progress session");
                Arc::new(Session::new())
            });
        Arc::clone(entry.value())
    }

    /// Queue `event` for the session, creating it if needed.
    pub fn publish(&self, session_id: &str, event: ProgressEvent) {
        tracing::debug!(
            session_id,
            status = event.status.as_str(),
            "Progress: {}",
            event.message
        );
        self.session(session_id).send(QueueItem::Event(event));
    }

    /// Publish the done sentinel; subscribers complete after draining.
    pub fn finish(&self, session_id: &str) {
        let session = self.session(session_id);
        session.finished.store(true, Ordering::SeqCst);
        session.send(QueueItem::Done);
    }

    /// Prepare the session for a new run and return the run's cancellation token.
    ///
    /// The token is cancelled when the session's subscriber disconnects early. A
    /// finished or cancelled session from an earlier run is reset: its flags are
    /// cleared, unread frames are dropped and a fresh token is installed.
    pub fn begin_run(&self, session_id: &str) -> CancellationToken {
        self.session(session_id).restart()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stream the session's events, heartbeating while idle.
    ///
    /// The stream ends after [`StreamFrame::Complete`]. Only one subscriber reads
    /// a session at a time; a second one heartbeats until the first is dropped.
    pub fn subscribe(&self, session_id: &str) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let state = Subscription {
            session: self.session(session_id),
            receiver: None,
            heartbeat: self.heartbeat,
            completed: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.completed {
                return None;
            }
            let frame = state.next_frame().await;
            Some((frame, state))
        })
    }

    /// Remove sessions that were drained, or idle for longer than `ttl`.
    pub fn evict_stale(&self, ttl: Duration) -> usize {
        self.evict_stale_at(Instant::now(), ttl)
    }

    pub fn evict_stale_at(&self, now: Instant, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session_id, session| {
            let drained = session.drained.load(Ordering::SeqCst);
            let idle = now.saturating_duration_since(session.idle_since()) > ttl;
            let keep = !drained && !idle;
            if !keep {
                tracing::debug!(session_id, drained, idle, "Evicting progress session");
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Periodically evict stale sessions until the broker is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        ttl: Duration,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let broker = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                let evicted = broker.evict_stale(ttl);
                if evicted > 0 {
                    tracing::info!("Evicted {} stale progress sessions", evicted);
                }
            }
        })
    }
}

struct Subscription {
    session: Arc<Session>,
    receiver: Option<OwnedMutexGuard<Receiver>>,
    heartbeat: Duration,
    completed: bool,
}

impl Subscription {
    async fn next_frame(&mut self) -> StreamFrame {
        if self.receiver.is_none() {
            let waiting = Arc::clone(&self.session.receiver).lock_owned();
            match tokio::time::timeout(self.heartbeat, waiting).await {
                Ok(receiver) => self.receiver = Some(receiver),
                Err(_) => return StreamFrame::Heartbeat,
            }
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return StreamFrame::Heartbeat;
        };

        let frame = match tokio::time::timeout(self.heartbeat, receiver.recv()).await {
            Ok(Some(QueueItem::Event(event))) => StreamFrame::Event(event),
            Ok(Some(QueueItem::Done)) | Ok(None) => {
                self.completed = true;
                self.session.drained.store(true, Ordering::SeqCst);
                StreamFrame::Complete
            }
            Err(_) => StreamFrame::Heartbeat,
        };
        self.session.touch();
        frame
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Only the subscriber holding the queue speaks for the client.
        let reading = self.receiver.is_some();
        if reading && !self.completed && !self.session.finished.load(Ordering::SeqCst) {
            tracing::info!("Progress subscriber disconnected early; cancelling run");
            self.session.cancel_token().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStatus;
    use futures::StreamExt;

    fn event(status: ProgressStatus, message: &str) -> ProgressEvent {
        ProgressEvent::new(status, message)
    }

    #[tokio::test]
    async fn test_publish_before_subscribe_is_delivered_in_order() {
        let broker = ProgressBroker::new(Duration::from_millis(50));
        broker.publish("s1", event(ProgressStatus::Parsing, "one"));
        broker.publish("s1", event(ProgressStatus::Retrieving, "two"));
        broker.finish("s1");

        let frames: Vec<StreamFrame> = broker.subscribe("s1").collect().await;
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], StreamFrame::Event(e) if e.message == "one"));
        assert!(matches!(&frames[1], StreamFrame::Event(e) if e.message == "two"));
        assert_eq!(frames[2], StreamFrame::Complete);
    }

    #[tokio::test]
    async fn test_subscribe_first_creates_session() {
        let broker = Arc::new(ProgressBroker::new(Duration::from_millis(20)));
        let mut stream = Box::pin(broker.subscribe("late"));
        assert!(broker.contains("late"));

        let publisher = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            publisher.publish("late", event(ProgressStatus::Analyzing, "go"));
            publisher.finish("late");
        });

        let mut saw_heartbeat = false;
        let mut saw_event = false;
        while let Some(frame) = stream.next().await {
            match frame {
                StreamFrame::Heartbeat => saw_heartbeat = true,
                StreamFrame::Event(e) => {
                    assert_eq!(e.status, ProgressStatus::Analyzing);
                    saw_event = true;
                }
                StreamFrame::Complete => break,
            }
        }
        assert!(saw_heartbeat, "idle subscriber should receive heartbeats");
        assert!(saw_event);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_consumed_events_are_not_replayed() {
        let broker = ProgressBroker::new(Duration::from_millis(20));
        broker.publish("s", event(ProgressStatus::Parsing, "first"));

        {
            let mut stream = Box::pin(broker.subscribe("s"));
            let frame = stream.next().await;
            assert!(matches!(frame, Some(StreamFrame::Event(_))));
        }

        broker.finish("s");
        let frames: Vec<StreamFrame> = broker.subscribe("s").collect().await;
        assert_eq!(frames, vec![StreamFrame::Complete]);
    }

    #[tokio::test]
    async fn test_early_disconnect_cancels_run() {
        let broker = ProgressBroker::new(Duration::from_millis(10));
        let token = broker.begin_run("c");
        {
            let mut stream = Box::pin(broker.subscribe("c"));
            assert_eq!(stream.next().await, Some(StreamFrame::Heartbeat));
        }
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_disconnect_after_finish_does_not_cancel() {
        let broker = ProgressBroker::new(Duration::from_millis(10));
        let token = broker.begin_run("f");
        broker.publish("f", event(ProgressStatus::Parsing, "x"));
        broker.finish("f");
        {
            let mut stream = Box::pin(broker.subscribe("f"));
            assert!(matches!(stream.next().await, Some(StreamFrame::Event(_))));
        }
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_waiting_subscriber_heartbeats() {
        let broker = ProgressBroker::new(Duration::from_millis(20));
        let token = broker.begin_run("shared");
        let mut first = Box::pin(broker.subscribe("shared"));
        assert_eq!(first.next().await, Some(StreamFrame::Heartbeat));

        {
            let mut second = Box::pin(broker.subscribe("shared"));
            let frame = tokio::time::timeout(Duration::from_millis(300), second.next())
                .await
                .expect("second subscriber should not block on the first");
            assert_eq!(frame, Some(StreamFrame::Heartbeat));
        }
        assert!(
            !token.is_cancelled(),
            "a subscriber that never read the queue must not cancel the run"
        );

        broker.publish("shared", event(ProgressStatus::Parsing, "still flowing"));
        broker.finish("shared");
        let rest: Vec<StreamFrame> = first.collect().await;
        assert!(
            rest.iter()
                .any(|f| matches!(f, StreamFrame::Event(e) if e.message == "still flowing"))
        );
        assert_eq!(rest.last(), Some(&StreamFrame::Complete));
    }

    #[tokio::test]
    async fn test_begin_run_resets_reused_session() {
        let broker = ProgressBroker::new(Duration::from_millis(10));
        let first = broker.begin_run("again");
        {
            let mut stream = Box::pin(broker.subscribe("again"));
            assert_eq!(stream.next().await, Some(StreamFrame::Heartbeat));
        }
        assert!(first.is_cancelled());
        broker.publish("again", event(ProgressStatus::Error, "Analysis cancelled"));
        broker.finish("again");

        let second = broker.begin_run("again");
        assert!(!second.is_cancelled());
        broker.publish("again", event(ProgressStatus::Finishing, "second run"));
        broker.finish("again");

        let frames: Vec<StreamFrame> = broker.subscribe("again").collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], StreamFrame::Event(e) if e.message == "second run"));
        assert_eq!(frames[1], StreamFrame::Complete);

        let third = broker.begin_run("again");
        assert!(!third.is_cancelled());
        assert_eq!(
            broker.evict_stale(Duration::from_secs(600)),
            0,
            "a restarted session is no longer drained"
        );
    }

    #[tokio::test]
    async fn test_eviction_of_drained_and_idle_sessions() {
        let broker = ProgressBroker::new(Duration::from_millis(10));
        broker.finish("drained");
        let _: Vec<StreamFrame> = broker.subscribe("drained").collect().await;
        broker.publish("active", event(ProgressStatus::Parsing, "x"));
        broker.publish("orphan", event(ProgressStatus::Parsing, "never read"));

        assert_eq!(broker.evict_stale(Duration::from_secs(600)), 1);
        assert!(!broker.contains("drained"));
        assert!(broker.contains("active"));

        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(broker.evict_stale_at(later, Duration::from_secs(600)), 2);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_session_creation() {
        let broker = Arc::new(ProgressBroker::default());
        let mut handles = Vec::new();
        for i in 0..16 {
            let broker = Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                let id = format!("session-{}", i % 4);
                broker.publish(&id, event(ProgressStatus::Parsing, "x"));
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
        assert_eq!(broker.len(), 4);
    }
}
