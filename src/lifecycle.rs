//! App foreground/background lifecycle, terminal-flow backpressure, and
//! queued notifications.
//!
//! The host runtime (embedded webview, plain browser, native shell) is an
//! external collaborator: this module never reaches into a windowing API
//! directly. A thin adapter living in the embedding application calls
//! [`LifecycleManager::observe`] whenever its host surfaces a visibility
//! signal (focus/blur, `visibilitychange`, `pagehide`/`pageshow`); this
//! module owns only the resulting state machine, the two bounded queues,
//! and the keep-alive timer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::Config;

/// A raw visibility signal from the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    Focus,
    Blur,
    DocumentHidden,
    DocumentVisible,
    PageHide,
    PageShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

#[derive(Debug, Clone)]
pub struct QueuedNotification {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    /// Unix timestamp (seconds) at which this notification was enqueued.
    pub queued_at: u64,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Foreground,
    Background,
    KeepAlive,
}

struct State {
    app_state: AppState,
    document_hidden: bool,
    terminal_paused: bool,
    terminal_queue: VecDeque<Vec<u8>>,
    notifications: VecDeque<QueuedNotification>,
    next_notification_id: u64,
}

/// Owns the app-visibility state machine and its two backpressure queues.
pub struct LifecycleManager {
    state: Mutex<State>,
    config: Config,
    events_tx: broadcast::Sender<LifecycleEvent>,
    keep_alive_enabled: AtomicBool,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(config: Config) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(State {
                app_state: AppState::Foreground,
                document_hidden: false,
                terminal_paused: false,
                terminal_queue: VecDeque::new(),
                notifications: VecDeque::new(),
                next_notification_id: 0,
            }),
            config,
            events_tx,
            keep_alive_enabled: AtomicBool::new(true),
            keep_alive_task: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    pub fn set_keep_alive_enabled(&self, enabled: bool) {
        self.keep_alive_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Feed a raw host signal into the state machine. Blur only counts as
    /// backgrounding when the document is also known to be hidden, which
    /// prevents false backgrounding from a tab switch that stays visible.
    pub async fn observe(self: &Arc<Self>, event: VisibilityEvent) {
        let mut state = self.state.lock().await;

        match event {
            VisibilityEvent::DocumentHidden | VisibilityEvent::PageHide => {
                state.document_hidden = true;
                self.transition_to(&mut state, AppState::Background);
            }
            VisibilityEvent::DocumentVisible | VisibilityEvent::PageShow => {
                state.document_hidden = false;
                self.transition_to(&mut state, AppState::Foreground);
            }
            VisibilityEvent::Blur if state.document_hidden => {
                self.transition_to(&mut state, AppState::Background);
            }
            VisibilityEvent::Blur => {}
            VisibilityEvent::Focus => {
                self.transition_to(&mut state, AppState::Foreground);
            }
        }

        let became_background = state.app_state == AppState::Background;
        drop(state);

        if became_background {
            self.start_keep_alive().await;
        } else {
            self.stop_keep_alive().await;
        }
    }

    fn transition_to(&self, state: &mut State, next: AppState) {
        if state.app_state == next {
            return;
        }
        state.app_state = next;
        match next {
            AppState::Background => {
                state.terminal_paused = true;
                let _ = self.events_tx.send(LifecycleEvent::Background);
            }
            AppState::Foreground => {
                state.terminal_paused = false;
                state.terminal_queue.clear();
                let _ = self.events_tx.send(LifecycleEvent::Foreground);
            }
        }
    }

    pub async fn is_terminal_flow_paused(&self) -> bool {
        self.state.lock().await.terminal_paused
    }

    /// Offer terminal bytes while backgrounded. Evicts the oldest buffer
    /// once the cap is reached (FIFO).
    pub async fn queue_terminal_data(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock().await;
        if state.terminal_queue.len() >= self.config.terminal_queue_cap {
            state.terminal_queue.pop_front();
        }
        state.terminal_queue.push_back(bytes);
    }

    pub async fn terminal_queue_len(&self) -> usize {
        self.state.lock().await.terminal_queue.len()
    }

    /// Append a notification for deferred delivery; returns its id.
    pub async fn queue_notification(&self, title: String, body: String, icon: Option<String>) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_notification_id;
        state.next_notification_id += 1;
        if state.notifications.len() >= self.config.notification_queue_cap {
            state.notifications.pop_front();
        }
        state.notifications.push_back(QueuedNotification {
            id,
            title,
            body,
            icon,
            queued_at: unix_now(),
        });
        id
    }

    /// Remove and return every queued notification.
    pub async fn drain_notifications(&self) -> Vec<QueuedNotification> {
        let mut state = self.state.lock().await;
        state.notifications.drain(..).collect()
    }

    pub async fn clear_notifications(&self) {
        self.state.lock().await.notifications.clear();
    }

    async fn start_keep_alive(self: &Arc<Self>) {
        let mut task_guard = self.keep_alive_task.lock().await;
        if task_guard.is_some() || !self.keep_alive_enabled.load(Ordering::SeqCst) {
            return;
        }

        let _ = self.events_tx.send(LifecycleEvent::KeepAlive);

        let events_tx = self.events_tx.clone();
        let interval = self.config.keep_alive_interval();
        *task_guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if events_tx.send(LifecycleEvent::KeepAlive).is_err() {
                    break;
                }
            }
        }));
    }

    async fn stop_keep_alive(&self) {
        if let Some(handle) = self.keep_alive_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Tear down this manager: cancel the keep-alive task, clear both
    /// queues, and reset visibility state back to its initial values.
    /// Idempotent — calling it again on an already-destroyed manager is a
    /// no-op beyond re-asserting the reset state.
    pub async fn destroy(&self) {
        self.stop_keep_alive().await;

        let mut state = self.state.lock().await;
        state.app_state = AppState::Foreground;
        state.document_hidden = false;
        state.terminal_paused = false;
        state.terminal_queue.clear();
        state.notifications.clear();
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            keep_alive_interval_ms: 50,
            terminal_queue_cap: 3,
            notification_queue_cap: 2,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn duplicate_background_signals_emit_once() {
        let manager = LifecycleManager::new(test_config());
        let mut events = manager.subscribe();

        manager.observe(VisibilityEvent::DocumentHidden).await;
        manager.observe(VisibilityEvent::DocumentHidden).await;

        let first = events.recv().await.unwrap();
        assert!(matches!(first, LifecycleEvent::Background));
        assert!(matches!(events.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn foreground_clears_terminal_queue_and_unpauses() {
        let manager = LifecycleManager::new(test_config());
        manager.observe(VisibilityEvent::DocumentHidden).await;
        assert!(manager.is_terminal_flow_paused().await);

        manager.queue_terminal_data(vec![1, 2, 3]).await;
        assert_eq!(manager.terminal_queue_len().await, 1);

        manager.observe(VisibilityEvent::DocumentVisible).await;
        assert!(!manager.is_terminal_flow_paused().await);
        assert_eq!(manager.terminal_queue_len().await, 0);
    }

    #[tokio::test]
    async fn terminal_queue_evicts_oldest_past_cap() {
        let manager = LifecycleManager::new(test_config());
        manager.observe(VisibilityEvent::DocumentHidden).await;
        for i in 0..5u8 {
            manager.queue_terminal_data(vec![i]).await;
        }
        assert_eq!(manager.terminal_queue_len().await, 3);
    }

    #[tokio::test]
    async fn notification_queue_is_fifo_bounded() {
        let manager = LifecycleManager::new(test_config());
        let id_a = manager.queue_notification("a".into(), "a-body".into(), None).await;
        let _id_b = manager.queue_notification("b".into(), "b-body".into(), None).await;
        let id_c = manager.queue_notification("c".into(), "c-body".into(), None).await;

        let drained = manager.drain_notifications().await;
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|n| n.id != id_a));
        assert!(drained.iter().any(|n| n.id == id_c));
    }

    #[tokio::test]
    async fn blur_without_hidden_document_does_not_background() {
        let manager = LifecycleManager::new(test_config());
        manager.observe(VisibilityEvent::Blur).await;
        assert!(!manager.is_terminal_flow_paused().await);
    }

    #[tokio::test]
    async fn queued_notification_carries_enqueue_timestamp() {
        let manager = LifecycleManager::new(test_config());
        manager.queue_notification("a".into(), "a-body".into(), None).await;
        let drained = manager.drain_notifications().await;
        assert_eq!(drained.len(), 1);
        assert!(drained[0].queued_at > 0);
    }

    #[tokio::test]
    async fn destroy_resets_state_and_clears_queues() {
        let manager = LifecycleManager::new(test_config());
        manager.observe(VisibilityEvent::DocumentHidden).await;
        manager.queue_terminal_data(vec![1, 2, 3]).await;
        manager.queue_notification("a".into(), "a-body".into(), None).await;
        assert!(manager.is_terminal_flow_paused().await);

        manager.destroy().await;

        assert!(!manager.is_terminal_flow_paused().await);
        assert_eq!(manager.terminal_queue_len().await, 0);
        assert!(manager.drain_notifications().await.is_empty());

        // Idempotent: calling again on an already-reset manager is a no-op.
        manager.destroy().await;
        assert!(!manager.is_terminal_flow_paused().await);
    }

    #[tokio::test]
    async fn destroy_cancels_keep_alive_task() {
        let manager = LifecycleManager::new(test_config());
        manager.observe(VisibilityEvent::DocumentHidden).await;
        manager.destroy().await;
        assert!(manager.keep_alive_task.lock().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_ticks_while_backgrounded() {
        let manager = LifecycleManager::new(test_config());
        let mut events = manager.subscribe();

        manager.observe(VisibilityEvent::DocumentHidden).await;
        // First event is Background, second is the immediate keepalive.
        assert!(matches!(events.recv().await.unwrap(), LifecycleEvent::Background));
        assert!(matches!(events.recv().await.unwrap(), LifecycleEvent::KeepAlive));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(matches!(events.recv().await.unwrap(), LifecycleEvent::KeepAlive));
    }
}
