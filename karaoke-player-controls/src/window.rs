use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use karaoke_player_models::PlayerState;
use tokio::{
    select,
    sync::broadcast::{Receiver, error::RecvError},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    Result,
    broadcast::{Event, EventChannel},
    config::SyncConfig,
    error::Error,
};

/// Parameters handed to the window system when the player window is created.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowOptions {
    pub label: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub resizable: bool,
    pub centered: bool,
    pub decorated: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            label: "player".to_string(),
            title: "Karaoke Player".to_string(),
            width: 854,
            height: 480,
            min_width: 320,
            min_height: 180,
            resizable: true,
            centered: true,
            decorated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    Created,
    CreationFailed(String),
    CloseRequested,
    Destroyed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait Window: Send + Sync {
    fn label(&self) -> &str;
    fn geometry(&self) -> Geometry;
    fn events(&self) -> Receiver<WindowEvent>;
    async fn focus(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// A window whose creation has been requested but not yet confirmed.
/// `events` is subscribed before the window system can signal anything.
pub struct PendingWindow {
    pub window: Arc<dyn Window>,
    pub events: Receiver<WindowEvent>,
}

#[async_trait]
pub trait WindowSystem: Send + Sync {
    /// Every window currently open, whoever created it.
    fn windows(&self) -> Vec<Arc<dyn Window>>;
    async fn create(&self, options: &WindowOptions) -> Result<PendingWindow>;
}

struct Attached {
    id: u64,
    window: Arc<dyn Window>,
    cancel: CancellationToken,
}

/// Owns the detached player window. At most one exists at a time.
pub struct WindowManager {
    system: Arc<dyn WindowSystem>,
    channel: Arc<EventChannel>,
    config: SyncConfig,
    attached: Mutex<Option<Attached>>,
    operation: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl WindowManager {
    pub fn new(
        system: Arc<dyn WindowSystem>,
        channel: Arc<EventChannel>,
        config: SyncConfig,
    ) -> Self {
        Self {
            system,
            channel,
            config,
            attached: Mutex::new(None),
            operation: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// A detached window handle is held. May briefly be true before the
    /// primary window considers itself detached.
    pub fn has_window(&self) -> bool {
        self.slot().is_some()
    }

    /// Open the player window, or focus it if it is already open.
    #[instrument(skip_all, fields(label = %self.config.window.label))]
    pub async fn detach(self: &Arc<Self>, initial_state: &PlayerState) -> bool {
        let _operation = self.operation.lock().await;

        let held = self
            .slot()
            .as_ref()
            .map(|attached| (attached.id, attached.window.clone()));
        if let Some((id, window)) = held {
            debug!("already detached, focusing");
            match window.focus().await {
                Ok(()) => return true,
                Err(err) => {
                    warn!(%err, "detached window is gone, opening a new one");
                    if let Some(stale) = self.release(id) {
                        stale.cancel.cancel();
                    }
                }
            }
        }

        match self.open(initial_state).await {
            Ok(()) => {
                info!("player detached");
                true
            }
            Err(err) => {
                error!(%err, "unable to detach player");
                self.discard().await;
                false
            }
        }
    }

    /// Close the player window. State is released even if closing fails.
    ///
    /// Returns false only when the window refused to close.
    #[instrument(skip_all, fields(label = %self.config.window.label))]
    pub async fn reattach(&self) -> bool {
        let _operation = self.operation.lock().await;

        let Some((id, window, cancel)) = self
            .slot()
            .as_ref()
            .map(|attached| (attached.id, attached.window.clone(), attached.cancel.clone()))
        else {
            debug!("not detached, nothing to reattach");
            return true;
        };

        cancel.cancel();
        let closed = window.close().await;

        if self.release(id).is_some() {
            self.channel.publish(Event::Reattached);
        }

        match closed {
            Ok(()) => {
                info!("player reattached");
                true
            }
            Err(err) => {
                warn!(%err, "unable to close detached window, falling back to single window");
                false
            }
        }
    }

    async fn open(self: &Arc<Self>, initial_state: &PlayerState) -> Result<()> {
        let options = &self.config.window;
        self.close_stale(&options.label).await;

        let PendingWindow {
            window,
            mut events,
        } = self.system.create(options).await?;
        let destroyed_events = window.events();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.slot() = Some(Attached {
            id,
            window,
            cancel: cancel.clone(),
        });

        self.await_created(&mut events).await?;

        self.watch_close_requested(id, events, cancel.clone());
        self.watch_destroyed(id, destroyed_events, cancel);

        self.channel
            .publish(Event::StateSync(initial_state.clone()));

        Ok(())
    }

    /// Windows left over from an unclean shutdown share our label.
    async fn close_stale(&self, label: &str) {
        let stale: Vec<_> = self
            .system
            .windows()
            .into_iter()
            .filter(|window| window.label() == label)
            .collect();

        if stale.is_empty() {
            return;
        }

        for window in stale {
            warn!("closing stale player window from a previous session");
            if let Err(err) = window.close().await {
                warn!(%err, "unable to close stale player window");
            }
        }

        sleep(self.config.settle_delay()).await;
    }

    async fn await_created(&self, events: &mut Receiver<WindowEvent>) -> Result<()> {
        let label = &self.config.window.label;

        let created = async {
            loop {
                match events.recv().await {
                    Ok(WindowEvent::Created) => return Ok(()),
                    Ok(WindowEvent::CreationFailed(message)) => {
                        return Err(Error::WindowCreation {
                            label: label.clone(),
                            message,
                        });
                    }
                    Ok(WindowEvent::Destroyed) | Err(RecvError::Closed) => {
                        return Err(Error::WindowDestroyed {
                            label: label.clone(),
                        });
                    }
                    Ok(WindowEvent::CloseRequested) | Err(RecvError::Lagged(_)) => continue,
                }
            }
        };

        match timeout(self.config.creation_timeout(), created).await {
            Ok(result) => result,
            Err(_) => Err(Error::WindowCreationTimeout {
                label: label.clone(),
                timeout_ms: self.config.creation_timeout_ms,
            }),
        }
    }

    fn watch_close_requested(
        self: &Arc<Self>,
        id: u64,
        mut events: Receiver<WindowEvent>,
        cancel: CancellationToken,
    ) {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let event = select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };

                match event {
                    Ok(WindowEvent::CloseRequested) => {
                        debug!("player window close requested");
                        if manager.holds(id) {
                            manager.reattach().await;
                        }
                        return;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    fn watch_destroyed(
        self: &Arc<Self>,
        id: u64,
        mut events: Receiver<WindowEvent>,
        cancel: CancellationToken,
    ) {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let event = select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };

                match event {
                    Ok(WindowEvent::Destroyed) | Err(RecvError::Closed) => {
                        manager.destroyed(id);
                        return;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    /// Crash path: the window went away without asking.
    fn destroyed(&self, id: u64) {
        let Some(attached) = self.release(id) else {
            debug!("destroyed window was already released");
            return;
        };

        warn!("player window destroyed without a close request");
        attached.cancel.cancel();
        self.channel.publish(Event::Reattached);
    }

    async fn discard(&self) {
        let attached = self.slot().take();

        if let Some(attached) = attached {
            attached.cancel.cancel();
            if let Err(err) = attached.window.close().await {
                debug!(%err, "unable to close partially created window");
            }
        }
    }

    fn holds(&self, id: u64) -> bool {
        self.slot().as_ref().is_some_and(|attached| attached.id == id)
    }

    fn release(&self, id: u64) -> Option<Attached> {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|attached| attached.id == id) {
            slot.take()
        } else {
            None
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Attached>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{broadcast::Topic, headless::HeadlessWindowSystem};

    struct Fixture {
        system: Arc<HeadlessWindowSystem>,
        channel: Arc<EventChannel>,
        manager: Arc<WindowManager>,
    }

    fn fixture() -> Fixture {
        let system = Arc::new(HeadlessWindowSystem::new());
        let channel = Arc::new(EventChannel::new(32));
        let manager = Arc::new(WindowManager::new(
            system.clone(),
            channel.clone(),
            SyncConfig::default(),
        ));

        Fixture {
            system,
            channel,
            manager,
        }
    }

    fn state(media: &str) -> PlayerState {
        PlayerState {
            media_reference: Some(media.to_string()),
            current_time: 12.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn detach_publishes_initial_snapshot() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        let mut downstream = channel.subscribe(Topic::DOWNSTREAM);

        assert!(manager.detach(&state("a")).await);

        assert!(manager.has_window());
        assert_eq!(system.created_count(), 1);
        assert_eq!(downstream.drain(), vec![Event::StateSync(state("a"))]);

        let window = system.window("player").unwrap();
        assert_eq!(window.options().width, 854);
        assert_eq!(window.options().min_height, 180);
    }

    #[tokio::test]
    async fn second_detach_focuses_instead_of_recreating() {
        let Fixture {
            system, manager, ..
        } = fixture();

        assert!(manager.detach(&state("a")).await);
        assert!(manager.detach(&state("a")).await);

        assert_eq!(system.created_count(), 1);
        assert_eq!(system.windows().len(), 1);
        assert_eq!(system.window("player").unwrap().focus_count(), 1);
    }

    #[tokio::test]
    async fn detach_replaces_a_window_that_died_unnoticed() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        assert!(manager.detach(&state("a")).await);
        let dead = system.window("player").unwrap();
        let mut events = channel.subscribe_all();

        dead.crash();
        assert!(manager.detach(&state("a")).await);
        tokio::task::yield_now().await;

        assert_eq!(system.created_count(), 2);
        let window = system.window("player").unwrap();
        assert!(!Arc::ptr_eq(&window, &dead));
        assert!(!window.is_closed());
        assert!(manager.has_window());
        assert_eq!(events.drain(), vec![Event::StateSync(state("a"))]);
    }

    #[tokio::test]
    async fn reattach_without_window_has_no_side_effects() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        let mut events = channel.subscribe_all();

        assert!(manager.reattach().await);

        assert!(events.drain().is_empty());
        assert_eq!(system.created_count(), 0);
    }

    #[tokio::test]
    async fn reattach_closes_window_and_announces() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        assert!(manager.detach(&state("a")).await);
        let window = system.window("player").unwrap();
        let mut upstream = channel.subscribe(Topic::UPSTREAM);

        assert!(manager.reattach().await);

        assert!(window.is_closed());
        assert!(!manager.has_window());
        assert_eq!(upstream.drain(), vec![Event::Reattached]);
    }

    #[tokio::test]
    async fn failed_close_still_releases_window() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        assert!(manager.detach(&state("a")).await);
        system.window("player").unwrap().fail_next_close();
        let mut upstream = channel.subscribe(Topic::UPSTREAM);

        assert!(!manager.reattach().await);

        assert!(!manager.has_window());
        assert_eq!(upstream.drain(), vec![Event::Reattached]);
    }

    #[tokio::test]
    async fn crash_without_close_request_reattaches() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        assert!(manager.detach(&state("a")).await);
        let mut upstream = channel.subscribe(Topic::UPSTREAM);

        system.window("player").unwrap().crash();

        assert_eq!(upstream.recv().await, Some(Event::Reattached));
        assert!(!manager.has_window());

        // a later graceful reattach is a no-op
        assert!(manager.reattach().await);
        assert!(upstream.drain().is_empty());
    }

    #[tokio::test]
    async fn close_request_triggers_reattach() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        assert!(manager.detach(&state("a")).await);
        let window = system.window("player").unwrap();
        let mut upstream = channel.subscribe(Topic::UPSTREAM);

        window.request_close();

        assert_eq!(upstream.recv().await, Some(Event::Reattached));
        assert!(window.is_closed());
        assert!(!manager.has_window());

        // the destroyed signal raised by the close is not a second announcement
        tokio::task::yield_now().await;
        assert!(upstream.drain().is_empty());
    }

    #[tokio::test]
    async fn creation_failure_returns_false_and_keeps_no_handle() {
        let Fixture {
            system,
            channel,
            manager,
        } = fixture();
        let mut downstream = channel.subscribe(Topic::DOWNSTREAM);
        system.fail_next_create("no display");

        assert!(!manager.detach(&state("a")).await);

        assert!(!manager.has_window());
        assert!(downstream.drain().is_empty());

        // a retry later succeeds
        assert!(manager.detach(&state("a")).await);
        assert!(manager.has_window());
    }

    #[tokio::test(start_paused = true)]
    async fn creation_timeout_discards_the_window() {
        let Fixture {
            system, manager, ..
        } = fixture();
        system.stall_next_create();

        assert!(!manager.detach(&state("a")).await);

        assert!(!manager.has_window());
        assert!(system.window("player").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_is_closed_before_creating() {
        let Fixture {
            system, manager, ..
        } = fixture();
        let stale = system.insert_stale("player");
        let started = tokio::time::Instant::now();

        assert!(manager.detach(&state("a")).await);

        assert!(stale.is_closed());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(system.windows().len(), 1);
        assert!(!Arc::ptr_eq(&system.window("player").unwrap(), &stale));
    }
}
