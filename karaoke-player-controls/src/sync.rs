use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use karaoke_player_models::{Command, FinalState, PlayerState};
use tokio::{
    select,
    sync::{
        broadcast::{self, Receiver, Sender},
        mpsc::{self, UnboundedReceiver},
        watch,
    },
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    DetachedReceiver, StateReceiver,
    broadcast::{Event, EventChannel, Subscription, Topic},
    controls::{ControlCommand, Controls},
    notification::NotificationBroadcast,
    window::WindowManager,
};

/// What happened to the session, for the UI of the primary window.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    Detached,
    Reattached,
    /// The local surface, if any, should continue from `time`.
    Seek { time: f64 },
    MediaLoaded,
    MediaEnded,
}

/// Owns the authoritative [`PlayerState`] of the primary window and keeps the
/// detached window in step with it.
pub struct Synchronizer {
    state_tx: watch::Sender<PlayerState>,
    detached_tx: watch::Sender<bool>,
    channel: Arc<EventChannel>,
    windows: Arc<WindowManager>,
    sync_tx: Sender<SyncNotification>,
    broadcast: Arc<NotificationBroadcast>,
    controls: Controls,
    controls_rx: UnboundedReceiver<ControlCommand>,
    upstream: Subscription,
    /// The detached window is switching media. Its position reports belong
    /// to the old media until it announces the new one.
    switching: AtomicBool,
}

impl Synchronizer {
    pub fn new(
        channel: Arc<EventChannel>,
        windows: Arc<WindowManager>,
        broadcast: Arc<NotificationBroadcast>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PlayerState::default());
        let (detached_tx, _) = watch::channel(false);
        let (sync_tx, _) = broadcast::channel(20);
        let (tx, controls_rx) = mpsc::unbounded_channel();
        let upstream = channel.subscribe(Topic::UPSTREAM);

        Self {
            state_tx,
            detached_tx,
            channel,
            windows,
            sync_tx,
            broadcast,
            controls: Controls::new(tx),
            controls_rx,
            upstream,
            switching: AtomicBool::new(false),
        }
    }

    pub fn controls(&self) -> Controls {
        self.controls.clone()
    }

    pub fn state(&self) -> StateReceiver {
        self.state_tx.subscribe()
    }

    pub fn detached(&self) -> DetachedReceiver {
        self.detached_tx.subscribe()
    }

    pub fn notify_receiver(&self) -> Receiver<SyncNotification> {
        self.sync_tx.subscribe()
    }

    pub fn broadcast(&self) -> Arc<NotificationBroadcast> {
        self.broadcast.clone()
    }

    fn is_detached(&self) -> bool {
        *self.detached_tx.borrow()
    }

    fn snapshot(&self) -> PlayerState {
        self.state_tx.borrow().clone()
    }

    fn notify(&self, notification: SyncNotification) {
        if self.sync_tx.send(notification).is_err() {
            trace!("no sync listeners");
        }
    }

    /// Applies a local change. A change to any synchronized field bumps the
    /// revision and is pushed to the detached window.
    fn update(&self, mutate: impl FnOnce(&mut PlayerState)) {
        let mut pushed = None;

        self.state_tx.send_if_modified(|state| {
            let before = state.clone();
            mutate(state);

            if !state.sync_differs(&before) {
                return *state != before;
            }

            state.revision += 1;
            pushed = Some(state.clone());
            true
        });

        if let Some(snapshot) = pushed
            && self.is_detached()
        {
            debug!(revision = snapshot.revision, "pushing state");
            self.channel.publish(Event::StateSync(snapshot));
        }
    }

    fn send_command(&self, command: Command) {
        if self.is_detached() {
            debug!(?command, "sending command");
            self.channel.publish(Event::Command(command));
        }
    }

    fn play(&self) {
        if !self.state_tx.borrow().has_media() {
            debug!("nothing loaded, ignoring play");
            return;
        }

        self.send_command(Command::play());
        self.update(|state| state.is_playing = true);
    }

    fn pause(&self) {
        self.send_command(Command::pause());
        self.update(|state| state.is_playing = false);
    }

    fn seek(&self, time: f64) {
        let Some(time) = self.clamp_seek(time) else {
            debug!(time, "ignoring seek");
            return;
        };

        self.send_command(Command::seek(time));
        self.state_tx
            .send_modify(|state| state.current_time = time);

        if !self.is_detached() {
            self.notify(SyncNotification::Seek { time });
        }
    }

    fn clamp_seek(&self, time: f64) -> Option<f64> {
        let state = self.state_tx.borrow();
        if !state.has_media() || !time.is_finite() {
            return None;
        }

        let time = time.max(0.0);
        if state.duration > 0.0 {
            Some(time.min(state.duration))
        } else {
            Some(time)
        }
    }

    #[instrument(skip(self))]
    async fn detach(&self) {
        let was_detached = self.is_detached();
        let snapshot = self.snapshot();

        if !self.windows.detach(&snapshot).await {
            self.broadcast
                .send_error("Unable to open the player window".to_string());
            return;
        }

        if !was_detached {
            self.detached_tx.send_replace(true);
            self.notify(SyncNotification::Detached);
        }
    }

    #[instrument(skip(self))]
    async fn reattach(&self) {
        if !self.windows.reattach().await {
            self.broadcast
                .send_warning("The player window did not close cleanly".to_string());
        }
    }

    async fn handle_control(&mut self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::Load {
                media,
                current_song,
                next_song,
                autoplay,
            } => {
                if media.is_empty() {
                    self.update(PlayerState::reset);
                    return false;
                }

                let changed = self.state_tx.borrow().media_reference.as_deref() != Some(media.as_str());
                if changed && self.is_detached() {
                    self.switching.store(true, Ordering::SeqCst);
                }

                self.update(|state| {
                    state.media_reference = Some(media);
                    state.current_song = current_song;
                    state.next_song = next_song;
                    state.current_time = 0.0;
                    state.duration = 0.0;
                    state.is_playing = autoplay;
                });
            }
            ControlCommand::SetSongs { current, next } => self.update(|state| {
                state.current_song = current;
                state.next_song = next;
            }),
            ControlCommand::Clear => self.update(PlayerState::reset),
            ControlCommand::PlayPause => {
                if self.state_tx.borrow().is_playing {
                    self.pause();
                } else {
                    self.play();
                }
            }
            ControlCommand::Play => self.play(),
            ControlCommand::Pause => self.pause(),
            ControlCommand::Seek { time } => self.seek(time),
            ControlCommand::SetVolume { volume } => {
                if volume.is_finite() {
                    self.update(|state| state.volume = volume.clamp(0.0, 1.0));
                }
            }
            ControlCommand::SetMuted { muted } => self.update(|state| state.is_muted = muted),
            ControlCommand::Detach => self.detach().await,
            ControlCommand::Reattach => self.reattach().await,
            ControlCommand::Quit => {
                if self.is_detached() {
                    self.reattach().await;
                }
                return true;
            }
        }

        false
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::TimeUpdate(time) => {
                if self.switching.load(Ordering::SeqCst) {
                    trace!(time, "position of replaced media, ignoring");
                } else if time.is_finite() && time >= 0.0 {
                    self.state_tx
                        .send_modify(|state| state.current_time = time);
                }
            }
            Event::DurationUpdate(duration) => {
                if duration.is_finite() && duration > 0.0 {
                    self.state_tx
                        .send_modify(|state| state.duration = duration);
                } else {
                    debug!(duration, "ignoring invalid duration");
                }
            }
            Event::VideoLoaded => {
                self.switching.store(false, Ordering::SeqCst);
                debug!("detached window loaded its media");
                self.notify(SyncNotification::MediaLoaded);
            }
            Event::VideoEnded => {
                self.state_tx
                    .send_modify(|state| state.is_playing = false);
                self.notify(SyncNotification::MediaEnded);
            }
            Event::RequestState => {
                let snapshot = self.snapshot();
                if snapshot.has_media() {
                    debug!(revision = snapshot.revision, "answering state request");
                    self.channel.publish(Event::StateSync(snapshot));
                } else {
                    debug!("nothing loaded, not answering state request");
                }
            }
            Event::FinalState(final_state) => self.apply_final(final_state),
            Event::Reattached => {
                self.switching.store(false, Ordering::SeqCst);
                let was_detached = self.detached_tx.send_replace(false);
                if was_detached {
                    info!("player window reattached");
                    self.broadcast
                        .send_info("Playback moved back to the main window".to_string());
                    self.notify(SyncNotification::Reattached);
                }
            }
            Event::StateSync(_) | Event::Command(_) => {
                warn!("downstream message received by the primary window");
            }
        }
    }

    fn apply_final(&self, final_state: FinalState) {
        debug!(?final_state, "applying final state");
        self.state_tx
            .send_modify(|state| state.apply_final(&final_state));

        let time = self.state_tx.borrow().current_time;
        self.notify(SyncNotification::Seek { time });
    }

    pub async fn sync_loop(&mut self) {
        loop {
            select! {
                Some(command) = self.controls_rx.recv() => {
                    if self.handle_control(command).await {
                        break;
                    }
                }

                Some(event) = self.upstream.recv() => {
                    self.handle_event(event);
                }

                else => break,
            }
        }

        debug!("synchronizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use karaoke_player_models::SongInfo;
    use tokio::time::sleep;

    use super::*;
    use crate::{config::SyncConfig, headless::HeadlessWindowSystem, notification::Notification};

    struct Fixture {
        system: Arc<HeadlessWindowSystem>,
        channel: Arc<EventChannel>,
        controls: Controls,
        state: StateReceiver,
        detached: DetachedReceiver,
        sync_events: Receiver<SyncNotification>,
        notifications: Receiver<Notification>,
        downstream: Subscription,
    }

    fn start() -> Fixture {
        let system = Arc::new(HeadlessWindowSystem::new());
        let channel = Arc::new(EventChannel::new(64));
        let windows = Arc::new(WindowManager::new(
            system.clone(),
            channel.clone(),
            SyncConfig::default(),
        ));
        let broadcast = Arc::new(NotificationBroadcast::new());
        let notifications = broadcast.subscribe();
        let downstream = channel.subscribe(Topic::DOWNSTREAM);

        let mut sync = Synchronizer::new(channel.clone(), windows, broadcast);
        let fixture = Fixture {
            system,
            channel,
            controls: sync.controls(),
            state: sync.state(),
            detached: sync.detached(),
            sync_events: sync.notify_receiver(),
            notifications,
            downstream,
        };

        tokio::spawn(async move { sync.sync_loop().await });
        fixture
    }

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    async fn load_and_detach(fixture: &mut Fixture) {
        fixture.controls.load("a", None, None, false);
        fixture.controls.detach();
        settle().await;
        fixture.downstream.drain();
    }

    fn snapshots(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, Event::StateSync(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_pushed_while_attached() {
        let mut fixture = start();

        fixture.controls.load("a", None, None, false);
        fixture.controls.play();
        fixture.controls.set_volume(0.4);
        settle().await;

        assert!(fixture.downstream.drain().is_empty());
        assert!(fixture.state.borrow().is_playing);
        assert_eq!(fixture.state.borrow().volume, 0.4);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_pushes_current_position_once() {
        let mut fixture = start();
        fixture.controls.load("a", None, None, false);
        settle().await;
        fixture.channel.publish(Event::TimeUpdate(33.0));
        settle().await;

        fixture.controls.detach();
        settle().await;

        let events = fixture.downstream.drain();
        assert_eq!(events.len(), 1);
        let Event::StateSync(snapshot) = &events[0] else {
            panic!("expected a snapshot, got {events:?}");
        };
        assert_eq!(snapshot.current_time, 33.0);
        assert!(*fixture.detached.borrow());
        assert_eq!(
            fixture.sync_events.try_recv().unwrap(),
            SyncNotification::Detached
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_actions_send_command_then_snapshot() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;

        fixture.controls.play_pause();
        settle().await;

        let events = fixture.downstream.drain();
        assert_eq!(events[0], Event::Command(Command::play()));
        let Event::StateSync(snapshot) = &events[1] else {
            panic!("expected a snapshot, got {events:?}");
        };
        assert!(snapshot.is_playing);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_sends_only_a_command() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;

        fixture.controls.seek(61.0);
        settle().await;

        assert_eq!(
            fixture.downstream.drain(),
            vec![Event::Command(Command::seek(61.0))]
        );
        assert_eq!(fixture.state.borrow().current_time, 61.0);
    }

    #[tokio::test(start_paused = true)]
    async fn time_updates_are_never_echoed() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;
        let revision = fixture.state.borrow().revision;

        for tick in 1..=20 {
            fixture.channel.publish(Event::TimeUpdate(tick as f64 * 0.5));
        }
        settle().await;

        assert_eq!(snapshots(&fixture.downstream.drain()), 0);
        assert_eq!(fixture.state.borrow().current_time, 10.0);
        assert_eq!(fixture.state.borrow().revision, revision);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_durations_are_ignored() {
        let fixture = start();

        for duration in [f64::NAN, f64::INFINITY, -3.0, 0.0] {
            fixture.channel.publish(Event::DurationUpdate(duration));
        }
        settle().await;
        assert_eq!(fixture.state.borrow().duration, 0.0);

        fixture.channel.publish(Event::DurationUpdate(212.5));
        settle().await;
        assert_eq!(fixture.state.borrow().duration, 212.5);
    }

    #[tokio::test(start_paused = true)]
    async fn state_requests_need_media() {
        let mut fixture = start();

        fixture.channel.publish(Event::RequestState);
        settle().await;
        assert!(fixture.downstream.drain().is_empty());

        fixture.controls.load("a", None, None, true);
        settle().await;
        fixture.channel.publish(Event::RequestState);
        settle().await;

        assert_eq!(snapshots(&fixture.downstream.drain()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn final_state_seeks_before_reattach_is_announced() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;
        fixture.sync_events.try_recv().unwrap();

        fixture.channel.publish(Event::FinalState(FinalState {
            current_time: 42.0,
            is_playing: true,
            duration: 200.0,
            volume: 0.7,
            is_muted: false,
        }));
        fixture.channel.publish(Event::Reattached);
        settle().await;

        assert_eq!(
            fixture.sync_events.try_recv().unwrap(),
            SyncNotification::Seek { time: 42.0 }
        );
        assert_eq!(
            fixture.sync_events.try_recv().unwrap(),
            SyncNotification::Reattached
        );

        let state = fixture.state.borrow();
        assert_eq!(state.current_time, 42.0);
        assert_eq!(state.duration, 200.0);
        assert_eq!(state.volume, 0.7);
        assert!(state.is_playing);
        assert!(!*fixture.detached.borrow());
        assert!(matches!(
            fixture.notifications.try_recv().unwrap(),
            Notification::Info(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn positions_of_replaced_media_are_ignored() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;

        fixture.controls.load("b", None, None, true);
        settle().await;
        fixture.channel.publish(Event::TimeUpdate(95.0));
        settle().await;
        assert_eq!(fixture.state.borrow().current_time, 0.0);

        fixture.controls.set_volume(0.5);
        settle().await;
        let pushed = fixture.downstream.drain();
        let Some(Event::StateSync(snapshot)) = pushed.last() else {
            panic!("expected a snapshot, got {pushed:?}");
        };
        assert_eq!(snapshot.current_time, 0.0);

        fixture.channel.publish(Event::VideoLoaded);
        fixture.channel.publish(Event::TimeUpdate(1.5));
        settle().await;
        assert_eq!(fixture.state.borrow().current_time, 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn song_changes_are_pushed_while_detached() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;

        let song = SongInfo {
            title: "Encore".to_string(),
            artist: None,
            singers: vec![],
        };
        fixture.controls.set_songs(Some(song.clone()), None);
        settle().await;

        let pushed = fixture.downstream.drain();
        assert_eq!(snapshots(&pushed), 1);
        let Event::StateSync(snapshot) = &pushed[0] else {
            panic!("expected a snapshot, got {pushed:?}");
        };
        assert_eq!(snapshot.current_song, Some(song));
        assert_eq!(snapshot.media_reference.as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn revision_follows_synchronized_changes() {
        let fixture = start();

        fixture.controls.load("a", None, None, false);
        settle().await;
        let loaded = fixture.state.borrow().revision;

        fixture.controls.set_muted(true);
        fixture.controls.set_muted(true);
        settle().await;

        assert_eq!(fixture.state.borrow().revision, loaded + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_detach_stays_single_window() {
        let mut fixture = start();
        fixture.system.fail_next_create("no display");

        fixture.controls.load("a", None, None, false);
        fixture.controls.detach();
        settle().await;

        assert!(!*fixture.detached.borrow());
        assert!(matches!(
            fixture.notifications.try_recv().unwrap(),
            Notification::Error(_)
        ));

        fixture.controls.play();
        settle().await;
        assert!(fixture.downstream.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ended_media_stops_without_pushing() {
        let mut fixture = start();
        load_and_detach(&mut fixture).await;
        fixture.controls.play();
        settle().await;
        fixture.downstream.drain();

        fixture.channel.publish(Event::VideoEnded);
        settle().await;

        assert!(!fixture.state.borrow().is_playing);
        assert!(fixture.downstream.drain().is_empty());
    }
}
