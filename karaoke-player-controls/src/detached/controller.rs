use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use karaoke_player_models::{FinalState, PlayerState};
use tokio::{
    select,
    sync::{
        broadcast::{Receiver, error::RecvError},
        watch,
    },
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    PhaseReceiver, StateReceiver,
    broadcast::{Event, EventChannel, Subscription, Topic},
    config::SyncConfig,
    notification::NotificationBroadcast,
    surface::{MediaSurface, SurfaceEvent},
};

use super::machine::{Effect, Machine, Phase};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Audio {
    volume: f64,
    muted: bool,
}

/// Bookkeeping for `play` calls still waiting on the surface.
#[derive(Debug)]
struct Transport {
    generation: u64,
    /// A muted start is in flight. The real mute state waits for confirmation.
    starting: bool,
    audio: Audio,
}

impl Transport {
    fn begin(&mut self, muted_first: bool) -> u64 {
        self.generation += 1;
        self.starting = muted_first;
        self.generation
    }

    /// The unmuted attempt was refused and is retried muted.
    fn fallback(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.starting = true;
        true
    }

    /// Audio to restore once the start identified by `generation` settled.
    fn settle(&mut self, generation: u64) -> Option<Audio> {
        if self.generation != generation || !self.starting {
            return None;
        }
        self.starting = false;
        Some(self.audio)
    }

    /// Invalidates any start in flight.
    fn interrupt(&mut self) -> Option<Audio> {
        self.generation += 1;
        std::mem::take(&mut self.starting).then_some(self.audio)
    }
}

type SharedTransport = Arc<Mutex<Transport>>;

/// Drives the media surface of the detached window from bus messages and
/// reports its progress back.
pub struct DetachedController {
    machine: Machine,
    channel: Arc<EventChannel>,
    surface: Arc<dyn MediaSurface>,
    broadcast: Arc<NotificationBroadcast>,
    transport: SharedTransport,
    phase_tx: watch::Sender<Phase>,
    state_tx: watch::Sender<PlayerState>,
    requesting: CancellationToken,
    progress_interval: Duration,
    last_progress: Option<Instant>,
    reported_duration: Option<f64>,
}

impl DetachedController {
    /// Subscribes to the downstream topics, then starts asking the primary
    /// window for its state. Everything stops when the returned handle is
    /// unmounted.
    #[instrument(skip_all)]
    pub fn mount(
        channel: Arc<EventChannel>,
        surface: Arc<dyn MediaSurface>,
        broadcast: Arc<NotificationBroadcast>,
        config: &SyncConfig,
    ) -> ControllerHandle {
        let subscription = channel.subscribe(Topic::DOWNSTREAM);
        let surface_events = surface.events();

        let cancel = CancellationToken::new();
        let requesting = cancel.child_token();
        let (phase_tx, phase) = watch::channel(Phase::default());
        let (state_tx, state) = watch::channel(PlayerState::default());
        let transport = Arc::new(Mutex::new(Transport {
            generation: 0,
            starting: false,
            audio: Audio {
                volume: surface.volume(),
                muted: surface.muted(),
            },
        }));

        let controller = Self {
            machine: Machine::new(),
            channel: channel.clone(),
            surface: surface.clone(),
            broadcast,
            transport: transport.clone(),
            phase_tx,
            state_tx,
            requesting: requesting.clone(),
            progress_interval: config.progress_interval(),
            last_progress: None,
            reported_duration: None,
        };

        tokio::spawn(controller.run(subscription, surface_events, cancel.clone()));
        tokio::spawn(request_initial_state(
            channel.clone(),
            config.request_state_attempts,
            config.request_state_interval(),
            requesting,
        ));

        info!("detached controller mounted");

        ControllerHandle {
            channel,
            surface,
            transport,
            phase,
            state,
            cancel,
            unmounted: AtomicBool::new(false),
        }
    }

    async fn run(
        mut self,
        mut subscription: Subscription,
        mut surface_events: Receiver<SurfaceEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            select! {
                biased;
                _ = cancel.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(event) => self.handle_message(event),
                    None => break,
                },
                event = surface_events.recv() => match event {
                    Ok(event) => self.handle_surface(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "surface events lost");
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            self.publish_phase();
        }

        self.requesting.cancel();
        self.machine.unmount();
        self.publish_phase();
        subscription.unsubscribe();

        debug!("detached controller stopped");
    }

    fn handle_message(&mut self, event: Event) {
        let effects = match event {
            Event::StateSync(snapshot) => {
                let effects = self.machine.on_snapshot(snapshot);
                let (volume, muted) = self.machine.audio();
                self.transport().audio = Audio { volume, muted };
                self.state_tx.send_replace(self.machine.replica().clone());
                effects
            }
            Event::Command(command) => {
                debug!(?command, "command received");
                self.machine.on_command(command)
            }
            other => {
                trace!(topic = other.topic().name(), "ignoring upstream message");
                return;
            }
        };

        self.apply(effects);
    }

    fn handle_surface(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::LoadedMetadata { media, duration } => {
                if self.machine.phase().media() == Some(media.as_str()) {
                    self.report_duration(duration);
                } else {
                    debug!(%media, "metadata for replaced media");
                }
            }
            SurfaceEvent::CanPlay { media } => {
                let effects = self.machine.on_ready(&media);
                self.apply(effects);
            }
            SurfaceEvent::TimeUpdate { time } => self.report_progress(time),
            SurfaceEvent::Playing | SurfaceEvent::Paused => {
                trace!(?event, "surface transport changed");
            }
            SurfaceEvent::Ended => {
                if self.machine.phase().is_ready() {
                    self.machine.on_ended();
                    self.channel
                        .publish(Event::TimeUpdate(self.surface.current_time()));
                    self.channel.publish(Event::VideoEnded);
                }
            }
            SurfaceEvent::Error { message } => {
                error!(%message, "media error");
                self.broadcast.send_error(message);
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            trace!(?effect, "applying");

            match effect {
                Effect::StopRequesting => self.requesting.cancel(),
                Effect::Load(media) => {
                    self.interrupt();
                    self.last_progress = None;
                    self.reported_duration = None;
                    self.surface.load(&media);
                }
                Effect::Unload => {
                    self.interrupt();
                    self.last_progress = None;
                    self.reported_duration = None;
                    self.surface.unload();
                }
                Effect::Seek(time) => self.surface.seek(time),
                Effect::Start { muted_first } => self.start(muted_first),
                Effect::Pause => {
                    self.interrupt();
                    self.surface.pause();
                }
                Effect::ApplyAudio { volume, muted } => {
                    let starting = {
                        let mut transport = self.transport();
                        transport.audio = Audio { volume, muted };
                        transport.starting
                    };

                    self.surface.set_volume(volume);
                    if !starting {
                        self.surface.set_muted(muted);
                    }
                }
                Effect::AnnounceLoaded => self.channel.publish(Event::VideoLoaded),
            }
        }
    }

    fn start(&self, muted_first: bool) {
        let (generation, audio) = {
            let mut transport = self.transport();
            (transport.begin(muted_first), transport.audio)
        };

        if muted_first {
            self.surface.set_muted(true);
            self.surface.set_volume(audio.volume);
        } else {
            self.surface.set_volume(audio.volume);
            self.surface.set_muted(audio.muted);
        }

        let playing = self.surface.play();
        let surface = self.surface.clone();
        let transport = self.transport.clone();
        let broadcast = self.broadcast.clone();

        tokio::spawn(async move {
            let result = match playing.await {
                Err(err) if !muted_first => {
                    if !lock(&transport).fallback(generation) {
                        return;
                    }
                    debug!(%err, "unmuted start rejected, retrying muted");
                    surface.set_muted(true);
                    surface.play().await
                }
                result => result,
            };

            if let Err(err) = &result {
                warn!(%err, "playback did not start");
                broadcast.send_warning(err.to_string());
            }

            let restore = lock(&transport).settle(generation);
            if let Some(audio) = restore {
                restore_audio(surface.as_ref(), audio);
            }
        });
    }

    fn interrupt(&self) {
        let restore = self.transport().interrupt();
        if let Some(audio) = restore {
            restore_audio(self.surface.as_ref(), audio);
        }
    }

    fn report_progress(&mut self, time: f64) {
        if !self.machine.phase().is_ready() || !time.is_finite() {
            return;
        }

        let now = Instant::now();
        if self
            .last_progress
            .is_some_and(|last| now.duration_since(last) < self.progress_interval)
        {
            return;
        }

        self.last_progress = Some(now);
        self.channel.publish(Event::TimeUpdate(time));
    }

    fn report_duration(&mut self, duration: f64) {
        if !duration.is_finite() || duration <= 0.0 || self.reported_duration == Some(duration) {
            return;
        }

        self.reported_duration = Some(duration);
        self.channel.publish(Event::DurationUpdate(duration));
    }

    fn publish_phase(&self) {
        let current = self.machine.phase();
        self.phase_tx.send_if_modified(|phase| {
            if *phase == *current {
                return false;
            }
            *phase = current.clone();
            true
        });
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        lock(&self.transport)
    }
}

fn restore_audio(surface: &dyn MediaSurface, audio: Audio) {
    surface.set_volume(audio.volume);
    surface.set_muted(audio.muted);
}

async fn request_initial_state(
    channel: Arc<EventChannel>,
    attempts: u32,
    interval: Duration,
    cancel: CancellationToken,
) {
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return;
        }

        debug!(attempt, "requesting state");
        channel.publish(Event::RequestState);

        if attempt == attempts {
            break;
        }

        select! {
            _ = cancel.cancelled() => return,
            _ = sleep(interval) => {}
        }
    }

    warn!(attempts, "no state received, waiting for video");
}

/// Keeps a mounted [`DetachedController`] alive and tears it down.
pub struct ControllerHandle {
    channel: Arc<EventChannel>,
    surface: Arc<dyn MediaSurface>,
    transport: SharedTransport,
    phase: PhaseReceiver,
    state: StateReceiver,
    cancel: CancellationToken,
    unmounted: AtomicBool,
}

impl ControllerHandle {
    pub fn phase(&self) -> PhaseReceiver {
        self.phase.clone()
    }

    /// Last snapshot received from the primary window.
    pub fn state(&self) -> StateReceiver {
        self.state.clone()
    }

    pub fn is_mounted(&self) -> bool {
        !self.unmounted.load(Ordering::SeqCst)
    }

    /// Reports the final surface state, then stops every task of the
    /// controller. Runs synchronously because the window may disappear as
    /// soon as this returns.
    #[instrument(skip(self))]
    pub fn unmount(&self) {
        if self.unmounted.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.phase.borrow().is_ready() {
            let final_state = self.capture();
            debug!(?final_state, "publishing final state");
            self.channel.publish(Event::FinalState(final_state));
        } else {
            debug!("nothing loaded, skipping final state");
        }

        self.cancel.cancel();
        info!("detached controller unmounted");
    }

    fn capture(&self) -> FinalState {
        let transport = lock(&self.transport);
        let is_muted = if transport.starting {
            transport.audio.muted
        } else {
            self.surface.muted()
        };

        FinalState {
            current_time: self.surface.current_time(),
            is_playing: !self.surface.paused(),
            duration: self.surface.duration(),
            volume: self.surface.volume(),
            is_muted,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
