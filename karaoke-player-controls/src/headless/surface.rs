use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::trace;

use crate::{
    Result,
    error::Error,
    surface::{MediaSurface, SurfaceEvent},
    timer::Timer,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AutoplayPolicy {
    #[default]
    Allowed,
    /// Unmuted playback without a user gesture is refused.
    MutedOnly,
}

#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    pub load_delay: Duration,
    pub media_duration: f64,
    pub tick_interval: Duration,
    pub autoplay: AutoplayPolicy,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            load_delay: Duration::from_millis(50),
            media_duration: 180.0,
            tick_interval: Duration::from_millis(250),
            autoplay: AutoplayPolicy::Allowed,
        }
    }
}

/// Calls received by a [`HeadlessSurface`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Load(String),
    Unload,
    Play { muted: bool, accepted: bool },
    Pause,
    Seek(f64),
    SetVolume(f64),
    SetMuted(bool),
}

#[derive(Default)]
struct Playback {
    source: Option<String>,
    ready: bool,
    ended: bool,
    clock: Timer,
    duration: f64,
    volume: f64,
    muted: bool,
    generation: u64,
    ticker: u64,
}

struct Shared {
    options: SurfaceOptions,
    playback: Mutex<Playback>,
    broken: Mutex<HashSet<String>>,
    calls: Mutex<Vec<SurfaceCall>>,
    events: Sender<SurfaceEvent>,
}

/// Simulated media element: loads after a delay, advances its position on the
/// runtime clock and enforces an autoplay policy.
pub struct HeadlessSurface {
    shared: Arc<Shared>,
}

impl HeadlessSurface {
    pub fn new(options: SurfaceOptions) -> Self {
        let (events, _) = broadcast::channel(64);

        Self {
            shared: Arc::new(Shared {
                options,
                playback: Mutex::new(Playback {
                    volume: 1.0,
                    ..Default::default()
                }),
                broken: Mutex::new(HashSet::new()),
                calls: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Loading `media` will fail with a decoder error.
    pub fn fail_source(&self, media: &str) {
        lock(&self.shared.broken).insert(media.to_string());
    }

    pub fn source(&self) -> Option<String> {
        self.shared.playback().source.clone()
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        lock(&self.shared.calls).clone()
    }

    pub fn loads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SurfaceCall::Load(_)))
            .count()
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new(SurfaceOptions::default())
    }
}

impl Shared {
    fn playback(&self) -> MutexGuard<'_, Playback> {
        lock(&self.playback)
    }

    fn record(&self, call: SurfaceCall) {
        lock(&self.calls).push(call);
    }

    fn emit(&self, event: SurfaceEvent) {
        if self.events.send(event).is_err() {
            trace!("no surface listeners");
        }
    }

    fn finish_loading(&self, generation: u64, media: &str) {
        if lock(&self.broken).contains(media) {
            if self.playback().generation == generation {
                self.emit(SurfaceEvent::Error {
                    message: format!("Unable to decode {media}"),
                });
            }
            return;
        }

        let duration = {
            let mut playback = self.playback();
            if playback.generation != generation {
                return;
            }
            playback.duration = self.options.media_duration;
            playback.ready = true;
            playback.duration
        };

        self.emit(SurfaceEvent::LoadedMetadata {
            media: media.to_string(),
            duration,
        });
        self.emit(SurfaceEvent::CanPlay {
            media: media.to_string(),
        });
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        let (ticker, muted) = {
            let mut playback = self.playback();
            let muted = playback.muted;

            let rejection = if playback.source.is_none() {
                Some("no source loaded")
            } else if !playback.ready {
                Some("media is not ready")
            } else if self.options.autoplay == AutoplayPolicy::MutedOnly && !muted {
                Some("unmuted autoplay is not allowed")
            } else {
                None
            };

            if let Some(message) = rejection {
                drop(playback);
                self.record(SurfaceCall::Play {
                    muted,
                    accepted: false,
                });
                return Err(Error::PlaybackRejected {
                    message: message.to_string(),
                });
            }

            if playback.ended {
                playback.ended = false;
                playback.clock.set_seconds(0.0);
            }

            if playback.clock.is_running() {
                (None, muted)
            } else {
                playback.clock.start();
                playback.ticker += 1;
                (Some(playback.ticker), muted)
            }
        };

        self.record(SurfaceCall::Play {
            muted,
            accepted: true,
        });

        if let Some(ticker) = ticker {
            self.emit(SurfaceEvent::Playing);
            self.spawn_ticker(ticker);
        }

        Ok(())
    }

    fn spawn_ticker(self: &Arc<Self>, ticker: u64) {
        let shared = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.options.tick_interval);
            interval.tick().await;

            loop {
                interval.tick().await;
                if !shared.tick(ticker) {
                    break;
                }
            }
        });
    }

    fn tick(&self, ticker: u64) -> bool {
        let (time, ended) = {
            let mut playback = self.playback();
            if playback.ticker != ticker || !playback.clock.is_running() {
                return false;
            }

            let time = playback.clock.seconds();
            if time >= playback.duration {
                let duration = playback.duration;
                playback.clock.pause();
                playback.clock.set_seconds(duration);
                playback.ended = true;
                (duration, true)
            } else {
                (time, false)
            }
        };

        self.emit(SurfaceEvent::TimeUpdate { time });

        if ended {
            self.emit(SurfaceEvent::Paused);
            self.emit(SurfaceEvent::Ended);
        }

        !ended
    }
}

impl MediaSurface for HeadlessSurface {
    fn load(&self, media: &str) {
        let generation = {
            let mut playback = self.shared.playback();
            playback.source = Some(media.to_string());
            playback.ready = false;
            playback.ended = false;
            playback.clock.clear();
            playback.duration = 0.0;
            playback.generation += 1;
            playback.generation
        };
        self.shared.record(SurfaceCall::Load(media.to_string()));

        let shared = self.shared.clone();
        let media = media.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(shared.options.load_delay).await;
            shared.finish_loading(generation, &media);
        });
    }

    fn unload(&self) {
        {
            let mut playback = self.shared.playback();
            playback.source = None;
            playback.ready = false;
            playback.ended = false;
            playback.clock.clear();
            playback.duration = 0.0;
            playback.generation += 1;
        }
        self.shared.record(SurfaceCall::Unload);
    }

    fn play(&self) -> BoxFuture<'static, Result<()>> {
        let result = self.shared.start();
        Box::pin(async move { result })
    }

    fn pause(&self) {
        let was_running = {
            let mut playback = self.shared.playback();
            let was_running = playback.clock.is_running();
            playback.clock.pause();
            was_running
        };
        self.shared.record(SurfaceCall::Pause);

        if was_running {
            self.shared.emit(SurfaceEvent::Paused);
        }
    }

    fn seek(&self, time: f64) {
        let time = {
            let mut playback = self.shared.playback();
            let upper = if playback.duration > 0.0 {
                playback.duration
            } else {
                f64::MAX
            };
            let time = if time.is_finite() {
                time.clamp(0.0, upper)
            } else {
                0.0
            };
            playback.clock.set_seconds(time);
            playback.ended = false;
            time
        };
        self.shared.record(SurfaceCall::Seek(time));
        self.shared.emit(SurfaceEvent::TimeUpdate { time });
    }

    fn set_volume(&self, volume: f64) {
        self.shared.playback().volume = volume.clamp(0.0, 1.0);
        self.shared.record(SurfaceCall::SetVolume(volume));
    }

    fn set_muted(&self, muted: bool) {
        self.shared.playback().muted = muted;
        self.shared.record(SurfaceCall::SetMuted(muted));
    }

    fn current_time(&self) -> f64 {
        self.shared.playback().clock.seconds()
    }

    fn duration(&self) -> f64 {
        self.shared.playback().duration
    }

    fn paused(&self) -> bool {
        !self.shared.playback().clock.is_running()
    }

    fn volume(&self) -> f64 {
        self.shared.playback().volume
    }

    fn muted(&self) -> bool {
        self.shared.playback().muted
    }

    fn events(&self) -> Receiver<SurfaceEvent> {
        self.shared.events.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
