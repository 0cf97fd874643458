use futures::future::BoxFuture;
use tokio::sync::broadcast::Receiver;

use crate::Result;

/// Notifications raised by a media surface while it loads and plays.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// Duration of `media` is known.
    LoadedMetadata { media: String, duration: f64 },
    /// Enough of `media` is buffered to start playback.
    CanPlay { media: String },
    TimeUpdate { time: f64 },
    Playing,
    Paused,
    Ended,
    Error { message: String },
}

/// The media element the detached window drives.
///
/// Calls take effect immediately and in order. `play` additionally returns a
/// future that resolves once playback has actually started, or fails with
/// [`crate::error::Error::PlaybackRejected`] when the platform refuses to
/// start (for example unmuted autoplay).
pub trait MediaSurface: Send + Sync {
    fn load(&self, media: &str);
    fn unload(&self);
    fn play(&self) -> BoxFuture<'static, Result<()>>;
    fn pause(&self);
    fn seek(&self, time: f64);
    fn set_volume(&self, volume: f64);
    fn set_muted(&self, muted: bool);

    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn paused(&self) -> bool;
    fn volume(&self) -> f64;
    fn muted(&self) -> bool;

    fn events(&self) -> Receiver<SurfaceEvent>;
}
