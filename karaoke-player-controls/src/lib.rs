use detached::Phase;
use error::Error;
use karaoke_player_models::PlayerState;
use tokio::sync::watch;

pub mod broadcast;
pub mod config;
pub mod controls;
pub mod detached;
pub mod error;
pub mod headless;
pub mod notification;
pub mod surface;
pub mod sync;
mod timer;
pub mod window;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type StateReceiver = watch::Receiver<PlayerState>;
pub type DetachedReceiver = watch::Receiver<bool>;
pub type PhaseReceiver = watch::Receiver<Phase>;
