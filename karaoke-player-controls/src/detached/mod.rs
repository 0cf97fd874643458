//! The side of the session that lives in the detached player window.

mod controller;
mod machine;

pub use controller::{ControllerHandle, DetachedController};
pub use machine::{Effect, Machine, Phase};
