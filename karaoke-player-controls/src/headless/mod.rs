//! In-memory implementations of the window system and media element.
//!
//! They back the test suite and the demo session, and document the behaviour
//! the real collaborators are expected to have.

mod surface;
mod window;

pub use surface::{AutoplayPolicy, HeadlessSurface, SurfaceCall, SurfaceOptions};
pub use window::{HeadlessWindow, HeadlessWindowSystem};
