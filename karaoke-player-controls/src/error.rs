use crate::notification::Notification;
use snafu::prelude::*;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Unable to create window {label}: {message}"))]
    WindowCreation { label: String, message: String },
    #[snafu(display("Window {label} was not created within {timeout_ms} ms"))]
    WindowCreationTimeout { label: String, timeout_ms: u64 },
    #[snafu(display("Window {label} was destroyed while being created"))]
    WindowDestroyed { label: String },
    #[snafu(display("Unable to close window {label}: {message}"))]
    WindowClose { label: String, message: String },
    #[snafu(display("Unable to focus window {label}: {message}"))]
    WindowFocus { label: String, message: String },
    #[snafu(display("Playback was rejected: {message}"))]
    PlaybackRejected { message: String },
    #[snafu(display("Unable to read configuration: {source}"))]
    Configuration {
        #[snafu(source)]
        source: serde_json::Error,
    },
    #[snafu(display("Unable to broadcast notification"))]
    Notification,
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Configuration { source }
    }
}

impl From<tokio::sync::broadcast::error::SendError<Notification>> for Error {
    fn from(_value: tokio::sync::broadcast::error::SendError<Notification>) -> Self {
        Self::Notification
    }
}
