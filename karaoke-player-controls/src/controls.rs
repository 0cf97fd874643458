use karaoke_player_models::SongInfo;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug)]
pub enum ControlCommand {
    Load {
        media: String,
        current_song: Option<SongInfo>,
        next_song: Option<SongInfo>,
        autoplay: bool,
    },
    SetSongs {
        current: Option<SongInfo>,
        next: Option<SongInfo>,
    },
    Clear,
    PlayPause,
    Play,
    Pause,
    Seek {
        time: f64,
    },
    SetVolume {
        volume: f64,
    },
    SetMuted {
        muted: bool,
    },
    Detach,
    Reattach,
    Quit,
}

/// User actions of the primary window, forwarded to the synchronizer.
#[derive(Debug, Clone)]
pub struct Controls {
    tx: UnboundedSender<ControlCommand>,
}

impl Controls {
    pub fn new(tx: UnboundedSender<ControlCommand>) -> Self {
        Self { tx }
    }

    pub fn load(
        &self,
        media: &str,
        current_song: Option<SongInfo>,
        next_song: Option<SongInfo>,
        autoplay: bool,
    ) {
        self.send(ControlCommand::Load {
            media: media.to_string(),
            current_song,
            next_song,
            autoplay,
        });
    }

    pub fn set_songs(&self, current: Option<SongInfo>, next: Option<SongInfo>) {
        self.send(ControlCommand::SetSongs { current, next });
    }

    pub fn clear(&self) {
        self.send(ControlCommand::Clear);
    }

    pub fn play_pause(&self) {
        self.send(ControlCommand::PlayPause);
    }

    pub fn play(&self) {
        self.send(ControlCommand::Play);
    }

    pub fn pause(&self) {
        self.send(ControlCommand::Pause);
    }

    pub fn seek(&self, time: f64) {
        self.send(ControlCommand::Seek { time });
    }

    pub fn set_volume(&self, volume: f64) {
        self.send(ControlCommand::SetVolume { volume });
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(ControlCommand::SetMuted { muted });
    }

    pub fn detach(&self) {
        self.send(ControlCommand::Detach);
    }

    pub fn reattach(&self) {
        self.send(ControlCommand::Reattach);
    }

    pub fn quit(&self) {
        self.send(ControlCommand::Quit);
    }

    fn send(&self, command: ControlCommand) {
        if let Err(err) = self.tx.send(command) {
            tracing::debug!(command = ?err.0, "synchronizer stopped, control dropped");
        }
    }
}
