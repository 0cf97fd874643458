#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Singer {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SongInfo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub singers: Vec<Singer>,
}

/// Full playback snapshot. A received snapshot always replaces the receiver's copy.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub media_reference: Option<String>,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub is_muted: bool,
    pub current_song: Option<SongInfo>,
    pub next_song: Option<SongInfo>,
    /// Bumped by the primary window on every change that is pushed as a snapshot.
    #[serde(default)]
    pub revision: u64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            media_reference: None,
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            is_muted: false,
            current_song: None,
            next_song: None,
            revision: 0,
        }
    }
}

impl PlayerState {
    /// A non-empty media reference is present.
    pub fn has_media(&self) -> bool {
        self.media_reference
            .as_deref()
            .is_some_and(|reference| !reference.is_empty())
    }

    /// Compares the fields that warrant pushing a new snapshot.
    ///
    /// Position and duration are reported by the detached window, never pushed
    /// to it, so they take no part in the comparison.
    pub fn sync_differs(&self, other: &PlayerState) -> bool {
        self.media_reference != other.media_reference
            || self.is_playing != other.is_playing
            || self.volume != other.volume
            || self.is_muted != other.is_muted
            || self.current_song != other.current_song
            || self.next_song != other.next_song
    }

    /// Back to the "nothing loaded" variant. Audio settings survive.
    pub fn reset(&mut self) {
        self.media_reference = None;
        self.is_playing = false;
        self.current_time = 0.0;
        self.duration = 0.0;
        self.current_song = None;
        self.next_song = None;
    }

    pub fn apply_final(&mut self, final_state: &FinalState) {
        if final_state.current_time.is_finite() && final_state.current_time >= 0.0 {
            self.current_time = final_state.current_time;
        }
        self.is_playing = final_state.is_playing;
        if final_state.duration.is_finite() && final_state.duration > 0.0 {
            self.duration = final_state.duration;
        }
        if final_state.volume.is_finite() {
            self.volume = final_state.volume.clamp(0.0, 1.0);
        }
        self.is_muted = final_state.is_muted;
    }
}

/// Last observed surface state, captured as the detached window closes.
#[derive(Default, Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalState {
    pub current_time: f64,
    pub is_playing: bool,
    pub duration: f64,
    pub volume: f64,
    pub is_muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Play,
    Pause,
    Seek,
}

/// Discrete transport action, applied in publish order relative to other commands.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Command {
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Command {
    pub fn play() -> Self {
        Self {
            kind: CommandKind::Play,
            value: None,
        }
    }

    pub fn pause() -> Self {
        Self {
            kind: CommandKind::Pause,
            value: None,
        }
    }

    pub fn seek(time: f64) -> Self {
        Self {
            kind: CommandKind::Seek,
            value: Some(time),
        }
    }
}
