use karaoke_player_models::{Command, CommandKind, PlayerState};

/// Where the detached window stands with respect to its media.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Phase {
    /// No usable snapshot yet. Shown as "waiting for video".
    #[default]
    AwaitingFirstState,
    /// The surface is loading `media`. Commands wait in a single slot.
    Loading {
        media: String,
        resume: bool,
        queued: Option<Command>,
    },
    Ready {
        media: String,
        playing: bool,
    },
    Unmounted,
}

impl Phase {
    pub fn media(&self) -> Option<&str> {
        match self {
            Phase::Loading { media, .. } | Phase::Ready { media, .. } => Some(media),
            Phase::AwaitingFirstState | Phase::Unmounted => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::Ready { .. })
    }
}

/// Work the controller performs on the surface or the bus after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StopRequesting,
    Load(String),
    Unload,
    Seek(f64),
    /// Start playback. `muted_first` works around autoplay restrictions.
    Start { muted_first: bool },
    Pause,
    ApplyAudio { volume: f64, muted: bool },
    AnnounceLoaded,
}

/// Transition logic of the detached controller, free of any I/O.
#[derive(Debug, Default)]
pub struct Machine {
    phase: Phase,
    replica: PlayerState,
    revision: Option<u64>,
    /// Position of the snapshot that started the current load.
    baseline: f64,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Last applied snapshot.
    pub fn replica(&self) -> &PlayerState {
        &self.replica
    }

    pub fn audio(&self) -> (f64, bool) {
        (self.replica.volume, self.replica.is_muted)
    }

    pub fn on_snapshot(&mut self, snapshot: PlayerState) -> Vec<Effect> {
        if self.phase == Phase::Unmounted {
            return vec![];
        }

        if self
            .revision
            .is_some_and(|applied| snapshot.revision < applied)
        {
            tracing::debug!(
                revision = snapshot.revision,
                "ignoring snapshot older than the applied one"
            );
            return vec![];
        }
        self.revision = Some(snapshot.revision);

        let audio_changed = self.replica.volume != snapshot.volume
            || self.replica.is_muted != snapshot.is_muted;
        let media = snapshot
            .media_reference
            .clone()
            .filter(|media| !media.is_empty());

        let mut effects = Vec::new();

        let next = match media {
            None => match self.phase {
                Phase::Loading { .. } | Phase::Ready { .. } => {
                    effects.extend([Effect::Pause, Effect::Unload]);
                    Some(Phase::AwaitingFirstState)
                }
                Phase::AwaitingFirstState | Phase::Unmounted => None,
            },
            Some(media) => match &mut self.phase {
                Phase::Loading {
                    media: current,
                    resume,
                    queued,
                } if *current == media => {
                    // a queued command owns the transport decision
                    if queued.is_none() {
                        *resume = snapshot.is_playing;
                    }
                    None
                }
                Phase::Ready { media: current, .. } if *current == media => {
                    if audio_changed {
                        effects.push(Effect::ApplyAudio {
                            volume: snapshot.volume,
                            muted: snapshot.is_muted,
                        });
                    }
                    None
                }
                phase => {
                    if *phase == Phase::AwaitingFirstState {
                        effects.push(Effect::StopRequesting);
                    }
                    effects.push(Effect::Load(media.clone()));
                    Some(Phase::Loading {
                        media,
                        resume: snapshot.is_playing,
                        queued: None,
                    })
                }
            },
        };

        if let Some(next) = next {
            if matches!(next, Phase::Loading { .. }) {
                self.baseline = snapshot.current_time;
            }
            self.phase = next;
        }
        self.replica = snapshot;

        effects
    }

    pub fn on_command(&mut self, command: Command) -> Vec<Effect> {
        match &mut self.phase {
            Phase::AwaitingFirstState | Phase::Unmounted => {
                tracing::debug!(?command, "no media, dropping command");
                vec![]
            }
            Phase::Loading { queued, .. } => {
                *queued = Some(command);
                vec![]
            }
            Phase::Ready { playing, .. } => transport(command, playing, false),
        }
    }

    /// The surface can play `ready`. Ignored unless it is the media being
    /// loaded, so a late notification for replaced media changes nothing.
    pub fn on_ready(&mut self, ready: &str) -> Vec<Effect> {
        let Phase::Loading {
            media,
            resume,
            queued,
        } = &self.phase
        else {
            return vec![];
        };
        if media != ready {
            tracing::debug!(ready, loading = %media, "ready for replaced media");
            return vec![];
        }
        let (media, resume, queued) = (media.clone(), *resume, *queued);

        let mut effects = vec![Effect::AnnounceLoaded];

        let baseline = self.baseline;
        if baseline.is_finite() && baseline > 0.0 {
            effects.push(Effect::Seek(baseline));
        }

        let mut playing = false;
        match queued {
            Some(command) if command.kind == CommandKind::Seek => {
                effects.extend(transport(command, &mut playing, true));
                if resume {
                    effects.extend(transport(Command::play(), &mut playing, true));
                }
            }
            Some(command) => effects.extend(transport(command, &mut playing, true)),
            None if resume => effects.extend(transport(Command::play(), &mut playing, true)),
            None => {}
        }

        if !playing {
            let (volume, muted) = self.audio();
            effects.push(Effect::ApplyAudio { volume, muted });
        }

        self.phase = Phase::Ready { media, playing };
        effects
    }

    pub fn on_ended(&mut self) {
        if let Phase::Ready { playing, .. } = &mut self.phase {
            *playing = false;
        }
    }

    pub fn unmount(&mut self) {
        self.phase = Phase::Unmounted;
    }
}

fn transport(command: Command, playing: &mut bool, muted_first: bool) -> Vec<Effect> {
    match command.kind {
        CommandKind::Play => {
            *playing = true;
            vec![Effect::Start { muted_first }]
        }
        CommandKind::Pause => {
            *playing = false;
            vec![Effect::Pause]
        }
        CommandKind::Seek => match command.value {
            Some(time) if time.is_finite() && time >= 0.0 => vec![Effect::Seek(time)],
            _ => {
                tracing::debug!(?command, "seek without a usable position");
                vec![]
            }
        },
    }
}
