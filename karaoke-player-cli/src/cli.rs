use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use karaoke_player_controls::{
    broadcast::EventChannel,
    config::SyncConfig,
    detached::DetachedController,
    headless::{AutoplayPolicy, HeadlessSurface, HeadlessWindowSystem, SurfaceOptions},
    notification::{Notification, NotificationBroadcast},
    sync::Synchronizer,
    window::WindowManager,
};
use karaoke_player_models::{Singer, SongInfo};
use snafu::prelude::*;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long)]
    /// Log level
    verbosity: Option<tracing::Level>,

    #[clap(short, long, env = "KARAOKE_PLAYER_CONFIG")]
    /// JSON file with window and timing options.
    config: Option<PathBuf>,

    #[clap(long, default_value_t = false)]
    /// Refuse unmuted autoplay in the player window.
    autoplay_blocked: bool,

    #[clap(long, default_value_t = false)]
    /// Print every message crossing the window boundary as a JSON line.
    print_events: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted detached-player session
    Demo {
        /// Media to play, in order. The second one replaces the first mid-session.
        #[clap(default_values_t = vec!["first-song.mp4".to_string(), "second-song.mp4".to_string()])]
        media: Vec<String>,

        #[clap(long, default_value_t = 2_000)]
        /// Pause between two scripted steps, in milliseconds.
        step_ms: u64,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to read {}: {source}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("{error}"))]
    PlayerError { error: String },
    #[snafu(display("Unable to encode output: {source}"))]
    Output { source: serde_json::Error },
}

impl From<karaoke_player_controls::error::Error> for Error {
    fn from(error: karaoke_player_controls::error::Error) -> Self {
        Error::PlayerError {
            error: error.to_string(),
        }
    }
}

pub async fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    let filter = match cli.verbosity {
        Some(level) => EnvFilter::default().add_directive(LevelFilter::from_level(level).into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).context(ConfigReadSnafu { path })?;
            SyncConfig::from_json(&json)?
        }
        None => SyncConfig::default(),
    };

    match cli.command {
        Commands::Demo { media, step_ms } => {
            let autoplay = if cli.autoplay_blocked {
                AutoplayPolicy::MutedOnly
            } else {
                AutoplayPolicy::Allowed
            };

            demo(
                config,
                media,
                autoplay,
                cli.print_events,
                Duration::from_millis(step_ms),
            )
            .await
        }
        Commands::Config => {
            let json = serde_json::to_string_pretty(&config).context(OutputSnafu)?;
            println!("{json}");
            Ok(())
        }
    }
}

async fn demo(
    config: SyncConfig,
    media: Vec<String>,
    autoplay: AutoplayPolicy,
    print_events: bool,
    step: Duration,
) -> Result<(), Error> {
    let system = Arc::new(HeadlessWindowSystem::new());
    let channel = Arc::new(EventChannel::new(config.channel_capacity));
    let broadcast = Arc::new(NotificationBroadcast::new());

    {
        let channel = channel.clone();
        let broadcast = broadcast.clone();
        let config = config.clone();

        system.on_mount(move |window| {
            let surface = Arc::new(HeadlessSurface::new(SurfaceOptions {
                autoplay,
                ..Default::default()
            }));
            let handle =
                DetachedController::mount(channel.clone(), surface, broadcast.clone(), &config);
            window.on_unload(move || handle.unmount());
        });
    }

    if print_events {
        let mut events = channel.subscribe_all();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(%err, "unable to encode event"),
                }
            }
        });
    }

    let windows = Arc::new(WindowManager::new(
        system.clone(),
        channel.clone(),
        config.clone(),
    ));
    let mut sync = Synchronizer::new(channel, windows, broadcast.clone());
    let controls = sync.controls();
    let state = sync.state();

    let mut notifications = broadcast.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            match notification {
                Notification::Error(message) => error!(%message),
                Notification::Warning(message) => warn!(%message),
                Notification::Success(message) | Notification::Info(message) => {
                    info!(%message)
                }
            }
        }
    });

    let mut sync_events = sync.notify_receiver();
    tokio::spawn(async move {
        while let Ok(notification) = sync_events.recv().await {
            info!(?notification, "session");
        }
    });

    let sync_task = tokio::spawn(async move { sync.sync_loop().await });

    let mut media = media.into_iter();
    let Some(first) = media.next() else {
        warn!("no media given, nothing to play");
        controls.quit();
        return Ok(());
    };

    controls.load(&first, Some(song("Opening Number", 0)), None, true);
    controls.detach();
    sleep(step).await;

    controls.set_songs(
        Some(song("Opening Number", 0)),
        Some(song("Encore", 1)),
    );

    controls.seek(30.0);
    sleep(step).await;

    controls.pause();
    sleep(step / 2).await;
    controls.play();
    controls.set_volume(0.8);
    sleep(step).await;

    if let Some(second) = media.next() {
        controls.load(&second, Some(song("Encore", 1)), None, true);
        sleep(step).await;
    }

    match system.window(&config.window.label) {
        Some(window) => window.request_close(),
        None => warn!("player window is already gone"),
    }
    sleep(Duration::from_millis(200)).await;

    let json = serde_json::to_string_pretty(&*state.borrow()).context(OutputSnafu)?;
    println!("{json}");

    controls.quit();
    if let Err(err) = sync_task.await {
        error!(%err, "synchronizer task failed");
    }

    Ok(())
}

fn song(title: &str, singer: usize) -> SongInfo {
    let singers = [("ana", "Ana", "#e4572e"), ("ben", "Ben", "#17bebb")];
    let (id, name, color) = singers[singer % singers.len()];

    SongInfo {
        title: title.to_string(),
        artist: None,
        singers: vec![Singer {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
        }],
    }
}
