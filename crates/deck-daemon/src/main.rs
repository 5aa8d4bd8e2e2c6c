mod control;
mod display;
mod engine;
mod panel;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use deck_proto::config::Config;
use deck_proto::playlist;
use deck_proto::protocol::PanelState;
use deck_proto::state::StateStore;

use crate::control::ControlLoop;
use crate::engine::{MpdClient, Playback};
use crate::panel::PanelLink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,deck_daemon=debug")),
        )
        .init();

    let config = Config::load()?;
    info!("config loaded from {:?}", Config::config_path());

    // a playlist that does not parse is fatal: every selection is an index
    // into it
    let playlist_path = &config.paths.playlist_file;
    let text = std::fs::read_to_string(playlist_path)
        .with_context(|| format!("reading playlist {:?}", playlist_path))?;
    let stations = playlist::parse(&text)
        .with_context(|| format!("parsing playlist {:?}", playlist_path))?;
    info!(stations = stations.len(), "playlist loaded");

    let store = StateStore::new(config.paths.state_file.clone());
    let mut restored = store.load().unwrap_or_default();
    if restored.active_index >= stations.len() {
        warn!(
            index = restored.active_index,
            stations = stations.len(),
            "saved selection past the end of the playlist, clamping"
        );
        restored.active_index = stations.len() - 1;
    }

    let mut mpd = MpdClient::new(&config.engine.host, config.engine.port, &config.engine.password);
    mpd.connect()
        .await
        .context("connecting to the playback engine")?;
    let urls: Vec<String> = stations.iter().map(|s| s.url.clone()).collect();
    mpd.load_playlist(&urls)
        .await
        .context("loading the station queue")?;
    mpd.play_index(restored.active_index)
        .await
        .context("starting the restored station")?;

    let seed = PanelState::new(restored.active_index, 0, restored.alarm);
    let mut panel = PanelLink::new(
        config.serial.clone(),
        seed,
        stations.len() - 1,
        config.display.alarm,
    );
    if !panel.connect().await {
        warn!("panel not reachable, the loop keeps retrying");
    }

    ControlLoop::new(
        panel,
        mpd,
        store,
        stations,
        restored,
        config.timing.clone(),
        config.display.clone(),
    )
    .run()
    .await;
    Ok(())
}
