use std::sync::Arc;

use clap::Parser;
use tracing::info;

use klaxon::audio::FrameStore;
use klaxon::commands::Bot;
use klaxon::common::logger;
use klaxon::common::types::AnyResult;
use klaxon::config::Config;
use klaxon::gateway;
use klaxon::playback::PlaybackEngine;
use klaxon::stats::{RankClient, StatsStore};
use klaxon::voice::WireConnector;

mod cli;

#[tokio::main]
async fn main() -> AnyResult<()> {
    let args = cli::Cli::parse();
    let config = Config::load(&args.config)?;
    logger::init(&config);

    // Decode before any event can arrive; every playback invocation
    // shares this store read-only.
    let store = Arc::new(FrameStore::load(&config.audio.clip_path)?);
    info!(
        frames = store.len(),
        path = %config.audio.clip_path,
        "sound clip loaded"
    );

    let stats = Arc::new(StatsStore::load(&config.stats)?);
    let lookup = RankClient::new(&config.stats)?;

    let (handle, events) = gateway::Client::connect(&config.gateway, &args.token).await?;
    info!(user = %handle.user_id(), "gateway session established");

    let connector = WireConnector::new(handle.clone());
    let engine = Arc::new(PlaybackEngine::new(
        store,
        connector,
        config.playback.clone(),
    ));

    let bot = Bot::new(
        handle.clone(),
        engine,
        stats,
        lookup,
        config.commands.clone(),
    );
    let dispatcher = tokio::spawn(bot.run(events));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, closing gateway");
    handle.disconnect().await;
    dispatcher.abort();

    Ok(())
}
