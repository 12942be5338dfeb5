//! Speech Relay - speaks a live transcript back as it arrives.
//!
//! Transcript fragments are posted over HTTP, cut into sentences, synthesized concurrently
//! with Kokoro (via sherpa-rs) and played on the default output device in transcript order.

mod audio;
mod config;
mod pipeline;
mod server;
mod tts;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use audio::Player;
use config::{AppConfig, VoiceSelector};
use pipeline::Pipeline;
use server::AppState;
use tts::{EngineFactory, EngineSlot, KokoroFactory};

/// How long the playback worker gets to finish after the queue is closed.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎙️ Speech Relay v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        error!("Kokoro models are expected under {}", config.model_dir.join("tts").display());
        std::process::exit(1);
    }
    config.log_config();

    let engines = Arc::new(EngineSlot::new());
    let voices = Arc::new(VoiceSelector::new(&config.tts_voice));
    let factory: Arc<dyn EngineFactory> = Arc::new(KokoroFactory::new(config.clone(), voices.clone()));

    if config.preload {
        let engine = factory.load(&config.tts_model).with_context(|| format!("Failed to preload {}", config.tts_model))?;
        engines.install(engine);
    } else {
        info!("No TTS model loaded yet, waiting for POST /load_model");
    }

    let pipeline = Arc::new(Pipeline::new(config.pipeline_settings(), engines, voices, Handle::current()));

    let player = Arc::new(Player::new()?);
    let worker = pipeline.playback_worker(Box::new(player.clone())).spawn().context("Failed to start playback worker")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let state = AppState { pipeline: pipeline.clone(), factory, default_model: config.tts_model.clone() };
    let served = server::serve(config.listen, state, shutdown.clone()).await;
    if let Err(e) = &served {
        error!("❌ {:#}", e);
    }

    // Stop the worker: close the queue, then cut off whatever is still playing
    pipeline.shutdown();
    player.stop();

    let join = tokio::task::spawn_blocking(move || worker.join());
    match tokio::time::timeout(WORKER_JOIN_TIMEOUT, join).await {
        Ok(Ok(Ok(()))) => debug!("Playback worker finished gracefully"),
        Ok(_) => warn!("Playback worker panicked"),
        Err(_) => warn!("Playback worker didn't finish in time"),
    }

    let queue = pipeline.queue();
    let discarded = std::iter::from_fn(|| queue.try_release()).count() + queue.pending();
    if discarded > 0 {
        info!("Discarded {} unplayed sentences", discarded);
    }

    pipeline.metrics().log_summary();
    if let Err(e) = pipeline.metrics().persist(&config.metrics_file) {
        error!("❌ {:#}", e);
    }

    info!("✅ Speech relay stopped");
    served
}
