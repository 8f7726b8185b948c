//! 🍯 hfx — honeypot events in, Elasticsearch documents out.
//!
//! 🚀 One live hpfeeds subscription feeds an unbounded FIFO queue. One consumer
//! task decodes, enriches, routes and batches every message, and hands each
//! full batch to the store in a single bulk call. The feed reconnects forever.
//! The consumer never stops over one bad message or one bad flush. 🦆

pub mod app_config;
pub mod backends;
pub mod bootstrap;
pub mod common;
pub mod pipeline;
pub mod progress;
pub mod supervisors;
pub mod workers;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::backends::{FeedBackend, HpfeedsFeed, StoreBackend};
use crate::bootstrap::provision_indexes;
use crate::pipeline::{IndexRouter, Pipeline};
use crate::progress::{IngestStats, ProgressTicker, render_summary};
use crate::supervisors::Supervisor;
use crate::workers::Worker;

/// 🚀 Run until Ctrl-C.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Ctrl-C received, wrapping up...");
                ctrl_c.cancel();
            }
            Err(err) => warn!("⚠️ Could not listen for Ctrl-C, only a kill will stop us now: {err}"),
        }
    });

    let feed = FeedBackend::Hpfeeds(HpfeedsFeed::new(app_config.feed_config.clone()));
    run_with_shutdown(app_config, feed, shutdown).await?;
    Ok(())
}

/// 🧵 Wire everything up and run until `shutdown` is cancelled.
///
/// Cancelling stops the supervisor, which drops the only delivery sender. The
/// pipeline then drains whatever is already queued, does its final flush, and returns.
pub async fn run_with_shutdown(
    app_config: AppConfig,
    feed: FeedBackend,
    shutdown: CancellationToken,
) -> Result<IngestStats> {
    let store = StoreBackend::from_config(&app_config.store_config)
        .await
        .context("💀 Could not set up the document store")?;

    if app_config.bootstrap.enabled {
        let router = IndexRouter::new(app_config.runtime.index_prefix.clone());
        provision_indexes(&store, &app_config.bootstrap, &router)
            .await
            .context("💀 Index bootstrap failed")?;
    }

    let (deliveries, queue) = async_channel::unbounded();
    let supervisor = Supervisor::new(
        feed,
        app_config.feed_config.channel.clone(),
        app_config.runtime.reconnect_delay(),
        deliveries,
        shutdown,
    );
    let pipeline = Pipeline::new(&app_config.runtime, store)
        .with_ticker(ProgressTicker::new())
        .with_receiver(queue);

    info!(
        channel = %app_config.feed_config.channel,
        batch_size = app_config.runtime.batch_size.get(),
        "🍯 hfx is up"
    );
    let started = std::time::Instant::now();
    let supervisor = supervisor.start();
    let pipeline = pipeline.start();

    let sessions = supervisor.await.context("💀 The supervisor task panicked")?;
    let stats = pipeline.await.context("💀 The pipeline task panicked")??;

    println!("{}", render_summary(&stats, sessions, started.elapsed()));
    Ok(stats)
}
