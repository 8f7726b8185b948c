//! 🚰 The consumer loop: one message at a time, decode → enrich → route → batch,
//! and every `batch_size` messages, a bulk write.
//!
//! 🎬 Nothing in here is allowed to stop the loop. A payload that is not JSON gets
//! logged and dropped. A store that is down loses us a batch and a log line. The
//! next message is processed either way.
//!
//! Only this task touches the batch and the counter, so neither needs a lock.

pub mod batch;
pub mod decode;
pub mod enrich;
pub mod route;

pub use batch::{Accumulator, Batch, FlushOutcome, flush};
pub use decode::{DecodeError, decode};
pub use enrich::{enrich, geo_point};
pub use route::IndexRouter;

use anyhow::Result;
use async_channel::Receiver;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app_config::{DecodeFailurePolicy, RuntimeConfig};
use crate::backends::BulkStore;
use crate::common::{IndexedDocument, RawMessage};
use crate::progress::{IngestStats, ProgressTicker};
use crate::workers::Worker;

/// 🚰 The processing unit. Owns the store client, the batch and the counter.
#[derive(Debug)]
pub struct Pipeline<S> {
    router: IndexRouter,
    accumulator: Accumulator,
    decode_failures: DecodeFailurePolicy,
    flush_on_shutdown: bool,
    store: S,
    stats: IngestStats,
    ticker: Option<ProgressTicker>,
    rx: Option<Receiver<RawMessage>>,
}

impl<S: BulkStore> Pipeline<S> {
    pub fn new(runtime: &RuntimeConfig, store: S) -> Self {
        Self {
            router: IndexRouter::new(runtime.index_prefix.clone()),
            accumulator: Accumulator::new(runtime.batch_size, runtime.counter_mode),
            decode_failures: runtime.decode_failures,
            flush_on_shutdown: runtime.flush_on_shutdown,
            store,
            stats: IngestStats::default(),
            ticker: None,
            rx: None,
        }
    }

    /// 🌀 Show a live spinner while running.
    pub fn with_ticker(mut self, ticker: ProgressTicker) -> Self {
        self.ticker = Some(ticker);
        self
    }

    /// 📥 The queue [`Worker::start`] will drain.
    pub fn with_receiver(mut self, rx: Receiver<RawMessage>) -> Self {
        self.rx = Some(rx);
        self
    }

    /// 🔁 Handle one message. Returns the flush outcome if this message closed a window.
    pub async fn process(&mut self, raw: RawMessage) -> Option<FlushOutcome> {
        self.stats.messages_seen += 1;

        let counted = match decode(&raw) {
            Ok(mut record) => {
                self.stats.decoded += 1;
                enrich(&mut record, Utc::now());
                let index = self.router.route(record.app());
                self.accumulator.push(IndexedDocument { index, record });
                true
            }
            Err(err) => {
                self.stats.dropped += 1;
                warn!(channel = %raw.channel, "💀 Error unmarshaling json: {err}");
                warn!(channel = %raw.channel, payload = %raw.payload_lossy(), "🗑️ dropped payload");
                self.decode_failures == DecodeFailurePolicy::Counted
            }
        };

        let outcome = if counted && self.accumulator.tally() {
            Some(self.flush_pending().await)
        } else {
            None
        };

        if let Some(ticker) = &self.ticker {
            ticker.update(&self.stats);
        }
        outcome
    }

    async fn flush_pending(&mut self) -> FlushOutcome {
        let batch = self.accumulator.take_batch();
        let outcome = flush(&self.store, batch).await;
        self.stats.record_flush(&outcome);
        outcome
    }

    /// 🏁 Drain `rx` until every sender is gone, then optionally flush the leftovers.
    pub async fn run(mut self, rx: Receiver<RawMessage>) -> Result<IngestStats> {
        debug!("📥 Pipeline started draining the delivery queue...");
        while let Ok(raw) = rx.recv().await {
            self.process(raw).await;
        }

        debug!("🏁 Delivery queue closed.");
        if self.flush_on_shutdown && !self.accumulator.pending().is_empty() {
            info!(
                documents = self.accumulator.pending().len(),
                "🧹 Flushing what's left before we go"
            );
            self.flush_pending().await;
        }
        if let Some(ticker) = &self.ticker {
            ticker.finish();
        }
        Ok(self.stats)
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn counter(&self) -> u64 {
        self.accumulator.counter()
    }

    pub fn pending(&self) -> &Batch {
        self.accumulator.pending()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: BulkStore + 'static> Worker for Pipeline<S> {
    type Output = Result<IngestStats>;

    fn start(mut self) -> JoinHandle<Self::Output> {
        tokio::spawn(async move {
            let rx = self
                .rx
                .take()
                .ok_or_else(|| anyhow::anyhow!("💀 Pipeline started without a delivery queue"))?;
            self.run(rx).await
        })
    }
}
