//! 📦 Batch — hold documents until the counter says go, then ship them in one bulk call.
//!
//! 🎯 The rules, short version:
//! - the counter ticks once per message, not once per document
//! - at every multiple of `batch_size`, the whole batch goes out in one call
//! - after the call (win, lose, or partial), the batch is empty again
//! - nothing is retried; a failed batch is a lost batch
//!
//! Whether the counter resets after a flush is [`CounterMode`]'s call.

use std::num::NonZeroU64;

use tracing::{error, info, warn};

use crate::app_config::CounterMode;
use crate::backends::BulkStore;
use crate::common::IndexedDocument;

/// 📋 Documents waiting for a bulk call, in arrival order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Batch {
    documents: Vec<IndexedDocument>,
}

impl Batch {
    pub fn push(&mut self, document: IndexedDocument) {
        self.documents.push(document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[IndexedDocument] {
        &self.documents
    }
}

/// 🧮 The counter and the batch, owned by the consumer loop and nobody else.
#[derive(Debug)]
pub struct Accumulator {
    batch_size: NonZeroU64,
    counter_mode: CounterMode,
    counter: u64,
    batch: Batch,
}

impl Accumulator {
    pub fn new(batch_size: NonZeroU64, counter_mode: CounterMode) -> Self {
        Self {
            batch_size,
            counter_mode,
            counter: 0,
            batch: Batch::default(),
        }
    }

    pub fn push(&mut self, document: IndexedDocument) {
        self.batch.push(document);
    }

    /// 🔢 Count one message. `true` means a flush boundary was just reached.
    pub fn tally(&mut self) -> bool {
        self.counter = self.counter.wrapping_add(1);
        self.counter % self.batch_size.get() == 0
    }

    /// 🗑️ Hand over the current batch and start a fresh one.
    pub fn take_batch(&mut self) -> Batch {
        if self.counter_mode == CounterMode::ResetOnFlush {
            self.counter = 0;
        }
        std::mem::take(&mut self.batch)
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn pending(&self) -> &Batch {
        &self.batch
    }
}

/// 📬 How a flush went. Logged by [`flush`]; returned so the caller can count it.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Boundary reached with nothing buffered; no call was made.
    Empty,
    Written { documents: usize },
    /// The call went through, the store turned some documents away.
    PartiallyRejected {
        documents: usize,
        rejected: usize,
        first_error: String,
    },
    /// The call itself failed. Every document in the batch is gone.
    Failed { documents: usize, error: String },
}

impl FlushOutcome {
    pub fn documents(&self) -> usize {
        match self {
            FlushOutcome::Empty => 0,
            FlushOutcome::Written { documents }
            | FlushOutcome::PartiallyRejected { documents, .. }
            | FlushOutcome::Failed { documents, .. } => *documents,
        }
    }
}

/// 🚀 Send `batch` to the store in one call. Never returns an error: every failure
/// is logged and folded into the outcome, and the batch is consumed either way.
pub async fn flush<S: BulkStore + ?Sized>(store: &S, batch: Batch) -> FlushOutcome {
    let documents = batch.len();
    if batch.is_empty() {
        info!("📭 Flush boundary reached with an empty batch. Nothing to send.");
        return FlushOutcome::Empty;
    }

    info!(documents, "📦 Processing batch...");
    match store.bulk_write(batch.documents()).await {
        Err(err) => {
            error!(documents, "💀 Bulk write failed, batch discarded: {err:#}");
            FlushOutcome::Failed {
                documents,
                error: format!("{err:#}"),
            }
        }
        Ok(response) if response.errors || !response.failures.is_empty() => {
            let first_error = response
                .failures
                .first()
                .map(|failure| format!("[{}] {} {}", failure.index, failure.status, failure.reason))
                .unwrap_or_else(|| "store reported errors without item details".to_string());
            warn!(
                documents,
                rejected = response.failures.len(),
                "⚠️ Store rejected part of the batch. First error: {first_error}"
            );
            FlushOutcome::PartiallyRejected {
                documents,
                rejected: response.failures.len(),
                first_error,
            }
        }
        Ok(_) => {
            info!(documents, "✅ Done with {documents} records");
            FlushOutcome::Written { documents }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryStore, StoreBehavior};
    use crate::common::Record;

    fn doc(n: i64) -> IndexedDocument {
        let mut record = Record::new();
        record.insert("n", n);
        IndexedDocument {
            index: "mhn-community-data-cowrie".into(),
            record,
        }
    }

    fn size(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).expect("non-zero")
    }

    #[test]
    fn the_one_where_the_counter_keeps_climbing_after_a_flush() {
        let mut acc = Accumulator::new(size(3), CounterMode::Cumulative);
        let boundaries: Vec<bool> = (0..7).map(|_| acc.tally()).collect();
        assert_eq!(boundaries, vec![false, false, true, false, false, true, false]);

        acc.push(doc(1));
        let batch = acc.take_batch();
        assert_eq!(batch.len(), 1);
        assert!(acc.pending().is_empty());
        assert_eq!(acc.counter(), 7, "cumulative mode never resets");
    }

    #[test]
    fn the_one_where_reset_on_flush_starts_every_window_from_zero() {
        let mut acc = Accumulator::new(size(3), CounterMode::ResetOnFlush);
        assert!(!acc.tally());
        assert!(!acc.tally());
        assert!(acc.tally());
        acc.take_batch();
        assert_eq!(acc.counter(), 0);
        assert!(!acc.tally());
    }

    #[tokio::test]
    async fn the_one_where_a_flush_ships_everything_in_order() {
        let store = InMemoryStore::new();
        let mut batch = Batch::default();
        (1..=3).for_each(|n| batch.push(doc(n)));

        let outcome = flush(&store, batch).await;

        assert_eq!(outcome, FlushOutcome::Written { documents: 3 });
        let calls = store.calls.lock().await;
        assert_eq!(calls.len(), 1);
        let order: Vec<_> = calls[0].iter().map(|d| d.record.number("n")).collect();
        assert_eq!(order, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[tokio::test]
    async fn the_one_where_an_empty_batch_never_bothers_the_store() {
        let store = InMemoryStore::new();
        assert_eq!(flush(&store, Batch::default()).await, FlushOutcome::Empty);
        assert!(store.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_failures_are_reported_not_raised() {
        let store = InMemoryStore::scripted([
            StoreBehavior::FailTransport("connection reset".into()),
            StoreBehavior::RejectFirst {
                status: 400,
                reason: "mapper_parsing_exception".into(),
            },
        ]);
        let batch_of = |n: i64| {
            let mut batch = Batch::default();
            batch.push(doc(n));
            batch.push(doc(n + 1));
            batch
        };

        match flush(&store, batch_of(1)).await {
            FlushOutcome::Failed { documents, error } => {
                assert_eq!(documents, 2);
                assert!(error.contains("connection reset"));
            }
            other => panic!("💀 expected Failed, got {other:?}"),
        }

        match flush(&store, batch_of(3)).await {
            FlushOutcome::PartiallyRejected {
                documents,
                rejected,
                first_error,
            } => {
                assert_eq!((documents, rejected), (2, 1));
                assert!(first_error.contains("mapper_parsing_exception"));
            }
            other => panic!("💀 expected PartiallyRejected, got {other:?}"),
        }
    }
}
