//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Feeds pour the events in, stores slurp them up.
//! And in between, we panic! (kidding, we use anyhow)
//!
//! Two seams live here, each with a trait and an enum that dispatches over the
//! concrete implementations:
//! - [`Feed`] / [`Subscription`] → [`FeedBackend`]: hpfeeds over TCP, or a scripted
//!   in-memory feed for tests.
//! - [`BulkStore`] / [`IndexAdmin`] → [`StoreBackend`]: Elasticsearch over HTTP, or an
//!   in-memory store that remembers every bulk call (dry runs, tests).
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::StoreConfig;
use crate::common::{IndexedDocument, RawMessage};

pub mod elasticsearch;
pub mod hpfeeds;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use hpfeeds::{FeedConfig, HpfeedsFeed};
pub use in_mem::{InMemoryStore, InMemoryStoreConfig, ScriptedFeed, StoreBehavior};

// ===== Feed side =====

/// 📡 Something that can open a live subscription to a channel.
///
/// # Contract
/// - `connect` opens a session and subscribes. An `Err` means "try again later",
///   never "give up".
/// - The returned [`Subscription`] yields messages until the transport goes away.
#[async_trait]
pub trait Feed: Send + std::fmt::Debug {
    async fn connect(&mut self, channel: &str) -> Result<Box<dyn Subscription>>;
}

/// 📨 One connected session.
#[async_trait]
pub trait Subscription: Send {
    /// `Ok(Some)` for a message, `Ok(None)` when the broker hung up,
    /// `Err` when the session broke some other way. Both end the session.
    async fn next_message(&mut self) -> Result<Option<RawMessage>>;
}

/// 🎭 The many faces of a Feed.
#[derive(Debug)]
pub enum FeedBackend {
    Hpfeeds(HpfeedsFeed),
    Scripted(ScriptedFeed),
}

#[async_trait]
impl Feed for FeedBackend {
    async fn connect(&mut self, channel: &str) -> Result<Box<dyn Subscription>> {
        match self {
            FeedBackend::Hpfeeds(feed) => feed.connect(channel).await,
            FeedBackend::Scripted(feed) => feed.connect(channel).await,
        }
    }
}

// ===== Store side =====

/// 📬 What came back from one bulk call that made it to the store and back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    /// The store's own "something went wrong in here" flag.
    pub errors: bool,
    /// Per-document rejections, in request order.
    pub failures: Vec<BulkFailure>,
}

/// 💀 One rejected document.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub index: String,
    pub status: u16,
    /// The store's error detail, verbatim.
    pub reason: String,
}

/// 🕳️ A store that accepts documents in bulk.
///
/// # Contract
/// - `Err` means the call itself failed (network, non-2xx): nothing is known to be stored.
/// - `Ok` with failures means some documents were individually rejected.
/// - Never called with an empty slice by the pipeline.
#[async_trait]
pub trait BulkStore: Send + Sync + std::fmt::Debug {
    async fn bulk_write(&self, documents: &[IndexedDocument]) -> Result<BulkResponse>;
}

/// 🏗️ Index lifecycle, for the bootstrap step only. The steady-state pipeline never calls this.
#[async_trait]
pub trait IndexAdmin: Send + Sync {
    async fn create_index(&self, index: &str, mapping: &str) -> Result<()>;
    async fn delete_index(&self, index: &str) -> Result<()>;
}

/// 🎭 The many faces of a store. Dispatch, nothing more.
#[derive(Debug)]
pub enum StoreBackend {
    Elasticsearch(ElasticsearchStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🚀 Build whichever store the config asks for. Elasticsearch pings the cluster on the way in.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(match config {
            StoreConfig::Elasticsearch(es) => {
                StoreBackend::Elasticsearch(ElasticsearchStore::new(es.clone()).await?)
            }
            StoreConfig::InMemory(_) => StoreBackend::InMemory(InMemoryStore::new()),
        })
    }
}

#[async_trait]
impl BulkStore for StoreBackend {
    async fn bulk_write(&self, documents: &[IndexedDocument]) -> Result<BulkResponse> {
        match self {
            StoreBackend::Elasticsearch(store) => store.bulk_write(documents).await,
            StoreBackend::InMemory(store) => store.bulk_write(documents).await,
        }
    }
}

#[async_trait]
impl IndexAdmin for StoreBackend {
    async fn create_index(&self, index: &str, mapping: &str) -> Result<()> {
        match self {
            StoreBackend::Elasticsearch(store) => store.create_index(index, mapping).await,
            StoreBackend::InMemory(store) => store.create_index(index, mapping).await,
        }
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        match self {
            StoreBackend::Elasticsearch(store) => store.delete_index(index).await,
            StoreBackend::InMemory(store) => store.delete_index(index).await,
        }
    }
}
