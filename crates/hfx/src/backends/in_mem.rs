//! # Previously, on hfx...
//!
//! 🎬 The broker was down. The cluster was down. The coffee machine was, inexplicably,
//! also down. Someone still had to prove the pipeline worked.
//!
//! That someone was this module.
//!
//! - [`ScriptedFeed`] plays back a list of sessions: some refuse to connect, some
//!   deliver a handful of messages and hang up, some deliver and then just... stay.
//! - [`InMemoryStore`] keeps every bulk call behind an `Arc<Mutex<...>>` so callers can
//!   inspect what arrived, and can be told to fail on cue.
//!
//! ✅ No network calls. No disk I/O. Just vibes and heap memory.
//! The store doubles as the `InMemory` dry-run backend, so it is not test-only.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::backends::{BulkFailure, BulkResponse, BulkStore, Feed, IndexAdmin, Subscription};
use crate::common::{IndexedDocument, RawMessage};

// ===== Feed =====

/// 🎞️ One act of the script.
#[derive(Debug, Clone)]
pub enum ScriptedSession {
    /// `connect` fails with this message.
    Refuse(String),
    /// Deliver these, then hang up.
    Deliver(Vec<RawMessage>),
    /// Deliver these, then stay connected forever.
    Hold(Vec<RawMessage>),
}

/// 🎬 A feed that follows a script. Once the script runs out, every new session
/// connects and then sits there quietly, like a subscriber to a dead channel.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFeed {
    script: Arc<Mutex<VecDeque<ScriptedSession>>>,
    /// 🕰️ When each `connect` was attempted, successful or not.
    pub connect_attempts: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedFeed {
    pub fn new(sessions: impl IntoIterator<Item = ScriptedSession>) -> Self {
        Self {
            script: Arc::new(Mutex::new(sessions.into_iter().collect())),
            connect_attempts: Arc::default(),
        }
    }
}

#[async_trait]
impl Feed for ScriptedFeed {
    async fn connect(&mut self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.connect_attempts.lock().await.push(Instant::now());
        let next_act = self.script.lock().await.pop_front();
        debug!(channel, "🎬 scripted feed connecting: {:?}", next_act);
        let (messages, hold) = match next_act {
            Some(ScriptedSession::Refuse(reason)) => bail!("💀 scripted refusal: {reason}"),
            Some(ScriptedSession::Deliver(messages)) => (messages, false),
            Some(ScriptedSession::Hold(messages)) => (messages, true),
            None => (Vec::new(), true),
        };
        Ok(Box::new(ScriptedSubscription {
            messages: messages.into(),
            hold,
        }))
    }
}

struct ScriptedSubscription {
    messages: VecDeque<RawMessage>,
    hold: bool,
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    async fn next_message(&mut self) -> Result<Option<RawMessage>> {
        if let Some(message) = self.messages.pop_front() {
            return Ok(Some(message));
        }
        if self.hold {
            // 💤 connected, subscribed, and nobody is talking
            std::future::pending::<()>().await;
        }
        Ok(None)
    }
}

// ===== Store =====

/// 📋 `[store_config.InMemory]` takes no options. The table just has to exist.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InMemoryStoreConfig {}

/// 🎭 How the next bulk call should go.
#[derive(Debug, Clone)]
pub enum StoreBehavior {
    Accept,
    /// The whole call fails, as if the network ate it.
    FailTransport(String),
    /// The call succeeds but the first document is rejected.
    RejectFirst { status: u16, reason: String },
}

/// 📦 A store that never forgets.
///
/// Clone-able because tests need to peek inside after handing the store to the
/// pipeline. The `Arc`s mean every clone shares the same memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// 🔒 Every bulk call, in order, including the ones scripted to fail.
    pub calls: Arc<Mutex<Vec<Vec<IndexedDocument>>>>,
    /// 🏗️ index name → mapping body, as created by the bootstrap step.
    pub indexes: Arc<Mutex<BTreeMap<String, String>>>,
    script: Arc<Mutex<VecDeque<StoreBehavior>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🎬 Queue up behaviors for the next bulk calls. Unscripted calls are accepted.
    pub fn scripted(behaviors: impl IntoIterator<Item = StoreBehavior>) -> Self {
        Self {
            script: Arc::new(Mutex::new(behaviors.into_iter().collect())),
            ..Self::default()
        }
    }

    /// 🔢 Total documents across all recorded calls.
    pub async fn document_count(&self) -> usize {
        self.calls.lock().await.iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl BulkStore for InMemoryStore {
    async fn bulk_write(&self, documents: &[IndexedDocument]) -> Result<BulkResponse> {
        self.calls.lock().await.push(documents.to_vec());
        let behavior = self.script.lock().await.pop_front().unwrap_or(StoreBehavior::Accept);
        debug!("📥 in-memory store took {} documents ({:?})", documents.len(), behavior);

        match behavior {
            StoreBehavior::Accept => Ok(BulkResponse::default()),
            StoreBehavior::FailTransport(reason) => Err(anyhow!("💀 scripted transport failure: {reason}")),
            StoreBehavior::RejectFirst { status, reason } => Ok(BulkResponse {
                errors: true,
                failures: documents
                    .first()
                    .map(|doc| BulkFailure {
                        index: doc.index.clone(),
                        status,
                        reason,
                    })
                    .into_iter()
                    .collect(),
            }),
        }
    }
}

#[async_trait]
impl IndexAdmin for InMemoryStore {
    async fn create_index(&self, index: &str, mapping: &str) -> Result<()> {
        let mut indexes = self.indexes.lock().await;
        if indexes.contains_key(index) {
            bail!("💀 index '{index}' already exists");
        }
        indexes.insert(index.to_string(), mapping.to_string());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        match self.indexes.lock().await.remove(index) {
            Some(_) => Ok(()),
            None => bail!("💀 no such index '{index}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Record;

    fn doc(index: &str) -> IndexedDocument {
        IndexedDocument {
            index: index.to_string(),
            record: Record::new(),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_script_is_followed_to_the_letter() -> Result<()> {
        let store = InMemoryStore::scripted([
            StoreBehavior::FailTransport("cable unplugged".into()),
            StoreBehavior::RejectFirst {
                status: 400,
                reason: "mapper_parsing_exception".into(),
            },
        ]);

        assert!(store.bulk_write(&[doc("a")]).await.is_err());

        let partial = store.bulk_write(&[doc("b"), doc("c")]).await?;
        assert!(partial.errors);
        assert_eq!(partial.failures.len(), 1);
        assert_eq!(partial.failures[0].index, "b");

        let fine = store.bulk_write(&[doc("d")]).await?;
        assert_eq!(fine, BulkResponse::default());

        assert_eq!(store.calls.lock().await.len(), 3, "failed calls are recorded too");
        assert_eq!(store.document_count().await, 4);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_indexes_are_created_once_and_deleted_once() -> Result<()> {
        let store = InMemoryStore::new();
        store.create_index("mhn-community-data-cowrie", "{}").await?;
        assert!(store.create_index("mhn-community-data-cowrie", "{}").await.is_err());
        store.delete_index("mhn-community-data-cowrie").await?;
        assert!(store.delete_index("mhn-community-data-cowrie").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_scripted_feed_hangs_up_on_cue() -> Result<()> {
        let mut feed = ScriptedFeed::new([
            ScriptedSession::Refuse("broker napping".into()),
            ScriptedSession::Deliver(vec![RawMessage::new("ch", "{}")]),
        ]);

        assert!(feed.connect("ch").await.is_err());

        let mut session = feed.connect("ch").await?;
        assert!(session.next_message().await?.is_some());
        assert!(session.next_message().await?.is_none());

        assert_eq!(feed.connect_attempts.lock().await.len(), 2);
        Ok(())
    }
}
