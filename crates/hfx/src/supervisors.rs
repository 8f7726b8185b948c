//! 🎬 *[a broker somewhere drops the connection for the fourth time today]*
//! 🎬 "In a world where TCP sessions die without warning..."
//! 🎬 "One supervisor refused to stay disconnected." 🦆
//!
//! 📦 The Supervisor owns the feed. It connects, subscribes, forwards every
//! message into the delivery queue, and when the session ends (for any reason)
//! it waits the reconnect delay and does it all again. Forever.
//!
//! There is no retry budget and no backoff: the delay is fixed. The loop ends on
//! exactly two things: the shutdown token, or nobody left to deliver to.
//!
//! Every message goes through the queue, which is FIFO, and there is one feed
//! session at a time, so the consumer sees messages in the order the broker sent them.

use std::time::Duration;

use anyhow::Error;
use async_channel::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::Feed;
use crate::common::RawMessage;
use crate::workers::Worker;

/// 🚦 Where the feed connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Why a session ended.
#[derive(Debug)]
enum SessionEnd {
    /// `connect` itself failed.
    Refused(Error),
    /// The broker closed the session.
    HungUp,
    Broken(Error),
    /// The consumer is gone; nothing to deliver to.
    QueueClosed,
}

/// 📡 Keeps one feed subscription alive and pours it into the delivery queue.
#[derive(Debug)]
pub struct Supervisor<F> {
    feed: F,
    channel: String,
    reconnect_delay: Duration,
    deliveries: Sender<RawMessage>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    sessions: u64,
}

impl<F: Feed> Supervisor<F> {
    pub fn new(
        feed: F,
        channel: impl Into<String>,
        reconnect_delay: Duration,
        deliveries: Sender<RawMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            feed,
            channel: channel.into(),
            reconnect_delay,
            deliveries,
            state,
            shutdown,
            sessions: 0,
        }
    }

    /// 👀 Watch the connection state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// 🔄 Connect, forward, wait, repeat. Returns how many sessions were established.
    ///
    /// The delivery sender is dropped on return, which is how the consumer learns
    /// that no more messages are coming.
    pub async fn run(mut self) -> u64 {
        let shutdown = self.shutdown.clone();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            info!(channel = %self.channel, "📡 Connecting to the feed...");

            let ended = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("🛑 Shutdown requested mid-session");
                    break;
                }
                ended = self.run_session() => ended,
            };

            self.set_state(ConnectionState::Disconnected);
            match ended {
                SessionEnd::QueueClosed => {
                    warn!("🕳️ Delivery queue closed, nobody is listening. Supervisor out.");
                    break;
                }
                SessionEnd::Refused(err) => warn!("💀 Could not connect: {err:#}"),
                SessionEnd::Broken(err) => warn!("💀 Feed session broke: {err:#}"),
                SessionEnd::HungUp => info!("📴 Broker closed the session"),
            }

            warn!(
                retry_in_secs = self.reconnect_delay.as_secs(),
                "🔌 Disconnected, retrying in {}s",
                self.reconnect_delay.as_secs()
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(sessions = self.sessions, "🛑 Supervisor stopped");
        self.sessions
    }

    async fn run_session(&mut self) -> SessionEnd {
        let mut subscription = match self.feed.connect(&self.channel).await {
            Ok(subscription) => subscription,
            Err(err) => return SessionEnd::Refused(err),
        };

        self.sessions += 1;
        self.set_state(ConnectionState::Subscribed);
        info!(channel = %self.channel, session = self.sessions, "✅ Connected and subscribed");

        loop {
            match subscription.next_message().await {
                Ok(Some(message)) => {
                    if self.deliveries.send(message).await.is_err() {
                        return SessionEnd::QueueClosed;
                    }
                }
                Ok(None) => return SessionEnd::HungUp,
                Err(err) => return SessionEnd::Broken(err),
            }
        }
    }
}

impl<F: Feed + 'static> Worker for Supervisor<F> {
    type Output = u64;

    fn start(self) -> JoinHandle<Self::Output> {
        tokio::spawn(self.run())
    }
}
