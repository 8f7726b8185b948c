//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every operator at 3am 🦆
//!
//! 🏗️ Powered by Figment: `HFX_*` environment variables, optionally layered under a
//! TOML file. Nested keys use a double underscore, so the broker secret can stay out
//! of the file: `HFX_FEED_CONFIG__SECRET=...`.
//!
//! Built once in `main`, then handed down by value. Nobody reaches for a global.

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{ElasticsearchStoreConfig, FeedConfig, InMemoryStoreConfig};
use crate::pipeline::route::DEFAULT_INDEX_PREFIX;

/// 🍯 The honeypot applications the community feed is known to carry.
pub const KNOWN_APPS: [&str; 10] = [
    "agave",
    "dionaea",
    "p0f",
    "amun",
    "kippo",
    "cowrie",
    "snort",
    "conpot",
    "suricata",
    "elastichoney",
];

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Which broker, who we are, which channel.
    pub feed_config: FeedConfig,
    /// 🕳️ Where the documents go.
    pub store_config: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// 🎭 Pick a store. Any store. (As long as it's one of these two.)
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    Elasticsearch(ElasticsearchStoreConfig),
    /// Dry run: documents are kept in memory and logged, never shipped.
    InMemory(InMemoryStoreConfig),
}

/// 🔢 What happens to the message counter after a flush.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CounterMode {
    /// Never reset; flush whenever `counter % batch_size == 0`.
    #[default]
    Cumulative,
    /// Back to zero after every flush.
    ResetOnFlush,
}

/// 🗑️ Whether a payload that fails to decode still counts toward the flush threshold.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Counted like any other message. A batch may flush with fewer than `batch_size` documents.
    #[default]
    Counted,
    /// Only decoded messages count.
    Ignored,
}

/// 🏃 The knobs of the running pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📦 Messages per flush. Zero is rejected at load time.
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroU64,
    /// ⏱️ Fixed pause between a disconnect and the next connection attempt.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    #[serde(default)]
    pub counter_mode: CounterMode,
    #[serde(default)]
    pub decode_failures: DecodeFailurePolicy,
    /// 🧹 On shutdown, send whatever is still buffered.
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,
}

fn default_batch_size() -> NonZeroU64 {
    NonZeroU64::new(100).unwrap_or(NonZeroU64::MIN)
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_index_prefix() -> String {
    DEFAULT_INDEX_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            index_prefix: default_index_prefix(),
            counter_mode: CounterMode::default(),
            decode_failures: DecodeFailurePolicy::default(),
            flush_on_shutdown: true,
        }
    }
}

/// 🚦 What the bootstrap step does when one index refuses to cooperate.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionErrorPolicy {
    /// Stop startup on the first failure.
    #[default]
    Abort,
    /// Log it and carry on with the next index.
    Skip,
}

/// 🏗️ One-time index provisioning, before the pipeline starts.
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub enabled: bool,
    /// 🗑️ Delete each index before creating it.
    #[serde(default)]
    pub override_existing: bool,
    #[serde(default = "default_mapping_file")]
    pub mapping_file: PathBuf,
    #[serde(default = "default_apps")]
    pub apps: Vec<String>,
    #[serde(default)]
    pub on_error: ProvisionErrorPolicy,
}

fn default_mapping_file() -> PathBuf {
    PathBuf::from("map.json")
}

fn default_apps() -> Vec<String> {
    KNOWN_APPS.iter().map(|app| app.to_string()).collect()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            override_existing: false,
            mapping_file: default_mapping_file(),
            apps: default_apps(),
            on_error: ProvisionErrorPolicy::default(),
        }
    }
}

/// 🚀 Load the config — from env vars, from a file, or from the sheer power of hoping.
///
/// - `None` → `HFX_*` env vars only.
/// - `Some(path)` → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("HFX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (HFX_*). \
             Check the section names, and that batch_size is not zero.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (HFX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_every_knob_is_turned() {
        let file = write_test_config(
            r#"
            [feed_config]
            host = "broker.internal"
            port = 20000
            ident = "hfx-collector"
            secret = "hunter2"
            channel = "cowrie.sessions"

            [store_config.Elasticsearch]
            url = "http://es.internal:9200"
            api_key = "c2VjcmV0"
            compress = true

            [runtime]
            batch_size = 250
            reconnect_delay_secs = 3
            index_prefix = "honey-"
            counter_mode = "reset_on_flush"
            decode_failures = "ignored"
            flush_on_shutdown = false

            [bootstrap]
            enabled = true
            override_existing = true
            mapping_file = "/etc/hfx/map.json"
            apps = ["cowrie", "dionaea"]
            on_error = "skip"
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 A fully specified config should parse.");

        assert_eq!(config.feed_config.host, "broker.internal");
        assert_eq!(config.feed_config.port, 20000);
        assert_eq!(config.feed_config.channel, "cowrie.sessions");
        match &config.store_config {
            StoreConfig::Elasticsearch(es) => {
                assert_eq!(es.url, "http://es.internal:9200");
                assert!(es.compress);
                assert_eq!(es.timeout_secs, 30);
            }
            honestly_who_knows => panic!("💀 Expected Elasticsearch, serde took us to {honestly_who_knows:?}"),
        }
        assert_eq!(config.runtime.batch_size.get(), 250);
        assert_eq!(config.runtime.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.runtime.index_prefix, "honey-");
        assert_eq!(config.runtime.counter_mode, CounterMode::ResetOnFlush);
        assert_eq!(config.runtime.decode_failures, DecodeFailurePolicy::Ignored);
        assert!(!config.runtime.flush_on_shutdown);
        assert!(config.bootstrap.enabled && config.bootstrap.override_existing);
        assert_eq!(config.bootstrap.apps, vec!["cowrie", "dionaea"]);
        assert_eq!(config.bootstrap.on_error, ProvisionErrorPolicy::Skip);
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            [feed_config]
            ident = "hfx"
            secret = "s"
            channel = "amun.events"

            [store_config.InMemory]
            "#,
        );

        let config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 Defaults should fill the gaps.");

        assert_eq!(config.feed_config.host, "mhnbroker.threatstream.com");
        assert_eq!(config.feed_config.port, 10000);
        assert!(matches!(config.store_config, StoreConfig::InMemory(_)));
        assert_eq!(config.runtime.batch_size.get(), 100);
        assert_eq!(config.runtime.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(config.runtime.index_prefix, "mhn-community-data-");
        assert_eq!(config.runtime.counter_mode, CounterMode::Cumulative);
        assert_eq!(config.runtime.decode_failures, DecodeFailurePolicy::Counted);
        assert!(config.runtime.flush_on_shutdown);
        assert!(!config.bootstrap.enabled);
        assert_eq!(config.bootstrap.apps.len(), KNOWN_APPS.len());
        assert_eq!(config.bootstrap.on_error, ProvisionErrorPolicy::Abort);
    }

    #[test]
    fn the_one_where_an_empty_feed_section_falls_back_to_the_test_identity() {
        let file = write_test_config(
            r#"
            [feed_config]

            [store_config.InMemory]
            "#,
        );

        let config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 ident, secret and channel all have defaults");

        assert_eq!(config.feed_config.ident, "test-ident");
        assert_eq!(config.feed_config.secret, "test-secret");
        assert_eq!(config.feed_config.channel, "test-channel");
        assert_eq!(config.feed_config.connect_timeout_secs, 10);
    }

    #[test]
    fn the_one_where_a_zero_batch_size_is_turned_away_at_the_door() {
        let file = write_test_config(
            r#"
            [feed_config]
            ident = "hfx"
            secret = "s"
            channel = "c"

            [store_config.InMemory]

            [runtime]
            batch_size = 0
            "#,
        );

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn the_one_where_the_shipped_example_config_still_parses() {
        let example: AppConfig = toml::from_str(include_str!("../../../hfx.example.toml"))
            .expect("💀 hfx.example.toml drifted away from AppConfig");
        assert!(matches!(example.store_config, StoreConfig::Elasticsearch(_)));
        assert_eq!(example.runtime.batch_size.get(), 100);
    }
}
