//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SOC — 3:47 AM
//!
//! The dashboard says 40,000 SSH login attempts in the last hour. The dashboard
//! is only right because this module turned each of them into two lines of NDJSON
//! and posted them to `_bulk`. Nobody thanks the NDJSON. Nobody ever does.
//!
//! 🚀 What lives here:
//! - [`ElasticsearchStoreConfig`] — URL, auth, timeout, compression.
//! - [`ElasticsearchStore`] — the `_bulk` writer ([`BulkStore`]) and the index
//!   creator/deleter ([`IndexAdmin`]) used by the bootstrap step.
//!
//! 🔄 Nothing in here retries. A failed bulk call is the caller's problem, and the
//! caller has decided (firmly) that the batch is gone.
//!
//! 🦆

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{BulkFailure, BulkResponse, BulkStore, IndexAdmin};
use crate::common::IndexedDocument;

// 🚰 ElasticsearchStoreConfig — "What's the DEAL with index names?"
// There's no index here on purpose: every document brings its own, courtesy of the router.
//
// 🔧 auth is tri-modal: api_key, username+password, or "I hope anonymous works".
#[derive(Deserialize, Clone)]
pub struct ElasticsearchStoreConfig {
    /// 📡 Scheme + host + port. All of it.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// ⏱️ Whole-request timeout for every call, bulk included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 🫁 gzip the bulk body. The cluster needs `http.compression` on, which it has by default.
    #[serde(default)]
    pub compress: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ElasticsearchStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            compress: false,
        }
    }
}

// 🔒 Debug by hand so a stray `{:?}` never prints credentials.
impl std::fmt::Debug for ElasticsearchStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("ElasticsearchStoreConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("api_key", &redacted(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .field("compress", &self.compress)
            .finish()
    }
}

/// 📦 The business end of the pipeline. One client, reused for every call,
/// because a new client per request is buying a new car for every grocery run.
#[derive(Debug)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: ElasticsearchStoreConfig,
}

// 📬 Just enough of the `_bulk` response to find the sad documents.
#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkApiItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItem {
    #[serde(rename = "_index", default)]
    index: String,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

impl ElasticsearchStore {
    /// 🚀 Build the client and ping the cluster root.
    ///
    /// If the cluster is not there at startup we say so loudly, here, rather than
    /// quietly after the first hundred honeypot hits.
    pub async fn new(config: ElasticsearchStoreConfig) -> Result<Self> {
        let store = Self::without_ping(config)?;
        let response = store
            .authorize(store.client.get(&store.config.url))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Knocked on Elasticsearch at '{}' and nobody answered. Is it running? Is the URL right? Is the firewall having a day?",
                    store.config.url
                )
            })?;
        if !response.status().is_success() {
            bail!(
                "💀 Elasticsearch at '{}' answered the ping with {}. Check the credentials.",
                store.config.url,
                response.status()
            );
        }
        debug!(url = %store.config.url, "✅ Elasticsearch is home and answering the door");
        Ok(store)
    }

    /// 🔧 Build the client and skip the ping. Bootstrap tooling and tests live here.
    pub fn without_ping(config: ElasticsearchStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS stack with opinions.")?;
        Ok(Self { client, config })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    // 🔒 api_key beats basic auth in this club.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 📦 Two lines per document: the action, then the source. Every line ends in `\n`,
    /// the last one included, or `_bulk` sulks.
    pub(crate) fn bulk_body(documents: &[IndexedDocument]) -> Result<String> {
        let estimated_size: usize = documents.iter().map(|d| d.record.len() * 32 + 64).sum();
        let mut body = String::with_capacity(estimated_size);
        for document in documents {
            let action = serde_json::json!({ "index": { "_index": document.index } });
            body.push_str(&action.to_string());
            body.push('\n');
            let source = serde_json::to_string(&document.record)
                .context("💀 A record refused to become JSON. It was JSON five minutes ago.")?;
            body.push_str(&source);
            body.push('\n');
        }
        Ok(body)
    }

    fn gzip(body: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::fast());
        encoder.write_all(body).context("💀 gzip choked on the bulk body")?;
        encoder.finish().context("💀 gzip could not finish the bulk body")
    }

    fn parse_bulk_response(text: &str) -> Result<BulkResponse> {
        let parsed: BulkApiResponse = serde_json::from_str(text)
            .context("💀 Elasticsearch answered the bulk call with something that is not a bulk response")?;
        let failures = parsed
            .items
            .into_iter()
            .flat_map(HashMap::into_values)
            .filter_map(|item| {
                item.error.map(|error| BulkFailure {
                    index: item.index,
                    status: item.status,
                    reason: error.to_string(),
                })
            })
            .collect();
        Ok(BulkResponse {
            errors: parsed.errors,
            failures,
        })
    }

    async fn expect_acknowledged(response: reqwest::Response, what: &str) -> Result<()> {
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("💀 {what}: Elasticsearch hung up halfway through the response ({status})"))?;
        if !status.is_success() {
            bail!("💀 {what} failed with {status}: {text}");
        }
        let ack: Acknowledged = serde_json::from_str(&text)
            .with_context(|| format!("💀 {what} returned an unreadable body: {text}"))?;
        if !ack.acknowledged {
            bail!("💀 {what}: not acknowledged");
        }
        Ok(())
    }
}

#[async_trait]
impl BulkStore for ElasticsearchStore {
    async fn bulk_write(&self, documents: &[IndexedDocument]) -> Result<BulkResponse> {
        let body = Self::bulk_body(documents)?;
        let mut request = self
            .authorize(self.client.post(self.url_for("_bulk")))
            // ⚠️ x-ndjson, not json. The x- means "we made this up but we're committing to it."
            .header("Content-Type", "application/x-ndjson");

        request = if self.config.compress {
            request
                .header("Content-Encoding", "gzip")
                .body(Self::gzip(body.as_bytes())?)
        } else {
            request.body(body)
        };

        let response = request
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity and timeouts.")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("💀 Elasticsearch hung up halfway through the bulk response")?;
        if !status.is_success() {
            bail!("💀 Elasticsearch rejected the whole bulk request with {status}: {text}");
        }

        trace!("🚀 bulk request landed with {} documents", documents.len());
        Self::parse_bulk_response(&text)
    }
}

#[async_trait]
impl IndexAdmin for ElasticsearchStore {
    async fn create_index(&self, index: &str, mapping: &str) -> Result<()> {
        let response = self
            .authorize(self.client.put(self.url_for(index)))
            .header("Content-Type", "application/json")
            .body(mapping.to_string())
            .send()
            .await
            .with_context(|| format!("💀 Could not reach Elasticsearch to create '{index}'"))?;
        Self::expect_acknowledged(response, &format!("Create index '{index}'")).await
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url_for(index)))
            .send()
            .await
            .with_context(|| format!("💀 Could not reach Elasticsearch to delete '{index}'"))?;
        Self::expect_acknowledged(response, &format!("Delete index '{index}'")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Record;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cowrie_doc(src_ip: &str) -> IndexedDocument {
        let mut record = Record::new();
        record.insert("app", "cowrie");
        record.insert("src_ip", src_ip);
        IndexedDocument {
            index: "mhn-community-data-cowrie".to_string(),
            record,
        }
    }

    #[test]
    fn the_one_where_two_documents_become_four_lines_of_ndjson() -> Result<()> {
        let body = ElasticsearchStore::bulk_body(&[cowrie_doc("10.0.0.1"), cowrie_doc("10.0.0.2")])?;
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'), "the bulk API wants the trailing newline");
        assert_eq!(lines[0], r#"{"index":{"_index":"mhn-community-data-cowrie"}}"#);
        assert_eq!(lines[1], r#"{"app":"cowrie","src_ip":"10.0.0.1"}"#);
        assert_eq!(lines[3], r#"{"app":"cowrie","src_ip":"10.0.0.2"}"#);
        Ok(())
    }

    #[test]
    fn the_one_where_only_the_sad_items_are_reported() -> Result<()> {
        let response = ElasticsearchStore::parse_bulk_response(
            r#"{"took":3,"errors":true,"items":[
                {"index":{"_index":"mhn-community-data-cowrie","status":201}},
                {"index":{"_index":"mhn-community-data-snort","status":400,
                  "error":{"type":"mapper_parsing_exception","reason":"failed to parse field [dest_port]"}}}
            ]}"#,
        )?;

        assert!(response.errors);
        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].index, "mhn-community-data-snort");
        assert_eq!(response.failures[0].status, 400);
        assert!(response.failures[0].reason.contains("mapper_parsing_exception"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_bulk_call_hits_the_wire_with_the_right_headers() -> Result<()> {
        let server = MockServer::start().await;
        let expected_body = ElasticsearchStore::bulk_body(&[cowrie_doc("192.0.2.7")])?;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .and(header("Authorization", "ApiKey c2VjcmV0"))
            .and(body_string(expected_body))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"took":1,"errors":false,"items":[{"index":{"_index":"mhn-community-data-cowrie","status":201}}]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ElasticsearchStoreConfig::new(server.uri());
        config.api_key = Some("c2VjcmV0".into());
        let store = ElasticsearchStore::without_ping(config)?;

        let response = store.bulk_write(&[cowrie_doc("192.0.2.7")]).await?;
        assert!(!response.errors);
        assert!(response.failures.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_500_is_a_transport_failure_not_a_partial_one() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(503).set_body_string("cluster_block_exception"))
            .mount(&server)
            .await;

        let store = ElasticsearchStore::without_ping(ElasticsearchStoreConfig::new(server.uri()))?;
        let result = store.bulk_write(&[cowrie_doc("192.0.2.8")]).await;

        let error = result.expect_err("a 503 should fail the whole call");
        assert!(format!("{error:#}").contains("503"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_gzip_is_announced_when_asked_for() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errors":false,"items":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ElasticsearchStoreConfig::new(server.uri());
        config.compress = true;
        let store = ElasticsearchStore::without_ping(config)?;
        store.bulk_write(&[cowrie_doc("192.0.2.9")]).await?;
        Ok(())
    }

    #[test]
    fn the_one_where_credentials_stay_out_of_debug_output() {
        let mut config = ElasticsearchStoreConfig::new("http://es.internal:9200");
        config.username = Some("elastic".into());
        config.password = Some("changeme".into());
        config.api_key = Some("c2VjcmV0".into());

        let rendered = format!("{config:?}");
        assert!(rendered.contains("elastic"));
        assert!(!rendered.contains("changeme"));
        assert!(!rendered.contains("c2VjcmV0"));
    }

    #[tokio::test]
    async fn the_one_where_a_cut_off_acknowledgement_is_an_error_not_an_empty_body() -> Result<()> {
        // 🔌 promises 1000 bytes, sends a handful, hangs up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let server = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await?;
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await?;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 1000\r\n\r\n{\"ack")
                .await?;
            socket.shutdown().await?;
            Ok::<_, std::io::Error>(())
        });

        let store = ElasticsearchStore::without_ping(ElasticsearchStoreConfig::new(url))?;
        let err = store
            .create_index("mhn-community-data-cowrie", "{}")
            .await
            .expect_err("a truncated body must not pass as acknowledged");

        let rendered = format!("{err:#}");
        assert!(rendered.contains("hung up halfway"), "got: {rendered}");
        server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_ping_finds_nobody_home() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = ElasticsearchStore::new(ElasticsearchStoreConfig::new(server.uri())).await;
        assert!(result.is_err(), "a 401 on the ping should stop startup");
    }

    #[tokio::test]
    async fn the_one_where_index_creation_must_be_acknowledged() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/mhn-community-data-cowrie"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"acknowledged":true}"#))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/mhn-community-data-snort"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"acknowledged":false}"#))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/mhn-community-data-cowrie"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"error":"index_not_found_exception"}"#))
            .mount(&server)
            .await;

        let store = ElasticsearchStore::without_ping(ElasticsearchStoreConfig::new(server.uri()))?;
        store.create_index("mhn-community-data-cowrie", "{}").await?;
        assert!(store.create_index("mhn-community-data-snort", "{}").await.is_err());
        assert!(store.delete_index("mhn-community-data-cowrie").await.is_err());
        Ok(())
    }
}
