//! 🍯 hpfeeds — the honeypot broker protocol, spoken over plain TCP.
//!
//! The wire format is refreshingly small. Every frame is:
//!
//! ```text
//! ┌──────────────────────┬──────────┬─────────────────┐
//! │ u32 BE total length  │ u8 opcode│ body            │
//! └──────────────────────┴──────────┴─────────────────┘
//! ```
//!
//! Strings inside bodies are length-prefixed with a single byte, except where
//! they run to the end of the frame (the channel in SUBSCRIBE, the payload in PUBLISH).
//!
//! 🤝 Handshake: the broker speaks first with INFO (its name and a 4-byte nonce),
//! we answer with AUTH (`ident`, `SHA1(nonce ‖ secret)`), then SUBSCRIBE. A bad secret
//! is reported later, as an ERROR frame, so the session decides when that happens.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use crate::backends::{Feed, Subscription};
use crate::common::RawMessage;

pub const OP_ERROR: u8 = 0;
pub const OP_INFO: u8 = 1;
pub const OP_AUTH: u8 = 2;
pub const OP_PUBLISH: u8 = 3;
pub const OP_SUBSCRIBE: u8 = 4;
pub const OP_UNSUBSCRIBE: u8 = 5;

const HEADER_LEN: usize = 5;

/// 📡 Where the broker lives and who we say we are.
#[derive(Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ident")]
    pub ident: String,
    /// 🔒 Never logged. Not even at trace. Especially not at trace.
    #[serde(default = "default_secret")]
    pub secret: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    /// ⏱️ Covers the TCP connect and the whole handshake, not just the former.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 📏 Frames bigger than this end the session instead of eating the heap.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_host() -> String {
    "mhnbroker.threatstream.com".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_ident() -> String {
    "test-ident".to_string()
}

fn default_secret() -> String {
    "test-secret".to_string()
}

fn default_channel() -> String {
    "test-channel".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ident", &self.ident)
            .field("secret", &"<redacted>")
            .field("channel", &self.channel)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}

/// 💀 Everything that can go wrong on the wire.
#[derive(Debug, Error)]
pub enum HpfeedsError {
    #[error("broker said: {0}")]
    Broker(String),
    #[error("expected opcode {expected}, got {got}")]
    UnexpectedOpcode { expected: u8, got: u8 },
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame length {0} is shorter than the header")]
    FrameTooShort(usize),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("broker closed the connection during the handshake")]
    ClosedDuringHandshake,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 📦 One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub body: Bytes,
}

/// 🔧 Wrap `body` in a frame header.
pub fn encode_frame(opcode: u8, body: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u32((HEADER_LEN + body.len()) as u32);
    frame.put_u8(opcode);
    frame.put_slice(body);
    frame
}

/// 🔍 Pull one complete frame off the front of `buf`, if one is there yet.
pub fn decode_frame(buf: &mut BytesMut, max_len: usize) -> Result<Option<Frame>, HpfeedsError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len < HEADER_LEN {
        return Err(HpfeedsError::FrameTooShort(len));
    }
    if len > max_len {
        return Err(HpfeedsError::FrameTooLarge { len, max: max_len });
    }
    if buf.len() < len {
        buf.reserve(len - buf.len());
        return Ok(None);
    }
    let mut frame = buf.split_to(len);
    frame.advance(4);
    let opcode = frame.get_u8();
    Ok(Some(Frame {
        opcode,
        body: frame.freeze(),
    }))
}

fn put_short_str(out: &mut BytesMut, value: &[u8]) -> Result<(), HpfeedsError> {
    let len = u8::try_from(value.len()).map_err(|_| HpfeedsError::Malformed("string longer than 255 bytes"))?;
    out.put_u8(len);
    out.put_slice(value);
    Ok(())
}

fn take_short_str(body: &mut Bytes) -> Result<Bytes, HpfeedsError> {
    if !body.has_remaining() {
        return Err(HpfeedsError::Malformed("missing string length"));
    }
    let len = body.get_u8() as usize;
    if body.remaining() < len {
        return Err(HpfeedsError::Malformed("string runs past the end of the frame"));
    }
    Ok(body.split_to(len))
}

/// 🔐 `SHA1(nonce ‖ secret)`.
pub fn auth_hash(nonce: &[u8], secret: &str) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

pub fn auth_frame(ident: &str, nonce: &[u8], secret: &str) -> Result<BytesMut, HpfeedsError> {
    let mut body = BytesMut::new();
    put_short_str(&mut body, ident.as_bytes())?;
    body.put_slice(&auth_hash(nonce, secret));
    Ok(encode_frame(OP_AUTH, &body))
}

pub fn subscribe_frame(ident: &str, channel: &str) -> Result<BytesMut, HpfeedsError> {
    let mut body = BytesMut::new();
    put_short_str(&mut body, ident.as_bytes())?;
    body.put_slice(channel.as_bytes());
    Ok(encode_frame(OP_SUBSCRIBE, &body))
}

pub fn publish_frame(ident: &str, channel: &str, payload: &[u8]) -> Result<BytesMut, HpfeedsError> {
    let mut body = BytesMut::new();
    put_short_str(&mut body, ident.as_bytes())?;
    put_short_str(&mut body, channel.as_bytes())?;
    body.put_slice(payload);
    Ok(encode_frame(OP_PUBLISH, &body))
}

/// 🏷️ INFO body → (broker name, nonce).
pub fn parse_info(mut body: Bytes) -> Result<(String, Bytes), HpfeedsError> {
    let name = take_short_str(&mut body)?;
    if body.remaining() < 4 {
        return Err(HpfeedsError::Malformed("INFO nonce shorter than 4 bytes"));
    }
    Ok((String::from_utf8_lossy(&name).into_owned(), body.split_to(4)))
}

/// 📨 PUBLISH body → (publisher ident, channel, payload).
pub fn parse_publish(mut body: Bytes) -> Result<(String, String, Bytes), HpfeedsError> {
    let ident = take_short_str(&mut body)?;
    let channel = take_short_str(&mut body)?;
    Ok((
        String::from_utf8_lossy(&ident).into_owned(),
        String::from_utf8_lossy(&channel).into_owned(),
        body,
    ))
}

/// 🔌 A framed hpfeeds connection over any async byte stream.
pub struct HpfeedsConnection<S> {
    stream: S,
    buf: BytesMut,
    max_frame_len: usize,
}

impl<S> HpfeedsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, max_message_bytes: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len: max_message_bytes,
        }
    }

    /// 📥 Next frame, or `None` on a clean EOF.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, HpfeedsError> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.max_frame_len)? {
                return Ok(Some(frame));
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                if !self.buf.is_empty() {
                    trace!("🗑️ dropping {} bytes of a half-received frame", self.buf.len());
                }
                return Ok(None);
            }
        }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), HpfeedsError> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// 🤝 INFO → AUTH → SUBSCRIBE. Returns the broker's name.
    pub async fn handshake(&mut self, ident: &str, secret: &str, channel: &str) -> Result<String, HpfeedsError> {
        let frame = self.read_frame().await?.ok_or(HpfeedsError::ClosedDuringHandshake)?;
        let (broker, nonce) = match frame.opcode {
            OP_INFO => parse_info(frame.body)?,
            OP_ERROR => return Err(HpfeedsError::Broker(String::from_utf8_lossy(&frame.body).into_owned())),
            got => return Err(HpfeedsError::UnexpectedOpcode { expected: OP_INFO, got }),
        };
        self.write_frame(&auth_frame(ident, &nonce, secret)?).await?;
        self.write_frame(&subscribe_frame(ident, channel)?).await?;
        Ok(broker)
    }

    /// 📨 Skip everything that is not a PUBLISH. ERROR ends the session.
    pub async fn next_publish(&mut self) -> Result<Option<RawMessage>, HpfeedsError> {
        while let Some(frame) = self.read_frame().await? {
            match frame.opcode {
                OP_PUBLISH => {
                    let (publisher, channel, payload) = parse_publish(frame.body)?;
                    trace!(publisher = %publisher, channel = %channel, bytes = payload.len(), "📨 publish");
                    return Ok(Some(RawMessage { channel, payload }));
                }
                OP_ERROR => {
                    return Err(HpfeedsError::Broker(String::from_utf8_lossy(&frame.body).into_owned()));
                }
                other => debug!(opcode = other, "🤷 ignoring non-publish frame"),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<S> Subscription for HpfeedsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_message(&mut self) -> Result<Option<RawMessage>> {
        Ok(self.next_publish().await?)
    }
}

/// 🍯 The real feed: a TCP connection to an hpfeeds broker.
#[derive(Debug, Clone)]
pub struct HpfeedsFeed {
    config: FeedConfig,
}

impl HpfeedsFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Feed for HpfeedsFeed {
    async fn connect(&mut self, channel: &str) -> Result<Box<dyn Subscription>> {
        let config = &self.config;
        // ⏱️ one deadline for TCP and handshake: a broker that accepts and then says nothing is a refusal
        let session = async {
            let stream = TcpStream::connect((config.host.as_str(), config.port))
                .await
                .with_context(|| format!("💀 Could not open TCP to {}:{}", config.host, config.port))?;
            let mut connection = HpfeedsConnection::new(stream, config.max_message_bytes);
            let broker = connection
                .handshake(&config.ident, &config.secret, channel)
                .await
                .context("💀 hpfeeds handshake failed")?;
            Ok::<_, anyhow::Error>((broker, connection))
        };

        let (broker, connection) = tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), session)
            .await
            .with_context(|| {
                format!(
                    "💀 Connecting and subscribing to {}:{} took longer than {}s",
                    config.host, config.port, config.connect_timeout_secs
                )
            })??;
        info!(broker = %broker, ident = %config.ident, channel, "🤝 authenticated and subscribed");
        Ok(Box::new(connection))
    }
}
