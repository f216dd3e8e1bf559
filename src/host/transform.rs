//! Reversible byte transformers for envelopes and file payloads.
//!
//! The sending side runs `transform`; the host only ever calls `restore`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

use crate::host::remote::TransformContext;

/// Upper bound for gunzipped output (256 MiB)
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024 * 1024;

#[async_trait]
pub trait DataTransformer: Send + Sync {
    /// Forward direction, as applied by the sender.
    async fn transform(&self, data: Vec<u8>, ctx: &TransformContext<'_>)
        -> anyhow::Result<Vec<u8>>;

    /// Undo `transform`.
    async fn restore(&self, data: Vec<u8>, ctx: &TransformContext<'_>) -> anyhow::Result<Vec<u8>>;
}

/// Returns its input unchanged in both directions.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransformer;

#[async_trait]
impl DataTransformer for IdentityTransformer {
    async fn transform(
        &self,
        data: Vec<u8>,
        _ctx: &TransformContext<'_>,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(data)
    }

    async fn restore(&self, data: Vec<u8>, _ctx: &TransformContext<'_>) -> anyhow::Result<Vec<u8>> {
        Ok(data)
    }
}

/// Standard base64 text encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Transformer;

#[async_trait]
impl DataTransformer for Base64Transformer {
    async fn transform(
        &self,
        data: Vec<u8>,
        _ctx: &TransformContext<'_>,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(STANDARD.encode(data).into_bytes())
    }

    async fn restore(&self, data: Vec<u8>, _ctx: &TransformContext<'_>) -> anyhow::Result<Vec<u8>> {
        let text = std::str::from_utf8(&data).context("base64 input is not UTF-8")?;
        STANDARD
            .decode(text.trim())
            .context("Invalid base64 input")
    }
}

/// XOR with a repeating key. Its own inverse.
#[derive(Debug, Clone)]
pub struct XorTransformer {
    key: Vec<u8>,
}

impl XorTransformer {
    pub fn new(key: impl Into<Vec<u8>>) -> anyhow::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            bail!("XOR key must not be empty");
        }
        Ok(Self { key })
    }

    /// Build from an options blob of the form `{ "key": "..." }`.
    pub fn from_options(options: &serde_json::Value) -> anyhow::Result<Self> {
        let key = options
            .get("key")
            .and_then(|k| k.as_str())
            .context("xor transformer requires a string 'key' option")?;
        Self::new(key.as_bytes())
    }

    fn apply(&self, mut data: Vec<u8>) -> Vec<u8> {
        for (byte, k) in data.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
        data
    }
}

#[async_trait]
impl DataTransformer for XorTransformer {
    async fn transform(
        &self,
        data: Vec<u8>,
        _ctx: &TransformContext<'_>,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(self.apply(data))
    }

    async fn restore(&self, data: Vec<u8>, _ctx: &TransformContext<'_>) -> anyhow::Result<Vec<u8>> {
        Ok(self.apply(data))
    }
}

/// gzip as a transformer, for senders that compress whole envelopes.
#[derive(Debug, Clone, Copy)]
pub struct GzipTransformer {
    max_size: u64,
}

impl GzipTransformer {
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    /// Build from an optional `{ "maxSize": <bytes> }` options blob.
    pub fn from_options(options: &serde_json::Value) -> anyhow::Result<Self> {
        match options.get("maxSize") {
            None => Ok(Self::default()),
            Some(value) => {
                let max_size = value
                    .as_u64()
                    .filter(|&n| n > 0)
                    .context("gzip transformer 'maxSize' must be a positive integer")?;
                Ok(Self::new(max_size))
            }
        }
    }
}

impl Default for GzipTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECOMPRESSED_SIZE)
    }
}

#[async_trait]
impl DataTransformer for GzipTransformer {
    async fn transform(
        &self,
        data: Vec<u8>,
        _ctx: &TransformContext<'_>,
    ) -> anyhow::Result<Vec<u8>> {
        let compressed = tokio::task::spawn_blocking(move || gzip(&data)).await?;
        compressed.context("gzip compression failed")
    }

    async fn restore(&self, data: Vec<u8>, _ctx: &TransformContext<'_>) -> anyhow::Result<Vec<u8>> {
        gunzip_blocking(data, self.max_size)
            .await
            .context("gzip decompression failed")
    }
}

pub(crate) fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decode every gzip member in `data`, failing once the output would
/// exceed `max_size` bytes.
pub(crate) fn gunzip(data: &[u8], max_size: u64) -> io::Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data).take(max_size.saturating_add(1));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    if out.len() as u64 > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decompressed data exceeds {} bytes", max_size),
        ));
    }
    Ok(out)
}

/// [`gunzip`] on the blocking pool so large payloads do not stall the
/// runtime.
pub(crate) async fn gunzip_blocking(data: Vec<u8>, max_size: u64) -> io::Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || gunzip(&data, max_size))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
