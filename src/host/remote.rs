//! Data model shared by the receive pipeline stages.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{HostError, Result};

/// Global variables handed down by the deployer context.
pub type Globals = HashMap<String, serde_json::Value>;

/// A file received from a remote sender.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Relative path, slash-normalized
    pub name: String,

    /// Payload; base64 on the wire, replaced in place by later stages
    #[serde(deserialize_with = "decode_base64")]
    pub data: Vec<u8>,

    #[serde(default)]
    pub is_compressed: bool,

    /// 1-based position within the sender's batch
    #[serde(default)]
    pub nr: Option<u64>,

    #[serde(default)]
    pub total_count: Option<u64>,

    #[serde(default)]
    pub session: Option<String>,

    #[serde(default)]
    pub tag: Option<serde_json::Value>,
}

fn decode_base64<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.trim())
        .map_err(serde::de::Error::custom)
}

impl RemoteFile {
    /// Parse the (already untransformed) JSON envelope.
    pub fn from_json(envelope: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(envelope)
            .map_err(|e| HostError::Envelope(format!("envelope is not UTF-8: {}", e)))?;
        let mut file: RemoteFile =
            serde_json::from_str(text).map_err(|e| HostError::Envelope(e.to_string()))?;
        file.name = normalize_name(&file.name);
        if file.name.is_empty() {
            return Err(HostError::Envelope("file name is empty".to_string()));
        }
        Ok(file)
    }

    /// "(nr/total)" suffix for log lines, empty when the sender did not say.
    pub fn progress_label(&self) -> String {
        match (self.nr, self.total_count) {
            (Some(nr), Some(total)) => format!(" ({}/{})", nr, total),
            (Some(nr), None) => format!(" (#{})", nr),
            _ => String::new(),
        }
    }
}

/// Backslashes become slashes and leading slashes are dropped.
pub fn normalize_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// The peer a file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClient {
    pub address: String,
    pub port: u16,
}

impl From<SocketAddr> for RemoteClient {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Which of the two transformer slots is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    /// The JSON envelope as a whole
    Message,
    /// The file payload bytes
    FileData,
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformMode::Message => f.write_str("message"),
            TransformMode::FileData => f.write_str("file data"),
        }
    }
}

/// Handed to a transformer on every call.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub mode: TransformMode,
    pub remote: &'a RemoteClient,
    pub globals: &'a Globals,
}

/// Handed to a validator. `target` may be reassigned to redirect the write.
#[derive(Debug)]
pub struct ValidatorContext<'a> {
    pub target: PathBuf,
    pub remote: &'a RemoteClient,
    pub globals: &'a Globals,
}
