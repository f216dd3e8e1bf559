//! Length-prefixed message framing.
//!
//! Wire format: `len:u32 (little-endian) | body (len bytes)`.
//! Exactly one message per connection; nothing is ever sent back.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::error::{HostError, Result};
use crate::host::frame::read_exact_bytes;

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a message body (16MB - 1)
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 0x00FF_FFFF;

/// Read one framed message body.
///
/// A short prefix, a zero or over-limit length and a truncated body all
/// surface as [`HostError::Protocol`]; the caller drops the connection.
pub async fn read_message<R>(reader: &mut R, max_size: u32) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let prefix = read_exact_bytes(reader, LENGTH_PREFIX_SIZE)
        .await
        .map_err(|e| invalid_length("length prefix", e))?;
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);

    if len == 0 {
        return Err(HostError::Protocol("message length is zero".to_string()));
    }
    if len > max_size {
        return Err(HostError::Protocol(format!(
            "message size {} exceeds maximum allowed size {}",
            len, max_size
        )));
    }

    let body = read_exact_bytes(reader, len as usize)
        .await
        .map_err(|e| invalid_length("message body", e))?;

    Ok(body.freeze())
}

fn invalid_length(what: &str, err: HostError) -> HostError {
    match err {
        HostError::ConnectionClosed { expected, received } => HostError::Protocol(format!(
            "invalid buffer length for {}: expected {} bytes, got {}",
            what, expected, received
        )),
        other => other,
    }
}

/// Frame a message body the way `read_message` expects it.
pub fn encode_message(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}
