/// Length-prefixed framing for browser native messaging.
///
/// Every frame is a 4-byte length in native byte order followed by that
/// many bytes of UTF-8 JSON. The host's stdout carries nothing else.
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::errors::FrameError;
use crate::ipc_protocol::{Response, WireRequest};

/// Largest payload accepted from the extension.
pub const MAX_INBOUND_BYTES: usize = 64 * 1024 * 1024;
/// Browsers refuse host-to-extension messages above 1 MiB.
pub const MAX_OUTBOUND_BYTES: usize = 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Read one raw payload. `Ok(None)` means the peer closed the stream
/// cleanly at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::TruncatedPrefix(filled));
        }
        filled += n;
    }

    let len = u32::from_ne_bytes(prefix) as usize;
    if len > MAX_INBOUND_BYTES {
        return Err(FrameError::TooLarge {
            len,
            limit: MAX_INBOUND_BYTES,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::TruncatedPayload(len)
        } else {
            FrameError::Io(e)
        }
    })?;
    debug!("Read frame of {} bytes", len);
    Ok(Some(payload))
}

/// Read and decode one request message.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<WireRequest>, FrameError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(WireRequest::from_json_slice(&payload)?)),
        None => Ok(None),
    }
}

/// Build a complete frame (prefix + payload) in one buffer.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_OUTBOUND_BYTES {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            limit: MAX_OUTBOUND_BYTES,
        });
    }
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write one response as a single frame and flush it.
///
/// The prefix and payload go out in one `write_all` so a reader never
/// observes a prefix without its body.
pub async fn write_message<W>(writer: &mut W, response: &Response) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(&response.to_json_vec()?)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    debug!("Wrote frame of {} bytes", frame.len() - PREFIX_LEN);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc_protocol::CommandKind;

    fn frame(json: &str) -> Vec<u8> {
        encode_frame(json.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_read_message_decodes_frame() {
        let bytes = frame(r#"{"command":"kill","pid":5}"#);
        let mut reader = bytes.as_slice();
        let msg = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(msg.kind(), CommandKind::Kill);
        assert_eq!(msg.pid, Some(5));
    }

    #[tokio::test]
    async fn test_empty_stream_is_end_of_stream() {
        let mut reader: &[u8] = &[];
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_prefix_is_error() {
        let mut reader: &[u8] = &[3, 0];
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::TruncatedPrefix(2)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        let mut bytes = frame(r#"{"url":"https://example.com/a.mp4"}"#);
        bytes.truncate(bytes.len() - 3);
        let mut reader = bytes.as_slice();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::TruncatedPayload(_)));
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected_before_allocation() {
        let bytes = u32::MAX.to_ne_bytes();
        let mut reader = bytes.as_slice();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_is_not_framing_error() {
        let bytes = frame("{not json");
        let mut reader = bytes.as_slice();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(!err.is_framing());
    }

    #[tokio::test]
    async fn test_write_message_prefix_matches_payload() {
        let mut out = Vec::new();
        write_message(&mut out, &Response::Killed { pid: 77 }).await.unwrap();

        let len = u32::from_ne_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(len, out.len() - 4);
        let value: serde_json::Value = serde_json::from_slice(&out[4..]).unwrap();
        assert_eq!(value["status"], "killed");
        assert_eq!(value["pid"], 77);
    }

    #[test]
    fn test_outbound_limit() {
        let big = vec![b'a'; MAX_OUTBOUND_BYTES + 1];
        assert!(matches!(encode_frame(&big), Err(FrameError::TooLarge { .. })));
    }
}
