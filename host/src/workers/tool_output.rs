/// Line splitting for FFmpeg's stdout/stderr.
///
/// FFmpeg redraws its status line with `\r`, so both `\r` and `\n` end a
/// line here. Lines are forwarded to the monitor over an mpsc channel.
use std::io;

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

/// Lines longer than this are cut and emitted in pieces.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Decoder producing one `String` per `\r`- or `\n`-terminated line.
/// Empty lines (such as the gap in `\r\n`) are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolOutputCodec;

impl Decoder for ToolOutputCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let Some(pos) = buf.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                if buf.len() >= MAX_LINE_BYTES {
                    let chunk = buf.split_to(MAX_LINE_BYTES);
                    return Ok(Some(String::from_utf8_lossy(&chunk).into_owned()));
                }
                return Ok(None);
            };

            let line = buf.split_to(pos);
            buf.advance(1);
            if line.is_empty() {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

/// Forward every line of `stream` into `tx` until EOF or a read error.
pub fn spawn_line_reader<R>(
    name: &'static str,
    stream: R,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stream, ToolOutputCodec);
        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Reading tool {} failed: {}", name, e);
                    break;
                }
            }
        }
        debug!("Tool {} stream ended", name);
    })
}
