//! Stream binding over standard input/output
//!
//! Frames are newline-delimited JSON, or a `Content-Length` header block
//! followed by the body. A reply uses the framing of the request it answers.
//! Calls are strictly sequential: one frame is read, dispatched and answered
//! before the next is read.

use super::MAX_FRAME_BYTES;
use crate::error::TransportError;
use crate::protocol::{Dispatcher, JsonRpcResponse};
use crate::shutdown::ShutdownCoordinator;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// How a frame was delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    LineDelimited,
    ContentLength,
}

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Value,
    pub framing: Framing,
}

/// Read failure carrying the framing the reply should use
#[derive(Debug)]
struct FrameFault {
    framing: Framing,
    reason: String,
}

impl FrameFault {
    fn new(framing: Framing, reason: impl Into<String>) -> Self {
        Self {
            framing,
            reason: reason.into(),
        }
    }
}

fn is_header_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.starts_with("content-length:") || lower.starts_with("content-type:")
}

fn parse_content_length(line: &str) -> Option<usize> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse::<usize>().ok()
}

/// Read one line of at most `MAX_FRAME_BYTES`, without its terminator
///
/// `Ok(None)` means clean EOF before any byte.
async fn read_line<R>(reader: &mut R, framing: Framing) -> Result<Option<Vec<u8>>, FrameFault>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(MAX_FRAME_BYTES as u64 + 1);
    let n = limited
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| FrameFault::new(framing, format!("read failed: {}", e)))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && buf.len() > MAX_FRAME_BYTES {
        return Err(FrameFault::new(framing, "frame exceeds the 8 MiB limit"));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(buf))
}

async fn read_content_length_body<R>(reader: &mut R, first: &str) -> Result<Vec<u8>, FrameFault>
where
    R: AsyncBufRead + Unpin,
{
    let framing = Framing::ContentLength;
    let mut length = parse_content_length(first);
    loop {
        let line = read_line(reader, framing)
            .await?
            .ok_or_else(|| FrameFault::new(framing, "unexpected EOF in frame headers"))?;
        if line.is_empty() {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        if let Some(value) = parse_content_length(&text) {
            length = Some(value);
        }
    }

    let length = length.ok_or_else(|| FrameFault::new(framing, "missing Content-Length header"))?;
    if length > MAX_FRAME_BYTES {
        return Err(FrameFault::new(framing, "frame exceeds the 8 MiB limit"));
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| FrameFault::new(framing, format!("truncated frame body: {}", e)))?;
    Ok(body)
}

/// Read the next frame, skipping blank lines
async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, FrameFault>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_line(reader, Framing::LineDelimited).await? else {
            return Ok(None);
        };

        let text = std::str::from_utf8(&line)
            .map_err(|_| FrameFault::new(Framing::LineDelimited, "frame is not valid UTF-8"))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (body, framing) = if is_header_line(trimmed) {
            let owned = trimmed.to_string();
            (
                read_content_length_body(reader, &owned).await?,
                Framing::ContentLength,
            )
        } else {
            (trimmed.as_bytes().to_vec(), Framing::LineDelimited)
        };

        let text = std::str::from_utf8(&body)
            .map_err(|_| FrameFault::new(framing, "frame is not valid UTF-8"))?;
        let message = serde_json::from_str(text)
            .map_err(|e| FrameFault::new(framing, format!("invalid JSON: {}", e)))?;
        return Ok(Some(Frame { message, framing }));
    }
}

async fn write_frame<W>(
    writer: &mut W,
    response: &JsonRpcResponse,
    framing: Framing,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = response.to_json();
    match framing {
        Framing::LineDelimited => {
            writer.write_all(body.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(body.as_bytes()).await?;
        }
    }
    writer.flush().await
}

/// Serve one connection until EOF, shutdown, or a transport fault
///
/// A fault writes a single parse-error response with a null id and ends the
/// connection with [`TransportError::Fault`].
pub async fn serve_connection<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
    shutdown: &ShutdownCoordinator,
) -> Result<(), TransportError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = reader;
    let mut served: u64 = 0;

    loop {
        let next = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = shutdown.wait_for_shutdown() => {
                info!(served, "Stream binding stopping on shutdown request");
                return Ok(());
            }
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(served, "Input closed, stream binding finished");
                return Ok(());
            }
            Err(fault) => {
                warn!(reason = %fault.reason, "Transport fault on stream binding");
                let response = JsonRpcResponse::parse_error(&fault.reason);
                if let Err(e) = write_frame(&mut writer, &response, fault.framing).await {
                    debug!(error = %e, "Could not report transport fault");
                }
                return Err(TransportError::Fault(fault.reason));
            }
        };

        if let Some(response) = dispatcher.handle_value(frame.message).await {
            write_frame(&mut writer, &response, frame.framing).await?;
        }
        served += 1;
    }
}

/// Serve the process's stdin/stdout
pub async fn serve_stdio(
    dispatcher: &Dispatcher,
    shutdown: &ShutdownCoordinator,
) -> Result<(), TransportError> {
    info!("Stream binding listening on stdio");
    let reader = BufReader::new(tokio::io::stdin());
    serve_connection(dispatcher, reader, tokio::io::stdout(), shutdown).await
}
