//! Capture command output while optionally streaming it live.
//!
//! Every node variant funnels its child streams through these helpers. The
//! returned buffer is what evaluators see; the live stream is cosmetic and
//! only produced in debug mode, line by line, through the coordinator so it
//! interleaves cleanly with the progress indicator.

use std::io::{BufRead, BufReader, Read};

use crossterm::style::Stylize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader as AsyncBufReader};

use super::coordinator::{coordinator, debug_enabled};
use super::StreamKind;

fn prefix(node: &str, stream: StreamKind) -> String {
    match stream {
        StreamKind::Stdout => format!("{}", format!("[{node}:stdout] ").green()),
        StreamKind::Stderr => format!("{}", format!("[{node}:stderr] ").red()),
    }
}

/// Send one captured line through the coordinator with the node prefix.
pub fn emit_line(node: &str, stream: StreamKind, line: &str) {
    coordinator().write_line(stream, &format!("{}{}", prefix(node, stream), line));
}

/// Drain an async reader, capturing all bytes and streaming each line live
/// when debug mode is on.
pub async fn capture_async<R>(reader: R, node: &str, stream: StreamKind) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let debug = debug_enabled();
    let mut reader = AsyncBufReader::new(reader);
    let mut captured = Vec::new();
    let mut chunk = Vec::new();

    loop {
        chunk.clear();
        let n = reader.read_until(b'\n', &mut chunk).await?;
        if n == 0 {
            break;
        }
        captured.extend_from_slice(&chunk);
        if debug {
            let line = String::from_utf8_lossy(&chunk);
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.is_empty() || chunk == b"\n" {
                emit_line(node, stream, line);
            }
        }
    }

    Ok(captured)
}

/// Blocking counterpart of [`capture_async`] for synchronous backends.
pub fn capture_sync<R>(reader: R, node: &str, stream: StreamKind) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let debug = debug_enabled();
    let mut reader = BufReader::new(reader);
    let mut captured = Vec::new();
    let mut chunk = Vec::new();

    loop {
        chunk.clear();
        let n = reader.read_until(b'\n', &mut chunk)?;
        if n == 0 {
            break;
        }
        captured.extend_from_slice(&chunk);
        if debug {
            let line = String::from_utf8_lossy(&chunk);
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.is_empty() || chunk == b"\n" {
                emit_line(node, stream, line);
            }
        }
    }

    Ok(captured)
}

/// Stream an already-captured buffer line by line. Used by backends that
/// hand back whole buffers instead of readers.
pub fn emit_captured(node: &str, stream: StreamKind, captured: &[u8]) {
    if !debug_enabled() || captured.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(captured);
    for line in text.split('\n') {
        if !line.is_empty() {
            emit_line(node, stream, line.trim_end_matches('\r'));
        }
    }
}
