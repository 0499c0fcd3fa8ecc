use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Longest line handed to a sink in one piece. Longer lines are split.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Which standard stream of the task process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTag::Stdout => write!(f, "stdout"),
            StreamTag::Stderr => write!(f, "stderr"),
        }
    }
}

/// Receives every output line of every task process.
///
/// Called concurrently from the relays of both streams and of all running
/// tasks.
pub trait LogSink: Send + Sync + 'static {
    fn line(&self, job_id: &str, stream: StreamTag, line: &str);
}

/// Forwards task output to `tracing` under the `task_output` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn line(&self, job_id: &str, stream: StreamTag, line: &str) {
        match stream {
            StreamTag::Stdout => {
                tracing::info!(target: "task_output", job_id, stream = %stream, "{}", line)
            }
            StreamTag::Stderr => {
                tracing::warn!(target: "task_output", job_id, stream = %stream, "{}", line)
            }
        }
    }
}

/// Read `reader` to the end, handing each line to `sink`.
///
/// Lines are split on `\n` with a trailing `\r` removed. Invalid UTF-8 is
/// replaced rather than dropped, and a last line without a newline is still
/// delivered. Lines longer than [`MAX_LINE_BYTES`] are delivered in pieces.
pub async fn relay_lines<R>(reader: R, job_id: Arc<str>, stream: StreamTag, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    relay_lines_capped(reader, job_id, stream, sink, MAX_LINE_BYTES).await
}

/// [`relay_lines`] with an explicit cap on the bytes buffered per line.
pub async fn relay_lines_capped<R>(
    reader: R,
    job_id: Arc<str>,
    stream: StreamTag,
    sink: Arc<dyn LogSink>,
    max_line_bytes: usize,
) where
    R: AsyncRead + Unpin,
{
    let limit = max_line_bytes.max(1) as u64;
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    // The previous piece was cut at the cap, so a bare newline now only ends it.
    let mut continued = false;

    loop {
        buf.clear();
        match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    if continued && buf.is_empty() {
                        continued = false;
                        continue;
                    }
                    continued = false;
                } else {
                    continued = n as u64 == limit;
                }
                sink.line(&job_id, stream, &String::from_utf8_lossy(&buf));
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, stream = %stream, error = %e, "Failed to read task output");
                break;
            }
        }
    }
}
