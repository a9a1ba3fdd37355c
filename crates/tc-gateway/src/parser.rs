//! Line-delimited event stream parser.
//!
//! Reads raw terminal output, splits it on `\n` and decodes every line as an
//! independent JSON event. Bad lines are logged and skipped; a failing reader
//! simply ends the stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tc_types::event::AgentEvent;

/// Initial line buffer capacity. Lines grow past this without limit.
const INITIAL_LINE_CAPACITY: usize = 64 * 1024;

/// How much of a malformed line to include in the warning.
const LOG_PREVIEW_CHARS: usize = 120;

/// Counters describing one parsed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Non-blank lines seen.
    pub lines: usize,
    /// Events decoded and delivered.
    pub events: usize,
    /// Lines that were not valid JSON.
    pub malformed: usize,
}

/// Decode `reader` into events on `tx` until end of stream, a read error, or
/// the receiver going away.
pub async fn parse_stream<R>(reader: R, tx: &mpsc::Sender<AgentEvent>) -> ParseStats
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf: Vec<u8> = Vec::with_capacity(INITIAL_LINE_CAPACITY);
    let mut stats = ParseStats::default();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Event stream read ended: {e}");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        match AgentEvent::from_line(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    debug!("Event receiver dropped, stopping parser");
                    break;
                }
                stats.events += 1;
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(
                    "Skipping malformed event line ({e}): {}",
                    preview(line, LOG_PREVIEW_CHARS)
                );
            }
        }
    }

    debug!(
        "Event stream closed: lines={}, events={}, malformed={}",
        stats.lines, stats.events, stats.malformed
    );
    stats
}

fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
