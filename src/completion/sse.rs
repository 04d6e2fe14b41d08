//! Incremental Server-Sent Events decoder.
//!
//! Bytes are pushed in whatever chunks the network delivers; complete events
//! are popped as their `data` payload. An event is only decoded once its
//! terminating blank line has arrived, so multi-byte UTF-8 sequences split
//! across chunks are reassembled before decoding.

use std::str::Utf8Error;

/// Longest event delimiter (`\r\n\r\n`) minus one: a delimiter can straddle
/// the end of the already-scanned region by at most this many bytes.
const DELIMITER_OVERLAP: usize = 3;

/// Buffers raw bytes and yields the `data` payload of each complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched without finding a delimiter.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete event carrying data. Events with no `data:`
    /// field (comments, keep-alives) are skipped. Multiple `data:` lines in
    /// one event are joined with `\n`.
    ///
    /// An event that is not valid UTF-8 is consumed and reported as an error.
    pub fn next_event(&mut self) -> Result<Option<String>, Utf8Error> {
        loop {
            let from = self.scanned.saturating_sub(DELIMITER_OVERLAP);
            let Some((end, delimiter)) = find_boundary(&self.buffer, from) else {
                self.scanned = self.buffer.len();
                return Ok(None);
            };

            let raw: Vec<u8> = self.buffer.drain(..end + delimiter).collect();
            self.scanned = 0;
            let text = std::str::from_utf8(&raw[..end])?;

            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                .collect();

            if !data.is_empty() {
                return Ok(Some(data.join("\n")));
            }
        }
    }

    /// Bytes received but not yet part of a complete event.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

/// Position and length of the earliest event delimiter (`\n\n` or `\r\n\r\n`)
/// starting at or after `from`.
fn find_boundary(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let tail = buffer.get(from..)?;
    let lf = find(tail, b"\n\n").map(|i| (from + i, 2));
    let crlf = find(tail, b"\r\n\r\n").map(|i| (from + i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
