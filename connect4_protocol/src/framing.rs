// Newline-delimited framing over TCP.
//
// Every message on the wire is one line of UTF-8 terminated by `\n`. Writers
// append the delimiter and push the whole line with a single `write_all` so
// a line is never split across two writes. Readers feed raw socket bytes
// into a `LineBuffer`, which hands back complete lines and keeps the
// unterminated tail as carry-over for the next read.
//
// `MAX_LINE_LEN` (64 KiB) bounds the carry-over so a peer that never sends a
// newline cannot grow the buffer without limit. The largest real message is
// a few dozen bytes.

use std::io::{self, Write};

use thiserror::Error;

/// Upper bound on a single line (and on the unterminated carry-over).
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Number of bytes a connection reads from its socket per call.
pub const READ_CHUNK: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A line (or an unterminated fragment) exceeded `MAX_LINE_LEN`. The
    /// offending bytes have been discarded.
    #[error("line too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },
}

/// Write `payload` followed by a single `\n`, then flush.
pub fn write_line<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut line = Vec::with_capacity(payload.len() + 1);
    line.extend_from_slice(payload);
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

/// Accumulates socket bytes and splits them into lines.
///
/// Blank lines are skipped and a trailing `\r` is stripped, so CRLF peers
/// work too.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_len: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_LEN)
    }

    pub fn with_limit(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if any.
    ///
    /// Returns `None` when only an unterminated fragment (or nothing) is
    /// left. Returns `Some(Err(..))` once for each oversized line, after
    /// dropping it; further calls continue with whatever follows.
    pub fn next_line(&mut self) -> Option<Result<Vec<u8>, FramingError>> {
        loop {
            let Some(pos) = self.pending.iter().position(|&b| b == b'\n') else {
                if self.pending.len() > self.max_len {
                    let len = self.pending.len();
                    self.pending.clear();
                    return Some(Err(FramingError::LineTooLong {
                        len,
                        max: self.max_len,
                    }));
                }
                return None;
            };

            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_len {
                return Some(Err(FramingError::LineTooLong {
                    len: line.len(),
                    max: self.max_len,
                }));
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(Ok(line));
        }
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Take the unterminated fragment left when the stream closed. Returns
    /// `None` if it is empty or whitespace only.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        let trimmed = rest.trim_ascii();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_vec())
        }
    }
}
