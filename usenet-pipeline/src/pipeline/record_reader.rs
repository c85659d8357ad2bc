//! Record splitting for child process output.
//!
//! The archiver and the uploader redraw their progress in place. rar uses
//! carriage returns, nyuu rewinds the cursor with `ESC[0G` and never emits a
//! newline until it is done. Reading with `lines()` would hold every progress
//! update back until exit, so records are cut at `\n`, `\r` and right before
//! each `ESC[0G`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Cursor-to-column-0 escape sequence.
const CURSOR_RESET: &[u8] = b"\x1b[0G";

/// Reads an async stream and yields trimmed, non-empty text records.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// `\n` or `\r` at this index; consumed with the record.
    Delimiter(usize),
    /// `ESC[0G` at this index; stays at the start of the next record.
    CursorReset(usize),
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Returns the next record, or `None` once the stream is exhausted.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(boundary) = find_boundary(&self.pending) {
                let record_bytes: Vec<u8> = match boundary {
                    Boundary::Delimiter(idx) => {
                        let bytes = self.pending.drain(..idx).collect();
                        consume_delimiters(&mut self.pending);
                        bytes
                    }
                    Boundary::CursorReset(idx) => self.pending.drain(..idx).collect(),
                };

                let record = String::from_utf8_lossy(&record_bytes).trim().to_string();
                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }

                let record = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();

                if record.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(record));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn find_boundary(buf: &[u8]) -> Option<Boundary> {
    let delimiter = buf.iter().position(|&b| matches!(b, b'\n' | b'\r'));
    // A reset at index 0 opens the current record rather than ending one.
    let reset = buf
        .windows(CURSOR_RESET.len())
        .skip(1)
        .position(|w| w == CURSOR_RESET)
        .map(|idx| idx + 1);

    match (delimiter, reset) {
        (Some(d), Some(r)) if r < d => Some(Boundary::CursorReset(r)),
        (Some(d), _) => Some(Boundary::Delimiter(d)),
        (None, Some(r)) => Some(Boundary::CursorReset(r)),
        (None, None) => None,
    }
}

fn consume_delimiters(buf: &mut Vec<u8>) {
    let n = buf
        .iter()
        .take_while(|&&b| matches!(b, b'\n' | b'\r'))
        .count();
    if n > 0 {
        buf.drain(..n);
    }
}
