//! Reassembling lines from arbitrarily chunked byte streams.

/// Longest line kept intact; longer runs are split at this many bytes.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// Incremental line splitter.
///
/// Output depends only on the byte sequence, never on how it was chunked.
/// Lines are trimmed (which also drops the `\r` a remote pty adds) and
/// blank lines are discarded.
#[derive(Debug)]
pub struct LineScanner {
    buf: Vec<u8>,
    max_line: usize,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl LineScanner {
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Feed a chunk, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        loop {
            let pending = &self.buf[start..];
            let window = pending.len().min(self.max_line + 1);
            if let Some(pos) = pending[..window].iter().position(|&b| b == b'\n') {
                push_trimmed(&mut lines, &pending[..pos]);
                start += pos + 1;
            } else if pending.len() > self.max_line {
                push_trimmed(&mut lines, &pending[..self.max_line]);
                start += self.max_line;
            } else {
                break;
            }
        }
        self.buf.drain(..start);
        lines
    }

    /// Bytes held back waiting for a terminator.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any unterminated partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

fn push_trimmed(out: &mut Vec<String>, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
