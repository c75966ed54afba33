//! Newline framing for serial streams.

/// Lines longer than this are dropped whole.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Splits a byte stream on `\n`, buffering partial lines across chunks.
/// A trailing `\r` is stripped and empty lines are skipped.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line: usize,
    overflowed: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}

impl LineFramer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line: max_line.max(1),
            overflowed: false,
        }
    }

    /// Feed a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.buf);
                if std::mem::take(&mut self.overflowed) {
                    tracing::warn!(max = self.max_line, "oversized serial line dropped");
                    continue;
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if !line.is_empty() {
                    lines.push(line);
                }
            } else if !self.overflowed {
                self.buf.push(byte);
                if self.buf.len() > self.max_line {
                    self.buf.clear();
                    self.overflowed = true;
                }
            }
        }
        lines
    }

    /// Bytes waiting for their newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_across_chunks() {
        let mut f = LineFramer::default();
        assert!(f.push(b"12.").is_empty());
        assert_eq!(f.pending(), 3);
        assert_eq!(f.push(b"5\r\nhello\n\nwor"), vec![b"12.5".to_vec(), b"hello".to_vec()]);
        assert_eq!(f.push(b"ld\n"), vec![b"world".to_vec()]);
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn oversized_line_is_dropped_and_stream_recovers() {
        let mut f = LineFramer::new(4);
        assert!(f.push(b"abcdefgh").is_empty());
        assert!(f.push(b"ij\nok\n") == vec![b"ok".to_vec()]);
    }
}
