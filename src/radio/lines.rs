//! Incremental line framer for modem output.
//!
//! The modem prints `\r\n`-terminated text. Serial reads hand back arbitrary chunks, so bytes are
//! accumulated until a terminator shows up. Bare `\n` is accepted as a terminator too. A line that
//! grows past [`MAX_LINE_LEN`] without a terminator is discarded to resynchronize.
use bytes::{Buf, BytesMut};

/// Longest line kept. RYLR payloads top out at 240 bytes, so this leaves ample headroom.
pub const MAX_LINE_LEN: usize = 1024;

pub struct LineFramer {
    buf: BytesMut,
    overflowed: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            overflowed: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete, non-empty line with the terminator stripped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.buf.len() > MAX_LINE_LEN {
                    self.buf.clear();
                    self.overflowed = true;
                }
                return None;
            };
            let raw = self.buf.split_to(pos);
            self.buf.advance(1);
            if self.overflowed {
                // Tail of a line whose head was already dropped.
                self.overflowed = false;
                continue;
            }
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }
            return Some(line.to_string());
        }
    }

    /// Drain every complete line currently buffered.
    pub fn drain_lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line()).collect()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_across_chunks() {
        let mut framer = LineFramer::new();
        framer.push(b"+OK\r\n+RCV=1,6,AC");
        assert_eq!(framer.next_line().as_deref(), Some("+OK"));
        assert_eq!(framer.next_line(), None);
        framer.push(b"KREG,-40,10\r\n\r\n");
        assert_eq!(framer.next_line().as_deref(), Some("+RCV=1,6,ACKREG,-40,10"));
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut framer = LineFramer::new();
        framer.push(&vec![b'x'; MAX_LINE_LEN + 10]);
        assert_eq!(framer.next_line(), None);
        framer.push(b"tail\r\n+READY\r\n");
        assert_eq!(framer.drain_lines(), vec!["+READY".to_string()]);
    }
}
