//! Newline framing over raw stdout chunks
//!
//! The child writes one JSON document per line, but pipe reads cut the byte
//! stream at arbitrary points. The framer buffers bytes, so a multi-byte
//! UTF-8 character split across two reads is reassembled before decoding.

/// Accumulates stdout bytes and yields complete, trimmed, non-empty lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    ///
    /// The trailing partial segment stays buffered until a later chunk
    /// terminates it or [`finish`](Self::finish) flushes it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Flush the buffered remainder once stdout reaches end of stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }

    /// Bytes currently held back waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"type\":\"sys").is_empty());
        assert_eq!(framer.pending(), 12);

        let lines = framer.push(b"tem\"}\n{\"nex");
        assert_eq!(lines, vec!["{\"type\":\"system\"}"]);
        assert_eq!(framer.finish().as_deref(), Some("{\"nex"));
    }

    #[test]
    fn test_empty_and_whitespace_lines_skipped() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"\n   \n{\"x\":1}\r\n\n");
        assert_eq!(lines, vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let input = "{\"text\":\"héllo wörld ✓\"}\n{\"n\":2}\n{\"tail\":true}";
        let bytes = input.as_bytes();

        let mut whole = LineFramer::new();
        let mut expected = whole.push(bytes);
        expected.extend(whole.finish());

        for split in 1..bytes.len() {
            let mut framer = LineFramer::new();
            let mut lines = framer.push(&bytes[..split]);
            lines.extend(framer.push(&bytes[split..]));
            lines.extend(framer.finish());
            assert_eq!(lines, expected, "split at {split}");
        }

        let mut bytewise = LineFramer::new();
        let mut lines = Vec::new();
        for b in bytes {
            lines.extend(bytewise.push(std::slice::from_ref(b)));
        }
        lines.extend(bytewise.finish());
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_multibyte_split_is_reassembled() {
        let bytes = "{\"t\":\"✓\"}\n".as_bytes();
        // '✓' is three bytes; cut inside it
        let cut = bytes.iter().position(|b| *b == 0xE2).unwrap() + 1;

        let mut framer = LineFramer::new();
        assert!(framer.push(&bytes[..cut]).is_empty());
        assert_eq!(framer.push(&bytes[cut..]), vec!["{\"t\":\"✓\"}"]);
    }
}
