use bytes::{Bytes, BytesMut};

use crate::agents::StreamEvent;

pub const RECORD_DELIMITER: u8 = b'\n';

/// Written when an event cannot be serialized, so the stream still ends on a
/// well-formed terminal record.
const FALLBACK_ERROR_RECORD: &[u8] = b"{\"type\":\"error\",\"message\":\"Serialization error\"}\n";

// ============================================================================
// Stream Encoder
// ============================================================================

/// Turns events into line-delimited JSON records.
///
/// serde_json escapes control characters inside strings, so a record never
/// contains a raw delimiter before its trailing newline.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamEncoder;

impl StreamEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
        let mut record = serde_json::to_vec(event)?;
        record.push(RECORD_DELIMITER);
        Ok(Bytes::from(record))
    }

    /// Like [`encode`](Self::encode) but never fails.
    pub fn encode_or_error(&self, event: &StreamEvent) -> Bytes {
        match self.encode(event) {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to encode stream event: {}", e);
                Bytes::from_static(FALLBACK_ERROR_RECORD)
            }
        }
    }
}

// ============================================================================
// Line Buffer
// ============================================================================

/// Splits an arbitrarily chunked byte stream back into complete lines.
/// Partial lines (and partial UTF-8 sequences) are held until the delimiter
/// arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no delimiter.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed, without delimiters.
    /// Blank lines and lines that are not valid UTF-8 are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|b| *b == RECORD_DELIMITER)
        {
            let pos = self.scanned + offset;
            let line = self.pending.split_to(pos + 1);
            self.scanned = 0;
            if let Some(text) = Self::decode(&line[..pos]) {
                lines.push(text);
            }
        }
        self.scanned = self.pending.len();
        lines
    }

    /// Returns the unterminated remainder, if any.
    pub fn finish(self) -> Option<String> {
        Self::decode(&self.pending)
    }

    fn decode(raw: &[u8]) -> Option<String> {
        match std::str::from_utf8(raw) {
            Ok(text) => {
                let text = text.trim_end_matches('\r');
                if text.trim().is_empty() {
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                log::debug!("Dropping non UTF-8 line: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRole, Delta};

    #[test]
    fn test_record_is_single_line() {
        let encoder = StreamEncoder::new();
        let event = StreamEvent::AgentDelta(Delta::partial(
            AgentRole::PositiveAdvocate,
            "line one\nline two\r\n",
        ));
        let record = encoder.encode(&event).unwrap();

        assert_eq!(record.last(), Some(&RECORD_DELIMITER));
        let body = &record[..record.len() - 1];
        assert!(!body.contains(&RECORD_DELIMITER));

        let parsed: StreamEvent = serde_json::from_slice(body).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_non_ascii_is_kept_verbatim() {
        let encoder = StreamEncoder::new();
        let event = StreamEvent::SynthesisDelta(Delta::partial(AgentRole::Synthesizer, "統合"));
        let record = encoder.encode(&event).unwrap();
        assert!(std::str::from_utf8(&record).unwrap().contains("統合"));
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"type\":\"st").is_empty());
        assert_eq!(buffer.push(b"art\"}\n{\"type\""), vec!["{\"type\":\"start\"}"]);
        assert_eq!(
            buffer.push(b":\"complete\"}\n\n"),
            vec!["{\"type\":\"complete\"}"]
        );
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_split_utf8() {
        let text = "統合\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..2]).is_empty());
        assert_eq!(buffer.push(&text[2..]), vec!["統合"]);
    }

    #[test]
    fn test_line_buffer_scans_each_byte_once() {
        let mut buffer = LineBuffer::new();
        for _ in 0..1000 {
            assert!(buffer.push(b"a").is_empty());
            assert_eq!(buffer.scanned, buffer.pending.len());
        }

        let lines = buffer.push(b"\nbb");
        assert_eq!(lines, vec!["a".repeat(1000)]);
        assert_eq!(buffer.scanned, 2);
        assert_eq!(buffer.push(b"b\n"), vec!["bbb"]);
        assert_eq!(buffer.scanned, 0);
    }

    #[test]
    fn test_line_buffer_remainder() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{\"done\":true}");
        assert_eq!(buffer.finish().as_deref(), Some("{\"done\":true}"));
    }
}
