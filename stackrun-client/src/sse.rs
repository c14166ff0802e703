//! Server-sent events decoding
//!
//! Only what the orchestrator emits is interpreted: `data` lines are joined
//! into one payload per event and `id` is kept. Comments (keep-alives) and
//! unknown fields are ignored.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub id: Option<String>,
    pub data: String,
}

/// Incremental decoder fed with raw body chunks
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one chunk and return every event it completed
    ///
    /// Chunks may split lines, or multi-byte characters, anywhere.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { id, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"id: 3\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                id: Some("3".to_string()),
                data: "{\"a\":1}".to_string()
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"da").is_empty());
        assert!(decoder.push(b"ta: hel").is_empty());
        assert!(decoder.push(b"lo\r\n").is_empty());
        let events = decoder.push(b"\r\ndata: next\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].id, None);
        assert_eq!(events[1].data, "next");
    }

    #[test]
    fn test_comments_and_multiline_data() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b":\n\n: keep-alive\n\ndata:one\ndata: two\nretry: 5\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn test_multibyte_character_split() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: é\n\n".as_bytes();
        let (head, tail) = bytes.split_at(7);
        assert!(decoder.push(head).is_empty());
        let events = decoder.push(tail);
        assert_eq!(events[0].data, "é");
    }
}
