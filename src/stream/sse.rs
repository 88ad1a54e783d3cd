//! Incremental Server-Sent-Events intake parser.
//!
//! Feed it text chunks arriving on arbitrary byte boundaries and it yields
//! assembled [`SseEvent`] frames, following the SSE field rules: `data:`
//! lines accumulate (joined with `\n`), `event:` names the frame, `id:`
//! tags it, comment lines starting with `:` and `retry:` hints are
//! ignored, a blank line dispatches the frame, and CRLF line endings are
//! tolerated.

use memchr::memchr_iter;

use super::SseEvent;

/// Incremental SSE line parser with an internal carry buffer.
pub struct SseParser {
    buf: String,
    consumed: usize,
    event_type: Option<String>,
    last_id: Option<String>,
    data: String,
    has_data: bool,
}

// Compact the carry buffer once this much has been consumed.
const COMPACT_THRESHOLD: usize = 4 * 1024;

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            consumed: 0,
            event_type: None,
            last_id: None,
            data: String::new(),
            has_data: false,
        }
    }

    /// Feed raw text and return any complete events parsed.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text, appending complete events to `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buf.push_str(chunk);

        let mut line_start = self.consumed;
        let bytes = self.buf.as_bytes();
        for rel in memchr_iter(b'\n', &bytes[self.consumed..]) {
            let line_end = self.consumed + rel + 1;
            let mut line = &self.buf[line_start..line_end - 1];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::handle_line(
                line,
                &mut self.event_type,
                &mut self.last_id,
                &mut self.data,
                &mut self.has_data,
                out,
            );
            line_start = line_end;
        }

        self.consumed = line_start;
        if self.consumed == self.buf.len() {
            self.buf.clear();
            self.consumed = 0;
        } else if self.consumed >= COMPACT_THRESHOLD {
            self.buf.drain(..self.consumed);
            self.consumed = 0;
        }
    }

    fn handle_line(
        line: &str,
        event_type: &mut Option<String>,
        last_id: &mut Option<String>,
        data: &mut String,
        has_data: &mut bool,
        out: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                out.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data),
                    id: last_id.clone(),
                });
                *has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if *has_data {
                    data.push('\n');
                } else {
                    *has_data = true;
                }
                data.push_str(value);
            }
            "event" => *event_type = Some(value.to_string()),
            "id" => *last_id = Some(value.to_string()),
            // retry and unknown fields are ignored
            _ => {}
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed raw bytes through `parser`, carrying incomplete UTF-8 sequences
/// across chunk boundaries in `carry`.
pub(crate) fn feed_utf8(
    parser: &mut SseParser,
    carry: &mut Vec<u8>,
    bytes: &[u8],
    out: &mut Vec<SseEvent>,
) {
    if carry.is_empty() {
        match std::str::from_utf8(bytes) {
            Ok(text) => parser.feed_into(text, out),
            Err(err) => {
                let valid = err.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&bytes[..valid]) {
                    parser.feed_into(text, out);
                }
                carry.extend_from_slice(&bytes[valid..]);
            }
        }
        return;
    }

    carry.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(carry) {
        Ok(_) => carry.len(),
        Err(err) => err.valid_up_to(),
    };
    if valid > 0 {
        if let Ok(text) = std::str::from_utf8(&carry[..valid]) {
            parser.feed_into(text, out);
        }
        carry.drain(..valid);
    }
}
