//! Event Stream Frame Decoder
//!
//! Incremental decoder for the server-sent event wire format:
//!
//! ```text
//! : heartbeat
//!
//! event: message
//! id: 42
//! data: {"event_type":"card_updated","ticker":"NVDA"}
//!
//! ```
//!
//! Lines end in LF or CRLF; a blank line terminates a frame. Chunks may split
//! lines (and UTF-8 sequences) anywhere.

use std::time::Duration;

/// Longest line accepted before the stream is considered broken.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Default event name.
pub const DEFAULT_EVENT: &str = "message";

/// Decoder errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A line exceeded [`MAX_LINE_BYTES`].
    #[error("event stream line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// One decoded frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFrame {
    /// `event:` name.
    pub event: Option<String>,
    /// `id:` value.
    pub id: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: Option<String>,
    /// Comment lines joined with `\n`.
    pub comment: Option<String>,
    /// `retry:` reconnection hint.
    pub retry: Option<Duration>,
}

impl StreamFrame {
    /// Event name, defaulting to `message`.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT)
    }

    /// Whether the frame uses the default event name.
    #[must_use]
    pub fn is_default_event(&self) -> bool {
        self.event_name() == DEFAULT_EVENT
    }

    /// Comment-only frame.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        self.comment.is_some() && self.event.is_none() && self.data.is_none()
    }

    const fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.id.is_none()
            && self.data.is_none()
            && self.comment.is_none()
            && self.retry.is_none()
    }

    fn apply(&mut self, line: &str) {
        if let Some(comment) = line.strip_prefix(':') {
            let comment = comment.strip_prefix(' ').unwrap_or(comment);
            append(&mut self.comment, comment);
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => append(&mut self.data, value),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok().map(Duration::from_millis);
                }
            }
            _ => {}
        }
    }
}

fn append(slot: &mut Option<String>, value: &str) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(value);
        }
        None => *slot = Some(value.to_string()),
    }
}

/// Buffers raw chunks and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    current: StreamFrame,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::LineTooLong`] when a line grows past the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamFrame>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw);

            if line.is_empty() {
                let frame = std::mem::take(&mut self.current);
                if !frame.is_empty() {
                    frames.push(frame);
                }
            } else {
                self.current.apply(&line);
            }
            start = end + 1;
        }

        self.buffer.drain(..start);
        if self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            return Err(FrameError::LineTooLong(MAX_LINE_BYTES));
        }
        Ok(frames)
    }
}
