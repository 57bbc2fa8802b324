//! Event-stream framing: decoded text in, complete frames out.
//!
//! Frames are runs of `field: value` lines terminated by a blank line. The
//! parser keeps unterminated text between calls, so a frame split across any
//! number of network chunks comes out exactly as if it had arrived whole.

use tracing::trace;

const BOM: char = '\u{FEFF}';

/// One complete event-stream frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Value of the `event:` line, if the frame had one.
    pub event: Option<String>,
    /// All `data:` lines of the frame, joined with `\n`.
    pub data: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl Frame {
    /// Convenience constructor used by tests and relays.
    pub fn new(event: Option<&str>, data: &str) -> Self {
        Self {
            event: event.map(str::to_string),
            data: Some(data.to_string()),
            ..Self::default()
        }
    }

    fn has_fields(&self) -> bool {
        self.event.is_some() || self.data.is_some() || self.id.is_some() || self.retry.is_some()
    }

    /// Apply one non-blank line. Unknown fields and comments are ignored.
    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            trace!(line, "ignoring comment line");
            return;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match name {
            // An empty event name means the default (untyped) event.
            "event" => self.event = (!value.is_empty()).then(|| value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            other => trace!(field = other, "ignoring unrecognized field"),
        }
    }
}

/// Incremental frame parser.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Text not yet terminated by a line break.
    buffer: String,
    /// Fields collected for the frame currently being built.
    pending: Frame,
    started: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next decoded fragment and return every frame it completes.
    pub fn feed(&mut self, text: &str) -> Vec<Frame> {
        let mut text = text;
        if !self.started && !text.is_empty() {
            text = text.strip_prefix(BOM).unwrap_or(text);
            self.started = true;
        }
        self.buffer.push_str(text);

        let mut frames = Vec::new();
        let mut consumed = 0;

        loop {
            let rest = &self.buffer[consumed..];
            let Some(pos) = rest.find(&['\r', '\n'][..]) else {
                break;
            };

            let terminator_len = if rest.as_bytes()[pos] == b'\r' {
                match rest.as_bytes().get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // A trailing `\r` may be the first half of `\r\n`.
                    None => break,
                }
            } else {
                1
            };

            let line = &rest[..pos];
            if line.is_empty() {
                if self.pending.has_fields() {
                    frames.push(std::mem::take(&mut self.pending));
                }
            } else {
                self.pending.apply_line(line);
            }
            consumed += pos + terminator_len;
        }

        self.buffer.drain(..consumed);
        frames
    }

    /// End of input. An unterminated trailing frame carries no usable text
    /// and is dropped; returns whether anything was discarded.
    pub fn finish(&mut self) -> bool {
        let dropped = !self.buffer.is_empty() || self.pending.has_fields();
        if dropped {
            trace!(
                buffered = self.buffer.len(),
                "dropping unterminated frame at end of stream"
            );
        }
        self.buffer.clear();
        self.pending = Frame::default();
        dropped
    }

    /// Bytes of text held while waiting for a line break.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
