use memchr::memchr;

const COMPACT_THRESHOLD: usize = 8 * 1024;

/// Splits decoded text into complete `\n`-terminated lines.
///
/// The terminator (and a preceding `\r`) is stripped. A trailing partial line
/// stays buffered until a later fragment completes it.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: String,
    read_offset: usize,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decoded text fragment.
    pub fn push(&mut self, text: &str) {
        self.compact();
        self.buffer.push_str(text);
    }

    /// Next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<&str> {
        let start = self.read_offset;
        let rel_pos = memchr(b'\n', &self.buffer.as_bytes()[start..])?;
        let line_end = start + rel_pos;
        self.read_offset = line_end + 1;

        let line = &self.buffer[start..line_end];
        Some(line.strip_suffix('\r').unwrap_or(line))
    }

    /// Text after the last complete line.
    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.buffer[self.read_offset..]
    }

    /// Take the unterminated tail at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.remainder().to_string();
        self.buffer.clear();
        self.read_offset = 0;
        (!tail.is_empty()).then_some(tail)
    }

    fn compact(&mut self) {
        if self.read_offset == 0 {
            return;
        }
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset >= self.buffer.len() / 2
            || self.read_offset >= COMPACT_THRESHOLD;
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }
}
