use smallvec::SmallVec;

use crate::error::StreamError;

/// Incremental UTF-8 decoder for transport chunks.
///
/// A multi-byte character split across chunk boundaries is held back (at most
/// three bytes) and completed by the next chunk. Only bytes that can never
/// form valid UTF-8 are reported as errors.
#[derive(Debug, Default)]
pub struct ByteDecoder {
    pending: SmallVec<[u8; 4]>,
}

impl ByteDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk, returning all text that is complete so far.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] on malformed UTF-8.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, StreamError> {
        let mut out = String::with_capacity(chunk.len() + self.pending.len());
        self.decode_into(chunk, &mut out)?;
        Ok(out)
    }

    /// Decode one chunk, appending complete text to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] on malformed UTF-8.
    pub fn decode_into(&mut self, chunk: &[u8], out: &mut String) -> Result<(), StreamError> {
        let mut rest = chunk;

        if !self.pending.is_empty() {
            let width = sequence_width(self.pending[0]);
            let take = width.saturating_sub(self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                }
                // Still short of the full sequence; `rest` is exhausted here.
                Err(e) if e.error_len().is_none() => return Ok(()),
                Err(_) => return Err(malformed(&self.pending)),
            }
        }

        match std::str::from_utf8(rest) {
            Ok(text) => out.push_str(text),
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&rest[..valid_up_to]) };
                out.push_str(text);
                if e.error_len().is_some() {
                    return Err(malformed(&rest[valid_up_to..]));
                }
                self.pending.extend_from_slice(&rest[valid_up_to..]);
            }
        }
        Ok(())
    }

    /// Number of bytes held back waiting for the rest of a character.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// End of input. Returns how many bytes of an unfinished character were
    /// discarded; a cut-off tail is not malformed, so this never fails.
    pub fn finish(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

#[inline]
fn sequence_width(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

fn malformed(bytes: &[u8]) -> StreamError {
    let shown = &bytes[..bytes.len().min(4)];
    StreamError::Decode(format!("invalid UTF-8 sequence {shown:02x?}"))
}
