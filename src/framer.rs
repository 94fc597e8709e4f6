/// Incremental byte/line framer.
///
/// Turns a raw chunk stream (bytes or text, arriving at arbitrary
/// boundaries) into discrete logical lines. Handles `\r\n`, `\n` and `\r`
/// line separators, a `\r\n` pair split across two chunks, and multi-byte
/// UTF-8 sequences split across chunks.
use memchr::memchr2;
use smallvec::SmallVec;
use std::borrow::Cow;

/// Lines produced by one `decode` call. Most chunks carry only a few.
pub type Lines = SmallVec<[String; 4]>;

/// Incremental line decoder.
///
/// Feed chunks through [`LineDecoder::decode`] (or
/// [`LineDecoder::decode_str`]) and call [`LineDecoder::flush`] exactly once
/// after the chunk source is exhausted, otherwise a final unterminated line
/// is lost.
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line text not yet terminated by a separator.
    buffer: String,
    /// The previous chunk ended exactly on `\r`; it may be the first half of
    /// a `\r\n` pair spanning into the next chunk.
    trailing_cr: bool,
    /// Trailing bytes of an incomplete UTF-8 sequence from the previous
    /// binary chunk.
    utf8_remainder: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a binary chunk into complete lines.
    ///
    /// Bytes are decoded as UTF-8; an incomplete multi-byte sequence at the
    /// end of the chunk is held back and stitched onto the next chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> Lines {
        if chunk.is_empty() && self.utf8_remainder.is_empty() {
            return Lines::new();
        }

        let data: Cow<'_, [u8]> = if self.utf8_remainder.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.utf8_remainder);
            joined.extend_from_slice(chunk);
            Cow::Owned(joined)
        };

        match std::str::from_utf8(&data) {
            Ok(text) => self.decode_str(text),
            Err(e) if e.error_len().is_none() => {
                let valid_up_to = e.valid_up_to();
                self.utf8_remainder = data[valid_up_to..].to_vec();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&data[..valid_up_to]) };
                self.decode_str(text)
            }
            Err(_) => {
                // Invalid bytes that cannot be completed by more input.
                let text = String::from_utf8_lossy(&data).into_owned();
                self.decode_str(&text)
            }
        }
    }

    /// Decode a text chunk into complete lines.
    pub fn decode_str(&mut self, chunk: &str) -> Lines {
        let mut out = Lines::new();

        let mut text: Cow<'_, str> = if self.trailing_cr {
            // Reattach the held-back carriage return so a spanning `\r\n`
            // pair collapses into one separator.
            self.trailing_cr = false;
            let mut joined = String::with_capacity(chunk.len() + 1);
            joined.push('\r');
            joined.push_str(chunk);
            Cow::Owned(joined)
        } else {
            Cow::Borrowed(chunk)
        };
        if text.is_empty() {
            return out;
        }
        if text.ends_with('\r') {
            self.trailing_cr = true;
            let held = text.len() - 1;
            text = match text {
                Cow::Borrowed(s) => Cow::Borrowed(&s[..held]),
                Cow::Owned(mut s) => {
                    s.truncate(held);
                    Cow::Owned(s)
                }
            };
        }
        if text.is_empty() {
            return out;
        }

        let bytes = text.as_bytes();
        let mut segments: SmallVec<[&str; 8]> = SmallVec::new();
        let mut start = 0usize;
        let mut pos = 0usize;
        while let Some(rel) = memchr2(b'\n', b'\r', &bytes[pos..]) {
            let sep = pos + rel;
            segments.push(&text[start..sep]);
            pos = sep + 1;
            if bytes[sep] == b'\r' && bytes.get(pos) == Some(&b'\n') {
                pos += 1;
            }
            start = pos;
        }
        let tail = if start < bytes.len() {
            Some(&text[start..])
        } else {
            None
        };

        if segments.is_empty() {
            if let Some(tail) = tail {
                self.buffer.push_str(tail);
            }
            return out;
        }

        let mut segments = segments.into_iter();
        // First complete line absorbs any previously buffered partial text.
        if let Some(first) = segments.next() {
            if self.buffer.is_empty() {
                out.push(first.to_string());
            } else {
                let mut line = std::mem::take(&mut self.buffer);
                line.push_str(first);
                out.push(line);
            }
        }
        for segment in segments {
            out.push(segment.to_string());
        }
        if let Some(tail) = tail {
            self.buffer = tail.to_string();
        }
        out
    }

    /// Emit any residual buffered partial line and clear state.
    ///
    /// Must be called once after the chunk source is exhausted. Returns the
    /// pending line even when it is empty but pending (e.g. a held-back
    /// trailing `\r`).
    pub fn flush(&mut self) -> Lines {
        let mut out = Lines::new();
        if self.buffer.is_empty() && !self.trailing_cr && self.utf8_remainder.is_empty() {
            return out;
        }
        if !self.utf8_remainder.is_empty() {
            let rest = String::from_utf8_lossy(&self.utf8_remainder).into_owned();
            self.buffer.push_str(&rest);
            self.utf8_remainder.clear();
        }
        out.push(std::mem::take(&mut self.buffer));
        self.trailing_cr = false;
        out
    }
}
