//! Incremental decoding of a streamed response body into text lines.
//!
//! Network reads do not respect character or record boundaries: a multi-byte
//! UTF-8 sequence or an NDJSON record may be split across any number of
//! batches. [`LineDecoder`] hides this by holding back whatever has not formed a
//! complete line yet.
//!
//! ```
//! use asset_assistant::assistant::decoder::LineDecoder;
//!
//! let mut decoder = LineDecoder::new();
//! assert!(decoder.push(b"{\"type\":\"it").is_empty());
//! assert_eq!(decoder.push(b"em\"}\n{\"ty"), vec![r#"{"type":"item"}"#]);
//! assert_eq!(decoder.finish().as_deref(), Some(r#"{"ty"#));
//! ```

use std::str;

/// Streaming UTF-8 decoder.
///
/// Bytes of a character cut at a batch boundary are kept until the next batch
/// completes them. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` together with any tail held back from the previous call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = start + err.valid_up_to();
                    if let Ok(prefix) = str::from_utf8(&self.pending[start..valid_up_to]) {
                        text.push_str(prefix);
                    }
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_up_to + len;
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            start = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        text
    }

    /// Flushes a dangling incomplete sequence, if any, as U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Splits a byte stream into `\n`-terminated lines.
///
/// Lines are emitted without their terminator and without any other
/// processing; blank lines are emitted too and left to the consumer to skip.
#[derive(Debug, Default)]
pub struct LineDecoder {
    utf8: Utf8Decoder,
    buffer: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one batch of bytes and returns every line it completed.
    ///
    /// The last candidate after splitting is possibly incomplete while more data
    /// is expected, so it stays in the buffer.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(bytes);
        self.buffer.push_str(&text);
        self.drain_complete_lines()
    }

    /// Ends the stream and returns the trailing remainder.
    ///
    /// The wire format does not guarantee a final terminator, so whatever is
    /// left is a record in its own right. Returns `None` when nothing is left.
    pub fn finish(mut self) -> Option<String> {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }

    fn drain_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);
        complete[..last_newline]
            .split('\n')
            .map(str::to_owned)
            .collect()
    }
}
