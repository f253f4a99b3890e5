//! Newline-delimited JSON framing for streaming responses.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

const LINE_PREVIEW_CHARS: usize = 120;

/// Turns arbitrarily split byte fragments into one JSON record per `\n`-terminated line.
///
/// Buffering is byte-level, so a UTF-8 sequence split across two fragments is only
/// decoded once its line is complete. A malformed line is skipped and counted; it
/// never aborts the stream. One decoder serves exactly one response body.
#[derive(Debug)]
pub struct StreamDecoder<T> {
    buffer: Vec<u8>,
    // Bytes before this offset are known to hold no newline.
    scanned: usize,
    decoded_records: u64,
    skipped_lines: u64,
    _record: PhantomData<fn() -> T>,
}

/// Counters reported once the underlying stream has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderSummary {
    pub decoded_records: u64,
    pub skipped_lines: u64,
    pub discarded_trailing_bytes: usize,
}

impl<T> Default for StreamDecoder<T>
where
    T: DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamDecoder<T>
where
    T: DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            decoded_records: 0,
            skipped_lines: 0,
            _record: PhantomData,
        }
    }

    /// Appends `fragment` and returns every record completed by it, in stream order.
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<T> {
        self.buffer.extend_from_slice(fragment);

        let mut records = Vec::new();
        let mut line_start = 0;
        let mut cursor = self.scanned;

        while let Some(offset) = self.buffer[cursor..].iter().position(|byte| *byte == b'\n') {
            let line_end = cursor + offset;
            let line = self.buffer[line_start..line_end].trim_ascii();

            if !line.is_empty() {
                match serde_json::from_slice::<T>(line) {
                    Ok(record) => {
                        self.decoded_records += 1;
                        records.push(record);
                    }
                    Err(error) => {
                        self.skipped_lines += 1;
                        tracing::warn!(
                            error = %error,
                            line = %line_preview(line),
                            skipped_lines = self.skipped_lines,
                            "skipping malformed stream line"
                        );
                    }
                }
            }

            line_start = line_end + 1;
            cursor = line_start;
        }

        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();
        records
    }

    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    pub fn decoded_records(&self) -> u64 {
        self.decoded_records
    }

    /// Bytes waiting for a terminating newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Ends the stream. A trailing line without `\n` is incomplete and is dropped unparsed.
    pub fn finish(self) -> DecoderSummary {
        let discarded_trailing_bytes = self.buffer.len();
        if discarded_trailing_bytes > 0 {
            tracing::debug!(
                discarded_trailing_bytes,
                "discarding unterminated trailing stream line"
            );
        }

        DecoderSummary {
            decoded_records: self.decoded_records,
            skipped_lines: self.skipped_lines,
            discarded_trailing_bytes,
        }
    }
}

fn line_preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    if text.chars().count() <= LINE_PREVIEW_CHARS {
        return text.into_owned();
    }

    let mut preview = text.chars().take(LINE_PREVIEW_CHARS).collect::<String>();
    preview.push('…');
    preview
}
