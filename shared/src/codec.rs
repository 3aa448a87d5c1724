//! Newline-delimited codec for the device link
//!
//! Every application message travels as one line of UTF-8 JSON:
//! ```text
//! {"type":"light","level":300}\n
//! ```
//!
//! The decoder tolerates `\r\n` line endings and keeps the trailing partial
//! line as carry until the rest of it arrives.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Line delimiter terminating every frame on the wire
pub const LINE_DELIMITER: u8 = b'\n';

/// Maximum length of a single line (64 KiB) to bound the carry buffer
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Line too long: {0} bytes without a delimiter (max: {MAX_LINE_LEN})")]
    LineTooLong(usize),

    #[error("Payload contains a raw line delimiter")]
    EmbeddedDelimiter,

    #[error("Frame is not a JSON object with a `type` field")]
    MissingType,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One complete line received from the device, delimiter stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    text: String,
}

impl Frame {
    /// Create a frame from a line of text
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The raw line
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse the line as JSON
    pub fn parse(&self) -> Result<Value, CodecError> {
        Ok(serde_json::from_str(&self.text)?)
    }

    /// Parse the line and read its `type` discriminant
    pub fn parse_typed(&self) -> Result<(String, Value), CodecError> {
        let value = self.parse()?;
        let kind = discriminant(&value)
            .ok_or(CodecError::MissingType)?
            .to_string();
        Ok((kind, value))
    }

    /// Consume the frame, returning the line
    pub fn into_text(self) -> String {
        self.text
    }
}

/// Read the `type` field of a JSON object
pub fn discriminant(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Serialize a message and terminate it with the line delimiter
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(message)?;
    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.extend_from_slice(&json);
    buf.put_u8(LINE_DELIMITER);
    Ok(buf.freeze())
}

/// Terminate an already-serialized payload with the line delimiter
pub fn encode_text(payload: &str) -> Result<Bytes, CodecError> {
    if payload.as_bytes().contains(&LINE_DELIMITER) {
        return Err(CodecError::EmbeddedDelimiter);
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload.as_bytes());
    buf.put_u8(LINE_DELIMITER);
    Ok(buf.freeze())
}

/// Serialized size of a message, without the delimiter
pub fn encoded_len<T: Serialize + ?Sized>(message: &T) -> Result<usize, CodecError> {
    Ok(serde_json::to_vec(message)?.len())
}

/// Streaming line decoder with a partial-line carry buffer
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_line_len: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }

    /// Create a decoder with a custom line length bound
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            max_line_len,
        }
    }

    /// Add received bytes to the carry buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete line
    ///
    /// Blank lines are skipped. Call this repeatedly until it returns
    /// `Ok(None)` to drain all complete frames. An over-long partial line is
    /// discarded and reported once as `LineTooLong`.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == LINE_DELIMITER) else {
                if self.buffer.len() > self.max_line_len {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Err(CodecError::LineTooLong(len));
                }
                return Ok(None);
            };

            let line = self.buffer.split_to(pos + 1);
            let mut end = pos;
            if end > 0 && line[end - 1] == b'\r' {
                end -= 1;
            }

            let text = String::from_utf8_lossy(&line[..end]);
            if text.trim().is_empty() {
                continue;
            }
            return Ok(Some(Frame::new(text.into_owned())));
        }
    }

    /// Take the carry as a frame if it already holds a complete JSON object
    ///
    /// Some peers send one object per notification without a delimiter.
    pub fn take_complete_object(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buffer);
        let trimmed = text.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(_)) => {
                let frame = Frame::new(trimmed.to_string());
                self.buffer.clear();
                Some(frame)
            }
            _ => None,
        }
    }

    /// Get the current carry length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any carried partial line
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn drain(decoder: &mut LineDecoder) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode_next().expect("decode error") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let encoded = encode(&json!({"type": "get_light"})).expect("encode failed");
        assert_eq!(&encoded[..], b"{\"type\":\"get_light\"}\n");
    }

    #[test]
    fn test_encode_text_rejects_embedded_delimiter() {
        assert!(matches!(
            encode_text("{\"a\":1}\n{\"b\":2}"),
            Err(CodecError::EmbeddedDelimiter)
        ));
        let encoded = encode_text("{\"type\":\"config\"}").expect("encode failed");
        assert_eq!(encoded.last(), Some(&LINE_DELIMITER));
    }

    #[test]
    fn test_partial_line_is_carried() {
        let mut decoder = LineDecoder::new();

        decoder.extend(b"{\"type\":\"light\",\"le");
        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.buffer_len(), 19);

        decoder.extend(b"vel\":300}\n");
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);

        let (kind, value) = frames[0].parse_typed().expect("parse failed");
        assert_eq!(kind, "light");
        assert_eq!(value["level"], 300);
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"first\r\n\r\n  \nsecond\npartial");

        let frames = drain(&mut decoder);
        let texts: Vec<&str> = frames.iter().map(Frame::text).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(decoder.buffer_len(), "partial".len());
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        let line = "{\"type\":\"status\",\"message\":\"prêt\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).expect("no multibyte") + 1;

        let mut decoder = LineDecoder::new();
        decoder.extend(&line[..split]);
        assert!(drain(&mut decoder).is_empty());
        decoder.extend(&line[split..]);

        let frames = drain(&mut decoder);
        assert_eq!(frames[0].parse().expect("parse failed")["message"], "prêt");
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = LineDecoder::with_max_line_len(8);
        decoder.extend(b"0123456789");
        assert!(matches!(
            decoder.decode_next(),
            Err(CodecError::LineTooLong(10))
        ));
        assert_eq!(decoder.buffer_len(), 0);

        decoder.extend(b"ok\n");
        assert_eq!(drain(&mut decoder)[0].text(), "ok");
    }

    #[test]
    fn test_take_complete_object() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"type\":\"light\",");
        assert!(decoder.take_complete_object().is_none());

        decoder.extend(b"\"level\":12}");
        let frame = decoder.take_complete_object().expect("object not flushed");
        assert_eq!(frame.text(), "{\"type\":\"light\",\"level\":12}");
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_missing_type() {
        let frame = Frame::new("{\"level\":3}");
        assert!(matches!(frame.parse_typed(), Err(CodecError::MissingType)));

        let frame = Frame::new("[LIGHT] Level: 3");
        assert!(matches!(frame.parse_typed(), Err(CodecError::Json(_))));
    }

    proptest! {
        #[test]
        fn prop_split_invariance(
            lines in proptest::collection::vec("[a-z0-9{}:\",]{1,40}", 1..8),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let stream: Vec<u8> = lines
                .iter()
                .flat_map(|l| l.bytes().chain(std::iter::once(LINE_DELIMITER)))
                .collect();

            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
            points.sort_unstable();
            points.dedup();

            let mut decoder = LineDecoder::new();
            let mut frames = Vec::new();
            let mut start = 0;
            for point in points.into_iter().chain(std::iter::once(stream.len())) {
                decoder.extend(&stream[start..point]);
                frames.extend(drain(&mut decoder));
                start = point;
            }

            let texts: Vec<String> = frames.into_iter().map(Frame::into_text).collect();
            prop_assert_eq!(texts, lines);
            prop_assert_eq!(decoder.buffer_len(), 0);
        }
    }
}
