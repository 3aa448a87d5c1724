//! Firmware transfer session bookkeeping

use keypad_link_shared::ota::ENCODING_OVERHEAD;
use std::fmt;
use std::ops::Range;

/// Uploader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtaPhase {
    #[default]
    Idle,
    Starting,
    Transferring,
    Completing,
    Aborted,
}

impl fmt::Display for OtaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaPhase::Idle => write!(f, "Idle"),
            OtaPhase::Starting => write!(f, "Starting"),
            OtaPhase::Transferring => write!(f, "Transferring"),
            OtaPhase::Completing => write!(f, "Completing"),
            OtaPhase::Aborted => write!(f, "Aborted"),
        }
    }
}

/// One firmware transfer in progress
#[derive(Debug, Clone, PartialEq)]
pub struct OtaSession {
    pub filename: String,
    pub total_size: usize,
    pub chunk_size: usize,
    pub total_chunks: usize,
    /// Index of the next chunk to send
    pub current_index: usize,
    pub encoding_overhead: f64,
}

impl OtaSession {
    pub fn new(filename: impl Into<String>, total_size: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            filename: filename.into(),
            total_size,
            chunk_size,
            total_chunks: total_size.div_ceil(chunk_size),
            current_index: 0,
            encoding_overhead: ENCODING_OVERHEAD,
        }
    }

    /// Byte range of chunk `index` within the image
    pub fn chunk_range(&self, index: usize) -> Range<usize> {
        let start = (index * self.chunk_size).min(self.total_size);
        let end = (start + self.chunk_size).min(self.total_size);
        start..end
    }

    /// Range of the next chunk to send, if any remain
    pub fn next_chunk(&self) -> Option<Range<usize>> {
        (self.current_index < self.total_chunks).then(|| self.chunk_range(self.current_index))
    }

    pub fn advance(&mut self) {
        self.current_index = (self.current_index + 1).min(self.total_chunks);
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.total_chunks
    }

    /// Percentage of chunks sent, rounded
    pub fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        ((self.current_index as f64 / self.total_chunks as f64) * 100.0).round() as u8
    }

    /// Approximate size of the image once base64 encoded
    pub fn estimated_encoded_size(&self) -> usize {
        (self.total_size as f64 * self.encoding_overhead).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_rounds_up() {
        assert_eq!(OtaSession::new("a", 1000, 256).total_chunks, 4);
        assert_eq!(OtaSession::new("a", 1024, 256).total_chunks, 4);
        assert_eq!(OtaSession::new("a", 1, 256).total_chunks, 1);
    }

    #[test]
    fn test_ranges_cover_image() {
        let session = OtaSession::new("a", 1000, 256);
        assert_eq!(session.chunk_range(0), 0..256);
        assert_eq!(session.chunk_range(3), 768..1000);

        let covered: usize = (0..session.total_chunks)
            .map(|i| session.chunk_range(i).len())
            .sum();
        assert_eq!(covered, 1000);
    }

    #[test]
    fn test_progress() {
        let mut session = OtaSession::new("a", 1000, 256);
        let mut reported = Vec::new();
        while session.next_chunk().is_some() {
            session.advance();
            reported.push(session.progress_percent());
        }
        assert_eq!(reported, vec![25, 50, 75, 100]);
        assert!(session.is_complete());
        assert_eq!(session.next_chunk(), None);
    }

    #[test]
    fn test_encoded_estimate() {
        let session = OtaSession::new("a", 300, 256);
        assert!((400..=401).contains(&session.estimated_encoded_size()));
    }
}
