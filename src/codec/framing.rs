//! Newline-delimited frame splitting.
//!
//! The instrument's byte stream is cut into frames at `\n` boundaries. The
//! splitter is chunking-invariant: however the stream is fragmented by TCP,
//! the same ordered sequence of non-empty trimmed frames comes out.
//!
//! The internal buffer grows without bound while no delimiter arrives. That
//! matches the deployed behavior and is safe against the instrument's small
//! frames, but a hostile or broken peer could grow it indefinitely; a
//! hardening pass would cap the buffer and drop the connection on overflow.

/// Splits an in-order byte stream into trimmed, non-empty frames.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
    stats: FramingStats,
}

/// Counters describing what the splitter has seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramingStats {
    /// Non-empty frames handed to the decoder.
    pub frames: u64,
    /// Delimited frames that trimmed down to nothing and were dropped.
    pub empty_dropped: u64,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes, in order.
    ///
    /// Frames are trimmed of surrounding ASCII whitespace; frames that trim
    /// to zero length are dropped silently.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            // take the frame bytes, then let the drain consume the delimiter
            let frame: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            let trimmed = frame.trim_ascii();
            if trimmed.is_empty() {
                self.stats.empty_dropped += 1;
            } else {
                self.stats.frames += 1;
                frames.push(trimmed.to_vec());
            }
        }
        frames
    }

    /// Bytes currently buffered awaiting a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> FramingStats {
        self.stats
    }

    /// Discard any partial frame, e.g. when a new acquisition starts.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
