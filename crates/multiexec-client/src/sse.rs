//! Decoder for the line-oriented `text/event-stream` responses
//!
//! Frames are separated by a blank line. Every `data:` line of a frame
//! contributes one line of text; other fields and comments are ignored.

/// Incremental SSE frame decoder
///
/// Bytes can be pushed in arbitrary chunks; a frame is only decoded once
/// its terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the payloads of every completed frame
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(payload) = decode_frame(&frame[..end]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Decode whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(&rest)
    }
}

fn decode_frame(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}
