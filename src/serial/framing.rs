//! Newline framing for the Pico command channel.
//!
//! The peer talks in newline-terminated ASCII lines. Reads come back in
//! arbitrary chunks, so the framer accumulates bytes and yields a line
//! every time a `\n` lands in the buffer, independent of how the chunks
//! were cut.

/// Streaming line assembler. Feed it raw chunks, get complete lines.
///
/// One trailing `\r` is stripped per line and lines that are blank after
/// trimming are dropped. Partial trailing data stays buffered until the
/// delimiter arrives.
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer { buffer: Vec::new() }
    }

    /// Append a chunk and drain every complete line it finishes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();

        while let Some(index) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=index).collect();
            line.pop(); // the delimiter itself

            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line).into_owned();
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }

        lines
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
