//! Newline-delimited framing.
//!
//! The daemon writes one JSON document per line. A socket read may return a
//! fraction of a line, several lines, or anything in between, so [`LineFramer`]
//! keeps the trailing partial record between calls and only hands out complete
//! ones, in the order they were received.

/// Record delimiter used by the daemon.
pub const DELIMITER: u8 = b'\n';

/// Splits an arbitrary sequence of byte chunks into complete records.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a newly received chunk and return every record it completes.
    ///
    /// The first fragment of the chunk is appended to whatever was buffered
    /// from previous chunks; the last fragment (possibly empty) becomes the new
    /// buffer. Empty records are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        let mut fragments = chunk.split(|b| *b == DELIMITER);

        // `split` always yields at least one fragment, even for an empty chunk.
        let Some(mut current) = fragments.next() else {
            return records;
        };

        for next in fragments {
            let mut record = std::mem::take(&mut self.buffer);
            record.extend_from_slice(current);
            if !record.is_empty() {
                records.push(record);
            }
            current = next;
        }

        self.buffer.extend_from_slice(current);
        records
    }

    /// Bytes received after the last delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered partial record, e.g. when the socket is replaced.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
