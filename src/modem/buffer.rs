/// Accumulates raw bytes read from the serial port and hands them back either
/// as CR or LF terminated lines (command responses, caller ID) or as raw
/// chunks (voice data), so bytes never get lost when switching between the two.
pub struct LineBuffer {
    buffer: Vec<u8>,
    max_buffer_size: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_size(16 * 1024)
    }

    pub fn with_max_size(size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer_size: size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer. Should be called when flushing the port.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent unbounded growth.
        if self.buffer.len() > self.max_buffer_size {
            // Keep only the most recent max_buffer_size bytes.
            let keep_from = self.buffer.len() - self.max_buffer_size;
            self.buffer.drain(..keep_from);
        }
    }

    /// Removes and returns the next line including its terminator, if a complete
    /// one is buffered. Lines end at CR, which also covers numeric result codes,
    /// or at a bare LF. A CR immediately followed by LF is taken as one terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let mut end = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n')?;
        if self.buffer[end] == b'\r' && self.buffer.get(end + 1) == Some(&b'\n') {
            end += 1;
        }
        Some(self.buffer.drain(..=end).collect())
    }

    /// Removes and returns up to `max` bytes from the front of the buffer.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let count = max.min(self.buffer.len());
        self.buffer.drain(..count).collect()
    }

    /// Removes and returns everything, used when a read times out on a partial line.
    pub fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_line_keeps_partial() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"\r\nOK\r\nDATE=08");

        assert_eq!(buffer.next_line().unwrap(), b"\r\n");
        assert_eq!(buffer.next_line().unwrap(), b"OK\r\n");
        assert!(buffer.next_line().is_none());
        assert_eq!(buffer.len(), 7);

        buffer.push(b"01\r\n");
        assert_eq!(buffer.next_line().unwrap(), b"DATE=0801\r\n");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_numeric_result_codes_end_at_cr() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"0\r4\rRING\n\r\nOK\r\n");

        assert_eq!(buffer.next_line().unwrap(), b"0\r");
        assert_eq!(buffer.next_line().unwrap(), b"4\r");
        assert_eq!(buffer.next_line().unwrap(), b"RING\n");
        assert_eq!(buffer.next_line().unwrap(), b"\r\n");
        assert_eq!(buffer.next_line().unwrap(), b"OK\r\n");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_after_line_leaves_raw_bytes() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"CONNECT\r\n\x80\x7f\n\x10\x03");

        assert_eq!(buffer.next_line().unwrap(), b"CONNECT\r\n");
        assert_eq!(buffer.take(2), vec![0x80, 0x7f]);
        assert_eq!(buffer.take(100), vec![b'\n', 0x10, 0x03]);
        assert!(buffer.take(10).is_empty());
    }

    #[test]
    fn test_max_size_keeps_recent_bytes() {
        let mut buffer = LineBuffer::with_max_size(4);
        buffer.push(b"abcdef");
        assert_eq!(buffer.take_all(), b"cdef");
        assert!(buffer.is_empty());
    }
}
