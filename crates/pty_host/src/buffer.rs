/// Characters retained per session for late subscribers.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 250_000;

/// Trailing window of terminal output, capped by character count.
///
/// Appending past the cap discards the oldest characters so the buffer always
/// holds the most recent `capacity` characters exactly. Counting characters
/// instead of bytes keeps every cut on a UTF-8 boundary.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    data: String,
    chars: usize,
    capacity: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAPACITY)
    }
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: String::new(),
            chars: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len_chars(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let incoming = chunk.chars().count();
        if incoming >= self.capacity {
            // The chunk alone fills the window; keep only its tail.
            let skip = incoming - self.capacity;
            let start = byte_offset_after_chars(chunk, skip);
            self.data.clear();
            self.data.push_str(&chunk[start..]);
            self.chars = self.capacity;
            return;
        }

        self.data.push_str(chunk);
        self.chars += incoming;

        if self.chars > self.capacity {
            let excess = self.chars - self.capacity;
            let cut = byte_offset_after_chars(&self.data, excess);
            self.data.drain(..cut);
            self.chars = self.capacity;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.chars = 0;
    }
}

fn byte_offset_after_chars(text: &str, count: usize) -> usize {
    text.char_indices()
        .nth(count)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
