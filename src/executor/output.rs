//! Output-capping buffer shared by the shell and file executors (spec
//! §4.2: "output stream caps of `capability.maxOutputBytes` per stream; on
//! overflow, truncate with marker").

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Appends bytes up to `limit`, then stops accepting further writes and
/// remembers that truncation happened so the marker can be appended once.
pub struct CappedBuffer {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
            truncated: false,
        }
    }

    /// True once this buffer has refused to accept further bytes.
    pub fn is_full(&self) -> bool {
        self.truncated
    }

    pub fn push(&mut self, chunk: &str) {
        if self.truncated {
            return;
        }
        let remaining = self.limit.saturating_sub(self.buf.len());
        if chunk.len() <= remaining {
            self.buf.push_str(chunk);
        } else {
            // Push only up to a char boundary so we never split a UTF-8
            // sequence.
            let mut cut = remaining;
            while cut > 0 && !chunk.is_char_boundary(cut) {
                cut -= 1;
            }
            self.buf.push_str(&chunk[..cut]);
            self.truncated = true;
        }
    }

    pub fn into_string(mut self) -> String {
        if self.truncated {
            self.buf.push_str(TRUNCATION_MARKER);
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_output_within_limit() {
        let mut buf = CappedBuffer::new(100);
        buf.push("hello");
        assert!(!buf.is_full());
        assert_eq!(buf.into_string(), "hello");
    }

    #[test]
    fn truncates_and_appends_marker_on_overflow() {
        let mut buf = CappedBuffer::new(5);
        buf.push("hello world");
        assert!(buf.is_full());
        let out = buf.into_string();
        assert!(out.starts_with("hello"));
        assert!(out.ends_with("[output truncated]"));
    }

    #[test]
    fn further_writes_after_truncation_are_dropped() {
        let mut buf = CappedBuffer::new(5);
        buf.push("hello world");
        buf.push("more data");
        let out = buf.into_string();
        assert_eq!(out, "hello\n... [output truncated]");
    }

    #[test]
    fn does_not_split_a_utf8_boundary() {
        let mut buf = CappedBuffer::new(4);
        buf.push("héllo"); // 'é' is 2 bytes; limit of 4 lands mid-character
        let out = buf.into_string();
        assert!(out.is_char_boundary(out.len() - "\n... [output truncated]".len()));
    }
}
