use std::collections::VecDeque;
use std::sync::Arc;

use podtail_types::LogLine;

/// Shared handle to a buffered line (clones are a refcount bump)
pub type ArcLogLine = Arc<LogLine>;

/// Capped ring buffer keeping the most recent lines in arrival order
#[derive(Clone, Debug)]
pub struct LineBuffer {
    /// Internal storage
    lines: VecDeque<ArcLogLine>,

    /// Maximum capacity
    capacity: usize,
}

impl LineBuffer {
    /// Create a new line buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest entries past capacity
    pub fn add(&mut self, line: impl Into<ArcLogLine>) {
        self.lines.push_back(line.into());
        self.trim();
    }

    /// Replace the contents, keeping the last `capacity` of the supplied lines
    pub fn replace_all<I>(&mut self, lines: I)
    where
        I: IntoIterator,
        I::Item: Into<ArcLogLine>,
    {
        self.lines.clear();
        for line in lines {
            self.lines.push_back(line.into());
            self.trim();
        }
    }

    /// Ordered copy of the current contents
    pub fn snapshot(&self) -> Vec<ArcLogLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn trim(&mut self) {
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> LogLine {
        LogLine::from_string(s)
    }

    fn contents(buf: &LineBuffer) -> Vec<Vec<u8>> {
        buf.snapshot().iter().map(|l| l.bytes().to_vec()).collect()
    }

    #[test]
    fn test_add_evicts_oldest() {
        let mut buf = LineBuffer::new(4);
        for i in 0..10 {
            buf.add(line(&format!("line{i}")));
            assert!(buf.len() <= 4);
        }
        assert_eq!(
            contents(&buf),
            vec![b"line6".to_vec(), b"line7".to_vec(), b"line8".to_vec(), b"line9".to_vec()]
        );
    }

    #[test]
    fn test_below_capacity_keeps_everything() {
        let mut buf = LineBuffer::new(10);
        buf.add(line("a"));
        buf.add(line("b"));
        assert_eq!(contents(&buf), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_replace_all_keeps_most_recent() {
        let mut buf = LineBuffer::new(2);
        buf.add(line("old"));
        buf.replace_all(["x", "y", "z"].map(line));
        assert_eq!(contents(&buf), vec![b"y".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut buf = LineBuffer::new(3);
        buf.add(line("a"));
        let snap = buf.snapshot();
        buf.add(line("b"));
        buf.clear();
        assert_eq!(snap.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_capacity_never_panics() {
        let mut buf = LineBuffer::new(0);
        buf.add(line("a"));
        assert!(buf.is_empty());
    }
}
