/// Word-level smoothing for streamed text deltas.
///
/// Upstream chunks arrive at arbitrary byte boundaries; re-chunking at word
/// boundaries keeps the client-visible stream stable without adding delay.
/// Reasoning-capable models skip this transform entirely.
#[derive(Debug, Default)]
pub struct WordSmoother {
    buffer: String,
}

impl WordSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw delta and get back the complete words it released.
    /// Each returned chunk carries its trailing whitespace; a partial word
    /// at the end stays buffered until more input or `flush`.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut out = Vec::new();
        // A word is complete once whitespace follows it
        while let Some(pos) = self.buffer.find(|c: char| c.is_whitespace()) {
            let ws_len = self.buffer[pos..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
            let mut end = pos + ws_len;
            // Take the whitespace run along with the word
            while self.buffer[end..]
                .chars()
                .next()
                .map(|c| c.is_whitespace())
                .unwrap_or(false)
            {
                end += self.buffer[end..].chars().next().map(char::len_utf8).unwrap_or(0);
            }
            let chunk: String = self.buffer.drain(..end).collect();
            out.push(chunk);
        }
        out
    }

    /// Release whatever is still buffered. Called at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_released_at_boundaries() {
        let mut smoother = WordSmoother::new();
        assert_eq!(smoother.push("hel"), Vec::<String>::new());
        assert_eq!(smoother.push("lo wor"), vec!["hello ".to_string()]);
        assert_eq!(smoother.push("ld"), Vec::<String>::new());
        assert_eq!(smoother.flush(), Some("world".to_string()));
    }

    #[test]
    fn test_multiple_words_in_one_delta() {
        let mut smoother = WordSmoother::new();
        let out = smoother.push("one two three ");
        assert_eq!(out, vec!["one ", "two ", "three "]);
        assert_eq!(smoother.flush(), None);
    }

    #[test]
    fn test_whitespace_runs_stay_attached() {
        let mut smoother = WordSmoother::new();
        let out = smoother.push("a\n\nb");
        assert_eq!(out, vec!["a\n\n".to_string()]);
        assert_eq!(smoother.flush(), Some("b".to_string()));
    }

    #[test]
    fn test_flush_on_empty_buffer() {
        let mut smoother = WordSmoother::new();
        assert_eq!(smoother.flush(), None);
    }
}
