//! Running transcript buffer fed by incoming fragments.

use std::time::Duration;

/// Punctuation that belongs to the word before it when it arrives as a fragment of its own.
const ATTACHING_PUNCTUATION: [char; 10] = ['.', '!', '?', ',', ';', ':', '"', '\'', ')', ']'];

/// Transcript text not yet committed to a sentence, and the stretch of the transcript
/// timeline it covers.
///
/// Times are offsets from the start of the transcription connection. `span_start` is
/// set exactly while `pending_text` is non-empty.
#[derive(Debug, Default)]
pub struct TextBuffer {
    pending_text: String,
    span_start: Option<Duration>,
    span_end: Duration,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment.
    ///
    /// Whitespace is collapsed to single spaces and every fragment is followed by one
    /// space, so a fragment ending in a terminator is immediately a complete sentence.
    /// A fragment that opens with bare punctuation (`"."`, `"?\""`) is joined to the
    /// previous word. Fragments with no text leave the buffer untouched.
    pub fn append(&mut self, text: &str, fragment_start: Duration, fragment_end: Duration) {
        let mut words = text.split_whitespace().peekable();
        if words.peek().is_none() {
            return;
        }

        if self.pending_text.is_empty() {
            self.span_start = Some(fragment_start);
        }
        self.span_end = fragment_end;

        if words.peek().is_some_and(|word| word.chars().all(|c| ATTACHING_PUNCTUATION.contains(&c))) && self.pending_text.ends_with(' ') {
            self.pending_text.pop();
        }

        for word in words {
            self.pending_text.push_str(word);
            self.pending_text.push(' ');
        }
    }

    pub fn pending_text(&self) -> &str {
        &self.pending_text
    }

    /// `(span_start, span_end)`, or `None` while the buffer is empty.
    pub fn span(&self) -> Option<(Duration, Duration)> {
        self.span_start.map(|start| (start, self.span_end))
    }

    pub fn is_empty(&self) -> bool {
        self.pending_text.is_empty()
    }

    /// Drop the first `byte_len` bytes of pending text. The remaining text starts at
    /// `next_start` on the timeline.
    pub(super) fn consume(&mut self, byte_len: usize, next_start: Duration) {
        let rest = self.pending_text[byte_len..].trim_start();
        if rest.is_empty() {
            self.pending_text.clear();
            self.span_start = None;
        } else {
            self.pending_text = rest.to_string();
            self.span_start = Some(next_start);
        }
    }
}
