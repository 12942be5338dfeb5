//! Sentence extraction with proportional timestamp interpolation.
//!
//! Splitting is eager: the buffer is cut at its first sentence boundary, repeatedly, so
//! one call can release several sentences and only trailing incomplete text stays
//! buffered. A sentence's end time is interpolated over a span that may still grow with
//! later fragments, which costs timing precision but lets synthesis start as soon as a
//! boundary is seen.

use std::time::Duration;

use super::accumulator::TextBuffer;

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Characters allowed to trail a terminator inside the same sentence (`"Really?!"`, `(done.)`).
const CLOSERS: [char; 4] = ['"', '\'', ')', ']'];

/// A complete sentence and its estimated place on the transcript timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    pub text: String,
    pub estimated_start: Duration,
    pub estimated_end: Duration,
}

/// Pull every complete sentence out of the buffer, in order.
///
/// Boundaries with nothing speakable before them (a stray `"."`) are consumed without
/// producing a sentence.
pub fn extract_ready_sentences(buffer: &mut TextBuffer) -> Vec<SentenceUnit> {
    let mut sentences = Vec::new();

    while let Some((span_start, span_end)) = buffer.span() {
        let text = buffer.pending_text();
        let Some((byte_len, sentence_chars)) = find_boundary(text) else {
            break;
        };
        let Some(estimated_end) = interpolate(span_start, span_end, sentence_chars, text.chars().count()) else {
            break;
        };

        let sentence = text[..byte_len].trim().to_string();
        buffer.consume(byte_len, estimated_end);

        if sentence.chars().any(char::is_alphanumeric) {
            sentences.push(SentenceUnit { text: sentence, estimated_start: span_start, estimated_end });
        }
    }

    sentences
}

/// `span_start + (chars / total_chars) * (span_end - span_start)`, computed exactly in
/// integer nanoseconds. `None` when `total_chars` is zero.
///
/// A span that runs backwards (out-of-order fragment times) is treated as empty.
pub fn interpolate(span_start: Duration, span_end: Duration, chars: usize, total_chars: usize) -> Option<Duration> {
    if total_chars == 0 {
        return None;
    }

    let span = span_end.saturating_sub(span_start).as_nanos();
    let offset = span * chars.min(total_chars) as u128 / total_chars as u128;
    Some(span_start + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX)))
}

/// Byte length and character count of the first sentence in `text`.
///
/// A boundary is a run of terminators (plus closing quotes or brackets) followed by
/// whitespace or the end of the text, so `3.14` and `e.g` do not split.
fn find_boundary(text: &str) -> Option<(usize, usize)> {
    let mut chars = text.char_indices().enumerate().peekable();

    while let Some((count, (idx, c))) = chars.next() {
        if !TERMINATORS.contains(&c) {
            continue;
        }

        let mut end = (idx + c.len_utf8(), count + 1);
        while let Some(&(n, (i, next))) = chars.peek() {
            if !TERMINATORS.contains(&next) && !CLOSERS.contains(&next) {
                break;
            }
            end = (i + next.len_utf8(), n + 1);
            chars.next();
        }

        match chars.peek() {
            None => return Some(end),
            Some(&(_, (_, next))) if next.is_whitespace() => return Some(end),
            _ => {}
        }
    }

    None
}
