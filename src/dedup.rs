//! §4.E — overlap deduper.
//!
//! Given the tail of what is already on screen and a freshly transcribed
//! chunk, drop the prefix of the chunk that merely restates the tail —
//! ASR windows share left-context by design, so successive outputs
//! frequently repeat the last few words of the previous one.

/// Longest tail/head overlap window considered (tokens).
const TAIL_HEAD_MAX: usize = 20;
/// Floating-match size bounds (tokens).
const FLOATING_MIN: usize = 4;
const FLOATING_MAX: usize = 16;
const FLOATING_EXISTING_CAP: usize = 28;
/// How far before the literal tail a floating match may start.
const FLOATING_LOOKBACK: usize = 6;

/// Remove the leading overlap of `chunk` against the tail `existing`.
/// Idempotent: `dedup(existing, dedup(existing, chunk)) == dedup(existing, chunk)`.
#[must_use]
pub fn dedup(existing: &str, chunk: &str) -> String {
    if existing.trim().is_empty() || chunk.trim().is_empty() {
        return chunk.to_string();
    }
    if existing.contains('\n') || chunk.contains('\n') {
        return chunk.to_string();
    }

    let existing_tokens: Vec<&str> = existing.split_whitespace().collect();
    let chunk_tokens: Vec<&str> = chunk.split_whitespace().collect();
    let existing_norm: Vec<String> = existing_tokens.iter().map(|t| normalize(t)).collect();
    let chunk_norm: Vec<String> = chunk_tokens.iter().map(|t| normalize(t)).collect();

    let overlap = tail_head_overlap(&existing_norm, &chunk_norm)
        .or_else(|| floating_overlap(&existing_norm, &chunk_norm))
        .unwrap_or(0);

    if overlap == 0 {
        return chunk.to_string();
    }
    drop_leading_words(chunk, overlap)
}

/// Lowercase, with leading/trailing non-alphanumeric-apostrophe characters
/// stripped.
fn normalize(token: &str) -> String {
    let is_kept = |c: char| c.is_alphanumeric() || c == '\'';
    token
        .trim_matches(|c: char| !is_kept(c))
        .to_lowercase()
}

/// Step 4: largest `size` in `1..=min(|E|, |N|, 20)` such that the last
/// `size` tokens of `existing` equal the first `size` tokens of `chunk`.
fn tail_head_overlap(existing: &[String], chunk: &[String]) -> Option<usize> {
    let max_size = existing.len().min(chunk.len()).min(TAIL_HEAD_MAX);
    for size in (1..=max_size).rev() {
        if existing[existing.len() - size..] == chunk[..size] {
            return Some(size);
        }
    }
    None
}

/// Step 5: only attempted when the tail–head pass found nothing and the
/// chunk has at least `FLOATING_MIN` tokens. Searches for the largest
/// prefix of `chunk` that recurs inside `existing`, starting no earlier
/// than `FLOATING_LOOKBACK` tokens before `existing`'s tail.
fn floating_overlap(existing: &[String], chunk: &[String]) -> Option<usize> {
    if chunk.len() < FLOATING_MIN {
        return None;
    }
    let max_size = chunk
        .len()
        .min(FLOATING_MAX)
        .min(existing.len())
        .min(FLOATING_EXISTING_CAP);
    if max_size < FLOATING_MIN {
        return None;
    }

    for size in (FLOATING_MIN..=max_size).rev() {
        let needle = &chunk[..size];
        let earliest_start = existing.len().saturating_sub(size + FLOATING_LOOKBACK);
        let latest_start = existing.len() - size;
        for start in earliest_start..=latest_start {
            if existing[start..start + size] == *needle {
                return Some(size);
            }
        }
    }
    None
}

/// Drop the first `n` whitespace-delimited words from `text`, re-appending
/// a trailing space iff the original ended in whitespace. Dropping
/// everything yields the empty string.
fn drop_leading_words(text: &str, n: usize) -> String {
    let trailing_space = text.ends_with(char::is_whitespace);
    let mut remaining = text.split_whitespace().skip(n).collect::<Vec<_>>().join(" ");
    if remaining.is_empty() {
        return String::new();
    }
    if trailing_space {
        remaining.push(' ');
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_existing_returns_chunk_unchanged() {
        assert_eq!(dedup("", "hello there"), "hello there");
        assert_eq!(dedup("   ", "hello there"), "hello there");
    }

    #[test]
    fn empty_chunk_passes_through() {
        assert_eq!(dedup("hello there", ""), "");
    }

    #[test]
    fn newline_on_either_side_short_circuits() {
        assert_eq!(dedup("hello\nthere", "there world"), "there world");
        assert_eq!(dedup("hello there", "there\nworld"), "there\nworld");
    }

    #[test]
    fn simple_tail_head_overlap_drops_repeated_prefix() {
        // Existing ends "...see the cat", new chunk restates "the cat sat".
        let out = dedup("I went to see the cat", "the cat sat on the mat");
        assert_eq!(out, "sat on the mat");
    }

    #[test]
    fn no_overlap_leaves_chunk_untouched() {
        let out = dedup("hello world", "completely different words");
        assert_eq!(out, "completely different words");
    }

    #[test]
    fn case_and_punctuation_are_ignored_when_matching() {
        let out = dedup("I went to see the CAT,", "the cat. sat on the mat");
        assert_eq!(out, "sat on the mat");
    }

    #[test]
    fn floating_match_finds_phrase_short_of_the_literal_tail() {
        // Tail-head fails ("park" vs "morning"), but "the cat yesterday in
        // the" recurs a couple of tokens before existing's very end, inside
        // the floating-match lookback window.
        let existing = "we saw the cat yesterday in the park";
        let chunk = "the cat yesterday in the morning was nice";
        let out = dedup(existing, chunk);
        assert_eq!(out, "morning was nice");
    }

    #[test]
    fn floating_match_requires_at_least_four_new_tokens() {
        // Tail-head fails, and the chunk is shorter than the floating
        // minimum, so nothing is dropped.
        let out = dedup("we saw the kat yesterday near the park", "the cat");
        assert_eq!(out, "the cat");
    }

    #[test]
    fn dropping_the_whole_chunk_yields_empty_string() {
        let out = dedup("the cat sat on the mat", "the cat sat on the mat");
        assert_eq!(out, "");
    }

    #[test]
    fn trailing_whitespace_preserved_when_not_fully_dropped() {
        let out = dedup("I went to see the cat", "the cat sat on the mat ");
        assert_eq!(out, "sat on the mat ");
    }

    #[test]
    fn dedup_is_idempotent() {
        let existing = "I went to see the cat";
        let chunk = "the cat sat on the mat";
        let once = dedup(existing, chunk);
        let twice = dedup(existing, &once);
        assert_eq!(once, twice);
    }
}
