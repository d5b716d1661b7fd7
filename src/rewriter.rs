//! §4.D — spoken-punctuation rewriter.
//!
//! Rewrites verbalised punctuation phrases into characters and normalises
//! whitespace, without any understanding of the surrounding language.
//! Mirrors the teacher's text-preprocessing module in spirit (plain
//! string-munging functions, each doing one normalisation pass) even
//! though the transformation itself — inserting punctuation rather than
//! stripping markdown — is unrelated to what that module did.

/// Rule phrases applied in order, case-insensitive, word-boundary aware.
/// Longer/more-specific phrases are listed before shorter ones so that,
/// e.g., "exclamation mark" is matched before any hypothetical "mark"-only
/// rule would be.
const RULES: &[(&str, &str)] = &[
    ("new paragraph", "\n\n"),
    ("new line", "\n"),
    ("full stop", "."),
    ("period", "."),
    ("question mark", "?"),
    ("exclamation mark", "!"),
    ("open parenthesis", "("),
    ("close parenthesis", ")"),
    ("open bracket", "["),
    ("close bracket", "]"),
    ("open quote", "\""),
    ("close quote", "\""),
    ("semicolon", ";"),
    ("colon", ":"),
    ("comma", ","),
];

/// Apply the spoken-punctuation rule set and whitespace normalisation to
/// `text`. Returns the rewritten text and the number of rule matches
/// applied (for telemetry).
#[must_use]
pub fn rewrite(text: &str) -> (String, u32) {
    if text.trim().is_empty() {
        return (String::new(), 0);
    }

    let mut applied = 0u32;
    let mut working = text.to_string();
    for (phrase, replacement) in RULES {
        let (next, count) = replace_word_boundary(&working, phrase, replacement);
        working = next;
        applied += count;
    }

    (normalize_whitespace(&working), applied)
}

/// Replace every case-insensitive, word-boundary-delimited occurrence of
/// `phrase` in `text` with `replacement`. A "word boundary" means the match
/// is not immediately preceded or followed by an alphanumeric character.
fn replace_word_boundary(text: &str, phrase: &str, replacement: &str) -> (String, u32) {
    let haystack = text.to_ascii_lowercase();
    let needle = phrase.to_ascii_lowercase();
    if needle.is_empty() {
        return (text.to_string(), 0);
    }

    let mut out = String::with_capacity(text.len());
    let mut count = 0u32;
    let mut cursor = 0usize;

    while cursor < text.len() {
        let Some(rel) = haystack[cursor..].find(&needle) else {
            out.push_str(&text[cursor..]);
            break;
        };
        let start = cursor + rel;
        let end = start + needle.len();

        let before_ok = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());

        if before_ok && after_ok {
            out.push_str(&text[cursor..start]);
            out.push_str(replacement);
            count += 1;
            cursor = end;
        } else {
            // Not a real word-boundary match — emit one char and retry from
            // the next position so overlapping false starts don't loop.
            out.push_str(&text[cursor..=start]);
            cursor = start + 1;
        }
    }

    (out, count)
}

/// The whitespace normalisation pass (§4.D, seven numbered steps).
fn normalize_whitespace(text: &str) -> String {
    // 1. Collapse horizontal whitespace runs to one space, preserve
    //    newlines, trim horizontal whitespace around every newline.
    let mut collapsed = String::with_capacity(text.len());
    let mut prev_was_hspace = false;
    for c in text.chars() {
        if c == '\n' {
            while collapsed.ends_with(' ') {
                collapsed.pop();
            }
            collapsed.push('\n');
            prev_was_hspace = false;
        } else if c.is_whitespace() {
            if !prev_was_hspace && !collapsed.ends_with('\n') {
                collapsed.push(' ');
            }
            prev_was_hspace = true;
        } else {
            collapsed.push(c);
            prev_was_hspace = false;
        }
    }

    // 2. Remove a single space immediately before closing punctuation.
    let closing: &[char] = &[',', '.', ';', ':', '!', '?', ')', '}', ']'];
    let mut step2 = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ' '
            && i + 1 < chars.len()
            && closing.contains(&chars[i + 1])
        {
            i += 1;
            continue;
        }
        step2.push(chars[i]);
        i += 1;
    }

    // 3. Remove whitespace directly after any opening bracket.
    let brackets_open: &[char] = &['(', '{', '['];
    let mut step3 = String::with_capacity(step2.len());
    let chars: Vec<char> = step2.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        step3.push(chars[i]);
        if brackets_open.contains(&chars[i]) {
            let mut j = i + 1;
            while j < chars.len() && chars[j] == ' ' {
                j += 1;
            }
            i = j;
            continue;
        }
        i += 1;
    }

    // 4. Quotes share one glyph (`"`) for both roles, so role is inferred
    //    from occurrence parity: the 1st, 3rd, ... quote opens (strip
    //    whitespace after it, like an opening bracket); the 2nd, 4th, ...
    //    closes (strip whitespace before it, like closing punctuation).
    let mut step4 = String::with_capacity(step3.len());
    let chars: Vec<char> = step3.chars().collect();
    let mut quote_count = 0u32;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '"' {
            quote_count += 1;
            if quote_count % 2 == 0 {
                while step4.ends_with(' ') {
                    step4.pop();
                }
            }
            step4.push('"');
            i += 1;
            if quote_count % 2 == 1 {
                while i < chars.len() && chars[i] == ' ' {
                    i += 1;
                }
            }
            continue;
        }
        step4.push(chars[i]);
        i += 1;
    }

    // 5. Insert a single space after `, . ; : ! ?` when the next character
    //    is neither whitespace nor another closing punctuation.
    let sentence_punct: &[char] = &[',', '.', ';', ':', '!', '?'];
    let mut step5 = String::with_capacity(step4.len());
    let chars: Vec<char> = step4.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        step5.push(c);
        if sentence_punct.contains(&c) {
            if let Some(&next) = chars.get(i + 1) {
                if !next.is_whitespace() && !closing.contains(&next) && next != '"' {
                    step5.push(' ');
                }
            }
        }
    }

    // 6. Collapse runs of three-or-more newlines to exactly two.
    let mut step6 = String::with_capacity(step5.len());
    let mut newline_run = 0;
    for c in step5.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                step6.push(c);
            }
        } else {
            newline_run = 0;
            step6.push(c);
        }
    }

    // 7. Trim leading/trailing horizontal whitespace (but not newlines, so
    //    an explicit leading/trailing "new paragraph" still renders).
    step6
        .trim_matches(|c: char| c == ' ' || c == '\t')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_empty_and_zero() {
        assert_eq!(rewrite(""), (String::new(), 0));
        assert_eq!(rewrite("   "), (String::new(), 0));
    }

    #[test]
    fn basic_phrase_rewrite() {
        let (text, count) = rewrite("hello comma world full stop new line next");
        assert_eq!(text, "hello, world.\nnext");
        assert_eq!(count, 3);
    }

    #[test]
    fn new_paragraph_inserts_blank_line() {
        let (text, _) = rewrite("first part new paragraph second part");
        assert_eq!(text, "first part\n\nsecond part");
    }

    #[test]
    fn word_boundary_prevents_substring_false_positive() {
        // "periodical" must not trigger the "period" rule.
        let (text, count) = rewrite("a periodical report");
        assert_eq!(text, "a periodical report");
        assert_eq!(count, 0);
    }

    #[test]
    fn case_insensitive_matching() {
        let (text, count) = rewrite("Hello Comma World");
        assert_eq!(text, "Hello, World");
        assert_eq!(count, 1);
    }

    #[test]
    fn question_and_exclamation_marks() {
        let (text, _) = rewrite("are you sure question mark yes exclamation mark");
        assert_eq!(text, "are you sure? yes!");
    }

    #[test]
    fn brackets_and_parens_have_no_internal_space() {
        let (text, _) = rewrite("open parenthesis note close parenthesis done");
        assert_eq!(text, "(note) done");
    }

    #[test]
    fn quotes_hug_their_contents() {
        let (text, _) = rewrite("she said open quote hello close quote to him");
        assert_eq!(text, "she said \"hello\" to him");
    }

    #[test]
    fn colon_and_semicolon() {
        let (text, _) = rewrite("items colon apples semicolon oranges");
        assert_eq!(text, "items: apples; oranges");
    }

    #[test]
    fn triple_newline_collapses_to_two() {
        let (text, _) = rewrite("a new paragraph new paragraph b");
        // two consecutive "new paragraph" => four newlines => collapse to two.
        assert_eq!(text, "a\n\nb");
    }

    #[test]
    fn idempotent_on_output_without_rule_phrases() {
        let (first, _) = rewrite("hello comma world full stop");
        let (second, count2) = rewrite(&first);
        assert_eq!(first, second);
        assert_eq!(count2, 0);
    }

    #[test]
    fn trims_leading_and_trailing_horizontal_whitespace() {
        let (text, _) = rewrite("   padded comma text   ");
        assert_eq!(text, "padded, text");
    }
}
