//! Text normalisation: make raw PDF text pleasant to read aloud.
//!
//! PDF text layers are full of hard line wraps, runs of spaces and glyphs a
//! speech engine either skips or spells out. This pass turns line breaks into
//! sentence breaks, collapses whitespace and strips everything except word
//! characters and basic punctuation.
//!
//! ## Rule order
//!
//! Line breaks must be handled before whitespace is collapsed, otherwise
//! there are no line breaks left to turn into pauses. Stripping symbols can
//! leave double spaces behind, so whitespace is collapsed a second time.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules in order:
///
/// 1. Trim, and unify `\r\n` / `\r` to `\n`
/// 2. Each run of line breaks becomes `". "`, or a plain space when the line
///    already ends in `.`, `!` or `?`
/// 3. Collapse whitespace runs to one space
/// 4. Remove characters other than word characters, whitespace and `. , ! ? ; : -`
/// 5. Collapse whitespace again and trim
pub fn normalize_for_speech(input: &str) -> String {
    let s = normalise_line_endings(input.trim());
    let s = line_breaks_to_sentences(&s);
    let s = collapse_whitespace(&s);
    let s = strip_unspeakable(&s);
    collapse_whitespace(&s).trim().to_string()
}

// ── Rule 1: Line endings ─────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Line breaks → sentence breaks ────────────────────────────────

static RE_LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?])?[ \t]*\n\s*").unwrap());

fn line_breaks_to_sentences(input: &str) -> String {
    RE_LINE_BREAK
        .replace_all(input, |caps: &regex::Captures| match caps.get(1) {
            Some(end) => format!("{} ", end.as_str()),
            None => ". ".to_string(),
        })
        .into_owned()
}

// ── Rule 3/5: Whitespace ─────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").into_owned()
}

// ── Rule 4: Symbols ──────────────────────────────────────────────────────

static RE_UNSPEAKABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s.,!?;:\-]").unwrap());

fn strip_unspeakable(input: &str) -> String {
    RE_UNSPEAKABLE.replace_all(input, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newline_becomes_sentence_break() {
        assert_eq!(
            normalize_for_speech("Hello world\nSecond line"),
            "Hello world. Second line"
        );
    }

    #[test]
    fn test_terminated_line_gets_plain_space() {
        assert_eq!(normalize_for_speech("Done!\nNext one."), "Done! Next one.");
        assert_eq!(normalize_for_speech("End.\n\n\nStart"), "End. Start");
    }

    #[test]
    fn test_blank_line_runs_collapse() {
        assert_eq!(
            normalize_for_speech("\n\nChapter One\n  \n\nIt was dark\n"),
            "Chapter One. It was dark"
        );
    }

    #[test]
    fn test_crlf() {
        assert_eq!(normalize_for_speech("a\r\nb\rc"), "a. b. c");
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(normalize_for_speech("a   b\t\tc"), "a b c");
    }

    #[test]
    fn test_symbols_removed() {
        assert_eq!(
            normalize_for_speech("Price: $5 © 2024 — great"),
            "Price: 5 2024 great"
        );
    }

    #[test]
    fn test_punctuation_kept() {
        let s = "Wait, what? Yes; no: maybe - ok!";
        assert_eq!(normalize_for_speech(s), s);
    }

    #[test]
    fn test_unicode_letters_kept() {
        assert_eq!(normalize_for_speech("Café naïve Øre"), "Café naïve Øre");
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(normalize_for_speech(""), "");
        assert_eq!(normalize_for_speech(" \n\t\n "), "");
        assert_eq!(normalize_for_speech("★ ☆ ✦"), "");
    }
}
