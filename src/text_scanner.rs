// =============================================================================
// text_scanner.rs — READING WHAT THE MODEL MEANT
// =============================================================================
//
// The classification model answers in free text. Sometimes that text is
// exactly "Roads". Sometimes it is "Category: roads." Sometimes it is a
// paragraph explaining that the pothole is, in its opinion, a road problem.
//
// Everything in this module turns those answers into typed values, and every
// function here is total: it returns a value plus a flag saying whether it had
// to fall back to a default. Nothing panics, nothing errors.
// =============================================================================

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Category, Priority, Radius};

/// The verdict token that rejects a report.
const SPAM_TOKEN: &str = "SPAM";

static SPAM_MATCHER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build([SPAM_TOKEN])
        .expect("single literal pattern always compiles")
});

/// All category labels. Overlapping search so that a short label found
/// first never hides a longer one later in the text.
static CATEGORY_MATCHER: LazyLock<(AhoCorasick, Vec<Category>)> = LazyLock::new(|| {
    let labels: Vec<Category> = Category::ALL.to_vec();
    let matcher = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::Standard)
        .build(labels.iter().map(|c| c.label()))
        .expect("category labels always compile");
    (matcher, labels)
});

/// True when `text[start..end]` is not glued to a letter or digit on either
/// side, so "Other" does not fire inside "another".
fn is_whole_word(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("static regex compiles"));

/// A parsed value and whether the default had to stand in for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parsed<T> {
    pub value: T,
    pub fallback: bool,
}

impl<T> Parsed<T> {
    fn found(value: T) -> Self {
        Self { value, fallback: false }
    }

    fn defaulted(value: T) -> Self {
        Self { value, fallback: true }
    }
}

/// Any occurrence of "spam", in any case, is a rejection.
pub fn is_spam_verdict(verdict: &str) -> bool {
    SPAM_MATCHER.is_match(verdict)
}

/// Map raw classifier text onto the fixed label set.
///
/// Exact label first (after trimming quotes and punctuation), then the
/// longest label mentioned anywhere in the text. Otherwise `default`.
pub fn parse_category(raw: &str, default: Category) -> Parsed<Category> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .trim();

    if let Ok(category) = cleaned.parse::<Category>() {
        return Parsed::found(category);
    }

    // Longest whole-word label wins; equal lengths go to the earliest.
    let (matcher, labels) = &*CATEGORY_MATCHER;
    let best = matcher
        .find_overlapping_iter(cleaned)
        .filter(|m| is_whole_word(cleaned, m.start(), m.end()))
        .min_by_key(|m| (std::cmp::Reverse(m.len()), m.start()));

    match best {
        Some(m) => Parsed::found(labels[m.pattern().as_usize()]),
        None => Parsed::defaulted(default),
    }
}

/// The model grades urgency 0/1/2; we store 1/2/3. First digit wins.
/// Digits outside the model's scale, or no digit at all, mean low priority.
pub fn parse_priority(raw: &str) -> Parsed<Priority> {
    let digit = raw.chars().find(|c| c.is_ascii_digit()).and_then(|c| c.to_digit(10));

    match digit {
        Some(d @ 0..=2) => Parsed::found(Priority::new(d as i32 + 1).unwrap_or(Priority::LOW)),
        _ => Parsed::defaulted(Priority::LOW),
    }
}

/// First integer in the text, clamped into the radius bounds.
/// No integer means the 500 m default.
pub fn parse_radius(raw: &str) -> Parsed<Radius> {
    match FIRST_INTEGER.find(raw) {
        // Digit runs too long for i64 are certainly above the maximum.
        Some(m) => Parsed::found(Radius::clamped(m.as_str().parse::<i64>().unwrap_or(i64::MAX))),
        None => Parsed::defaulted(Radius::DEFAULT),
    }
}
