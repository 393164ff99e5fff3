//! UTF-8 aware string truncation.
use std::borrow::Cow;

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Keeps at most `budget / 2` bytes from each end of `s`.
///
/// Strings within `budget` are returned unchanged, so the operation is
/// idempotent. The result never splits a UTF-8 sequence.
pub(crate) fn truncate_symmetric(s: &str, budget: usize) -> Cow<'_, str> {
    if s.len() <= budget {
        return Cow::Borrowed(s);
    }
    let half = budget / 2;
    let head = floor_char_boundary(s, half);
    let tail = ceil_char_boundary(s, s.len() - half);
    let mut out = String::with_capacity(head + s.len() - tail);
    out.push_str(&s[..head]);
    out.push_str(&s[tail..]);
    Cow::Owned(out)
}

/// Keeps the longest prefix of `s` that fits in `max_bytes`.
pub(crate) fn truncate_prefix(s: &str, max_bytes: usize) -> &str {
    &s[..floor_char_boundary(s, max_bytes)]
}

/// The first `n` characters of `s`.
pub(crate) fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("short", 10, "short")]
    #[case("abcdefghij", 10, "abcdefghij")]
    #[case("abcdefghijkl", 10, "abcdehijkl")]
    #[case("abcdefghijkl", 5, "abkl")]
    #[case("", 0, "")]
    fn symmetric_keeps_both_ends(#[case] input: &str, #[case] budget: usize, #[case] expected: &str) {
        assert_eq!(truncate_symmetric(input, budget), expected);
    }

    #[test]
    fn symmetric_respects_char_boundaries() {
        // each char is 3 bytes
        let input = "你好世界你好世界";
        let out = truncate_symmetric(input, 10);
        assert!(out.len() <= 10);
        assert_eq!(out, "你界");
    }

    #[test]
    fn symmetric_is_idempotent() {
        let input = "é".repeat(2000) + &"x".repeat(3000);
        let once = truncate_symmetric(&input, 1024).into_owned();
        let twice = truncate_symmetric(&once, 1024);
        assert!(once.len() <= 1024);
        assert_eq!(once, twice);
    }

    #[rstest]
    #[case("hello", 10, "hello")]
    #[case("hello", 3, "hel")]
    #[case("日本語", 4, "日")]
    #[case("日本語", 6, "日本")]
    fn prefix_truncation(#[case] input: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(truncate_prefix(input, max), expected);
    }

    #[test]
    fn prefix_chars_counts_characters() {
        assert_eq!(prefix_chars("日本語テキスト", 3), "日本語");
        assert_eq!(prefix_chars("abc", 10), "abc");
        assert_eq!(prefix_chars("abc", 0), "");
    }
}
