//! Token estimation
//!
//! Character-based heuristic: one token per four characters, rounded up.
//! Counts Unicode scalar values rather than bytes so multi-byte text is not
//! overpriced. Every budget in the crate goes through [`count_tokens`].

/// Characters per estimated token
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a piece of text
pub fn count_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Largest character count whose estimate still fits in `tokens`
pub fn max_chars_for(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN)
}

/// Truncate `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(count_tokens("test"), 1);
        assert_eq!(count_tokens("hello"), 2);
        assert_eq!(count_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn unicode_counts_chars_not_bytes() {
        // 4 chars, 12 bytes
        assert_eq!(count_tokens("日本語だ"), 1);
        assert_eq!(count_tokens("🦀🦀🦀🦀🦀"), 2);
    }

    #[test]
    fn monotonic_in_length() {
        let mut previous = 0;
        let mut text = String::new();
        for _ in 0..64 {
            text.push('x');
            let now = count_tokens(&text);
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn max_chars_round_trips_with_estimate() {
        for budget in 0..20 {
            let text = "z".repeat(max_chars_for(budget));
            assert_eq!(count_tokens(&text), budget);
        }
    }
}
