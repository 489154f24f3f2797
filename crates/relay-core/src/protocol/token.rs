//! Random message token generation.
//!
//! Every envelope carries a 21-character token drawn from a 63-symbol
//! alphabet (letters, digits, underscore). Tokens exist purely for
//! client-side correlation and logging; the relay never interprets them.

use rand::Rng;

/// Length of a message token in characters.
pub const TOKEN_LEN: usize = 21;

/// Alphabet the token characters are drawn from.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";

/// Generates a fresh random token, e.g. `"GAocFtaxX6X2Lc_xAi8Ev"`.
pub fn message_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_has_fixed_length() {
        assert_eq!(message_token().len(), TOKEN_LEN);
    }

    #[test]
    fn test_token_uses_only_alphabet_characters() {
        let token = message_token();
        assert!(token
            .bytes()
            .all(|b| TOKEN_ALPHABET.contains(&b)), "got {token}");
    }

    #[test]
    fn test_tokens_are_distinct_in_practice() {
        // 63^21 possible tokens; a collision in 100 draws means the
        // generator is broken, not unlucky.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(message_token()));
        }
    }
}
