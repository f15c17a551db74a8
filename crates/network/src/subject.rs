//! Subject names and wildcard matching
//!
//! Subjects are dot-separated, non-empty tokens. In subscription patterns
//! `*` matches exactly one token and `>` (last token only) matches one or
//! more trailing tokens.

const SINGLE_WILDCARD: &str = "*";
const TAIL_WILDCARD: &str = ">";

fn tokens_are_valid(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && !token.contains(char::is_whitespace))
}

/// A concrete subject a message can be published to
pub fn is_valid_subject(subject: &str) -> bool {
    tokens_are_valid(subject)
        && subject
            .split('.')
            .all(|token| token != SINGLE_WILDCARD && token != TAIL_WILDCARD)
}

/// A subscription pattern, wildcards allowed
pub fn is_valid_pattern(pattern: &str) -> bool {
    if !tokens_are_valid(pattern) {
        return false;
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    tokens
        .iter()
        .enumerate()
        .all(|(i, token)| *token != TAIL_WILDCARD || i == last)
}

/// Does `subject` fall under `pattern`?
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(TAIL_WILDCARD), Some(_)) => return true,
            (Some(SINGLE_WILDCARD), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
