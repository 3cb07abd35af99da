//! Text normalizer shared by the sparse index and the query processor.
//!
//! Output must be identical for identical input across restarts: cache keys
//! and snapshot rebuilds both depend on it.

/// Characters that survive normalization; everything else separates tokens.
fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Lowercase, strip control characters and punctuation (except `-` and
/// `.`), split on whitespace, trim `.`/`-` from token edges and drop tokens
/// of one character or less.
pub fn normalize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in lowered.chars() {
        if is_token_char(c) {
            current.push(c);
        } else if !current.is_empty() {
            push_token(&mut tokens, &current);
            current.clear();
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim_matches(|c| c == '.' || c == '-');
    if trimmed.chars().count() > 1 {
        tokens.push(trimmed.to_string());
    }
}

/// Tokens joined by single spaces.
pub fn normalize_to_string(text: &str) -> String {
    normalize(text).join(" ")
}
