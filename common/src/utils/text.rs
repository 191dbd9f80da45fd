use std::collections::HashSet;

/// Minimum token length used when matching query terms against content.
const MIN_TOKEN_LEN: usize = 3;

/// Lowercased alphanumeric tokens longer than two characters, in order of
/// first appearance.
pub fn tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let term = raw.to_lowercase();
        if term.len() >= MIN_TOKEN_LEN && seen.insert(term.clone()) {
            out.push(term);
        }
    }
    out
}

/// Same tokens as [`tokens`], as a set for overlap arithmetic.
pub fn token_set(text: &str) -> HashSet<String> {
    tokens(text).into_iter().collect()
}

/// Splits text into sentences at `.`/`!`/`?` runs followed by whitespace,
/// dropping the separating whitespace. The terminator stays attached to its
/// sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut end = i + 1;
            // Consume the terminator run before looking for whitespace.
            while end < bytes.len() && matches!(bytes[end], b'.' | b'!' | b'?') {
                end += 1;
            }
            if end >= bytes.len() || bytes[end].is_ascii_whitespace() {
                if let Some(sentence) = text.get(start..end) {
                    if !sentence.trim().is_empty() {
                        sentences.push(sentence);
                    }
                }
                let mut next = end;
                while next < bytes.len() && bytes[next].is_ascii_whitespace() {
                    next += 1;
                }
                start = next;
                i = next;
                continue;
            }
            i = end;
            continue;
        }
        i += 1;
    }
    if start < text.len() {
        if let Some(tail) = text.get(start..) {
            if !tail.trim().is_empty() {
                sentences.push(tail);
            }
        }
    }
    sentences
}

/// Fixed token-count heuristic: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// First run of ASCII digits in the text, if any.
pub fn first_integer(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// First decimal number in the text (`0.82`, `1`, `.5`).
pub fn first_number(text: &str) -> Option<f32> {
    let start = text.find(|c: char| c.is_ascii_digit() || c == '.')?;
    let tail = text.get(start..)?;
    let end = tail
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(tail.len());
    tail.get(..end)?.parse().ok()
}

/// Longest prefix of at most `max` characters, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text.get(..idx).unwrap_or(text),
        None => text,
    }
}

/// Shannon entropy in bits over the character frequency distribution.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts = std::collections::HashMap::new();
    let mut total = 0u32;
    for c in text.chars() {
        *counts.entry(c).or_insert(0u32) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = f64::from(total);
    counts
        .values()
        .map(|&count| {
            let p = f64::from(count) / total;
            -p * p.log2()
        })
        .sum()
}
