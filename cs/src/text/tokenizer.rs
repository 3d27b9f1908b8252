//! Tokenization (§4.2): Unicode-letter/digit word split, lower-cased, with
//! short tokens and stop words dropped.

use std::collections::HashSet;

use crate::config::stop_words;

/// Split `text` into lower-cased word tokens, dropping anything shorter
/// than `min_len` chars or in the stop-word list.
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    let stop = stop_words();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars().chain(std::iter::once(' ')) {
        if ch.is_alphanumeric() {
            current.push(ch.to_lowercase().next().unwrap_or(ch));
        } else if !current.is_empty() {
            if current.chars().count() >= min_len && !stop.contains(current.as_str()) {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }

    tokens
}

/// Unique token set, for inverted-index membership tests.
pub fn tokenize_set(text: &str, min_len: usize) -> HashSet<String> {
    tokenize(text, min_len).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_non_alphanumeric_and_lowercases() {
        let tokens = tokenize("Found 1 Opportunity id=006A!", 3);
        assert!(tokens.contains(&"found".to_string()));
        assert!(tokens.contains(&"opportunity".to_string()));
        assert!(tokens.contains(&"006a".to_string()));
        // "id" is 2 chars, dropped by min_len.
        assert!(!tokens.contains(&"id".to_string()));
    }

    #[test]
    fn drops_stop_words() {
        let tokens = tokenize("the quick fox and the lazy dog", 3);
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"and".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
    }

    #[test]
    fn unicode_letters_are_word_characters() {
        let tokens = tokenize("café résumé", 3);
        assert!(tokens.iter().any(|t| t.contains('é')));
    }
}
