//! Edit-distance word suggestions.
//!
//! A vocabulary word is suggested when it shares at least `prefix` leading
//! characters with the input and some prefix of it lies within `maxdist`
//! edits of the input, so partially typed words (`ra`) reach their
//! completions (`rankle`).

use std::collections::BTreeSet;

use crate::query::SearchQuery;
use crate::utils::{common_prefix_chars, levenshtein, prefix_edit_distance};

/// Suggest tuning for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestOptions {
    pub maxdist: usize,
    /// Required shared leading characters
    pub prefix: usize,
}

impl SuggestOptions {
    /// Query values, else `default_maxdist` and the length of the term
    pub fn from_query(query: &SearchQuery, default_maxdist: usize) -> Self {
        Self {
            maxdist: query.maxdist.unwrap_or(default_maxdist),
            prefix: query
                .prefix
                .unwrap_or_else(|| query.term.trim().chars().count()),
        }
    }
}

/// Vocabulary words close to `word`, best first
pub fn suggest<'a, I>(vocabulary: I, word: &str, options: SuggestOptions) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        return Vec::new();
    }

    let candidates: BTreeSet<String> = vocabulary
        .into_iter()
        .filter(|candidate| common_prefix_chars(&word, candidate) >= options.prefix)
        .filter(|candidate| prefix_edit_distance(&word, candidate) <= options.maxdist)
        .map(str::to_string)
        .collect();

    rank_words(&word, candidates)
}

/// Order words by edit distance to `term`, then by length difference,
/// then alphabetically
pub fn rank_words(term: &str, words: impl IntoIterator<Item = String>) -> Vec<String> {
    let term_len = term.chars().count();
    let mut ranked: Vec<(usize, usize, String)> = words
        .into_iter()
        .map(|w| {
            let dist = levenshtein(term, &w);
            let len_diff = w.chars().count().abs_diff(term_len);
            (dist, len_diff, w)
        })
        .collect();
    ranked.sort();
    ranked.dedup_by(|a, b| a.2 == b.2);
    ranked.into_iter().map(|(_, _, w)| w).collect()
}
