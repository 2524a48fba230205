//! Snippet extraction for search hits.
//!
//! The document text is retokenized, tokens equal to a query term are
//! marked, and context windows around the marks become fragments. The best
//! fragments (by match count, then density) are kept in document order and
//! joined into one snippet.
//!
//! When no token equals a term, tokens starting with a term are marked
//! instead; plain searches also hit the n-gram field, so `shi` can match a
//! document whose text only has `Shield`. A phrase search keeps only the
//! fragments where the terms appear as adjacent words. Text without any
//! fragment is truncated.

mod fragment;

pub use fragment::{Fragment, MatchRange};

use serde::{Deserialize, Serialize};

use crate::utils::{Analyzer, HighlightConfig};

const ELLIPSIS: &str = "...";

/// Highlight tuning for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightOptions {
    /// Upper bound on the characters of one fragment
    pub maxchars: usize,
    /// Context kept on each side of a match
    pub surround: usize,
    /// Fragments kept per document
    pub top: usize,
    pub phrase: bool,
    pub prefix: bool,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self::from_config(&HighlightConfig::default())
    }
}

impl HighlightOptions {
    pub fn from_config(config: &HighlightConfig) -> Self {
        Self {
            maxchars: config.maxchars,
            surround: config.surround,
            top: config.top,
            phrase: false,
            prefix: false,
        }
    }

    pub fn with_limits(mut self, maxchars: Option<usize>, surround: Option<usize>) -> Self {
        if let Some(maxchars) = maxchars.filter(|m| *m > 0) {
            self.maxchars = maxchars;
        }
        if let Some(surround) = surround {
            self.surround = surround;
        }
        self
    }

    pub fn with_phrase(mut self, phrase: bool) -> Self {
        self.phrase = phrase;
        self
    }

    pub fn with_prefix(mut self, prefix: bool) -> Self {
        self.prefix = prefix;
        self
    }
}

/// Highlight result for one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub snippet: String,
    pub fragments: Vec<Fragment>,
    /// Matches across the kept fragments
    pub match_count: usize,
    /// Fragments found before keeping the top ones
    pub total_fragments: usize,
}

/// Extract ranked fragments of `text` for the lowercased query `terms`
pub fn highlight(text: &str, terms: &[String], options: &HighlightOptions) -> Highlight {
    let tokens = Analyzer::keep_all().tokens(text);
    let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

    let starts_with_term = |t: &str| terms.iter().any(|term| t.starts_with(term.as_str()));
    let mut matched: Vec<bool> = if options.prefix {
        tokens.iter().map(|t| starts_with_term(&t.text)).collect()
    } else {
        tokens.iter().map(|t| terms.contains(&t.text)).collect()
    };
    if !matched.iter().any(|m| *m) {
        matched = tokens.iter().map(|t| starts_with_term(&t.text)).collect();
    }

    let windows = fragment::context_windows(
        text,
        &tokens,
        &matched,
        options.maxchars,
        options.surround,
    );
    let total_fragments = windows.len();

    let mut fragments: Vec<Fragment> = fragment::top_windows(windows, options.top)
        .into_iter()
        .map(|w| w.into_fragment(text))
        .collect();

    if options.phrase {
        fragments = fragment::prune_phrase(fragments, &terms);
    }

    if fragments.is_empty() {
        return Highlight {
            snippet: fragment::truncate(text, &tokens, options.maxchars),
            fragments,
            match_count: 0,
            total_fragments,
        };
    }

    let snippet = fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(ELLIPSIS);
    let match_count = fragments.iter().map(Fragment::match_count).sum();

    Highlight {
        snippet,
        fragments,
        match_count,
        total_fragments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    const SHIELD: &str = "All Waves, Rise now and Become my Shield";

    #[test]
    fn test_single_match_single_fragment() {
        let hl = highlight(SHIELD, &terms(&["shield"]), &HighlightOptions::default());
        assert_eq!(hl.fragments.len(), 1);
        let fragment = &hl.fragments[0];
        assert_eq!(fragment.matches.len(), 1);
        let matched: Vec<&str> = fragment.matched_text().collect();
        assert!(matched[0].eq_ignore_ascii_case("shield"));
        assert!(hl.snippet.contains("Shield"));
        assert_eq!(hl.match_count, 1);
    }

    #[test]
    fn test_phrase_requires_adjacent_terms() {
        let filler = "lorem ".repeat(30);
        let text = format!("alpha {filler}beta");
        let options = HighlightOptions::default().with_limits(None, Some(20));

        let hl = highlight(&text, &terms(&["alpha", "beta"]), &options.with_phrase(true));
        assert!(hl.fragments.is_empty());
        assert_eq!(hl.match_count, 0);
        assert!(!hl.snippet.is_empty());

        let hl = highlight(&text, &terms(&["alpha", "beta"]), &options);
        assert_eq!(hl.fragments.len(), 2);
        assert_eq!(hl.match_count, 2);
    }

    #[test]
    fn test_adjacent_phrase_kept() {
        let hl = highlight(
            SHIELD,
            &terms(&["all", "waves"]),
            &HighlightOptions::default().with_phrase(true),
        );
        assert_eq!(hl.fragments.len(), 1);
        let matched: Vec<&str> = hl.fragments[0].matched_text().collect();
        assert_eq!(matched, vec!["All Waves"]);
    }

    #[test]
    fn test_word_start_fallback() {
        let hl = highlight(SHIELD, &terms(&["shi"]), &HighlightOptions::default());
        assert_eq!(hl.fragments.len(), 1);
        assert_eq!(hl.fragments[0].matched_text().next(), Some("Shield"));
    }

    #[test]
    fn test_prefix_mode() {
        let text = "rankle the rain then rise";
        let hl = highlight(text, &terms(&["ra"]), &HighlightOptions::default().with_prefix(true));
        assert_eq!(hl.match_count, 2);
    }

    #[test]
    fn test_no_match_truncates() {
        let text = "word ".repeat(100);
        let options = HighlightOptions::default().with_limits(Some(22), None);
        let hl = highlight(&text, &terms(&["absent"]), &options);
        assert!(hl.fragments.is_empty());
        assert_eq!(hl.snippet, "word word word word...");
    }

    #[test]
    fn test_top_n_limit() {
        let filler = "lorem ".repeat(20);
        let text = (0..8).map(|_| format!("fire {filler}")).collect::<String>();
        let options = HighlightOptions::default().with_limits(None, Some(10));
        let hl = highlight(&text, &terms(&["fire"]), &options);
        assert_eq!(hl.total_fragments, 8);
        assert_eq!(hl.fragments.len(), 5);
        assert_eq!(hl.snippet.matches(ELLIPSIS).count(), 4);
    }
}
