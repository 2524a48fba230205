use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Maximum token length to store in the index.
/// Longer tokens are usually base64 blobs, hashes or URLs.
const MAX_TOKEN_LENGTH: usize = 128;

/// Default minimum token length kept by the word analyzer
pub const DEFAULT_MIN_TOKEN_LENGTH: usize = 2;

/// Words with optional embedded dots (`v1.2`, `e.g`)
const WORD_PATTERN: &str = r"\w+(\.?\w+)*";

fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| Regex::new(WORD_PATTERN).expect("word pattern is a valid regex"))
}

/// A token with its position and byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lowercased token text
    pub text: String,
    /// Ordinal position among kept tokens
    pub position: u32,
    /// Byte offset of the token start in the source text
    pub start: usize,
    /// Byte offset one past the token end
    pub end: usize,
}

/// Word analyzer: regex words, lowercased, short tokens and stop words dropped
#[derive(Debug, Clone)]
pub struct Analyzer {
    min_len: usize,
    stop_words: HashSet<String>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_TOKEN_LENGTH,
            stop_words: HashSet::new(),
        }
    }
}

impl Analyzer {
    pub fn new(stop_words: &[String]) -> Self {
        Self {
            min_len: DEFAULT_MIN_TOKEN_LENGTH,
            stop_words: stop_words.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Analyzer that keeps every word (used when re-tokenizing for highlights)
    pub fn keep_all() -> Self {
        Self {
            min_len: 1,
            stop_words: HashSet::new(),
        }
    }

    /// Tokenize text into lowercased words with positions and byte spans
    pub fn tokens(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for m in word_regex().find_iter(text) {
            let word = m.as_str();
            let len = word.chars().count();
            if len < self.min_len || word.len() > MAX_TOKEN_LENGTH {
                continue;
            }

            let lower = word.to_lowercase();
            if self.stop_words.contains(&lower) {
                continue;
            }

            tokens.push(Token {
                text: lower,
                position,
                start: m.start(),
                end: m.end(),
            });
            position += 1;
        }

        tokens
    }

    /// Token texts only
    pub fn words(&self, text: &str) -> Vec<String> {
        self.tokens(text).into_iter().map(|t| t.text).collect()
    }
}

/// Word-start n-grams for typeahead matching.
///
/// For each word, emits every prefix with a length between `min` and `max`
/// characters. Words shorter than `min` produce nothing.
pub fn word_ngrams(text: &str, min: usize, max: usize) -> Vec<String> {
    let mut grams = Vec::new();
    let min = min.max(1);

    for m in word_regex().find_iter(text) {
        let lower = m.as_str().to_lowercase();
        let boundaries: Vec<usize> = lower
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(lower.len()))
            .collect();

        for (count, &end) in boundaries.iter().enumerate() {
            let chars = count + 1;
            if chars < min {
                continue;
            }
            if chars > max {
                break;
            }
            grams.push(lower[..end].to_string());
        }
    }

    grams
}

/// Truncate a query word to at most `max` characters for n-gram lookup
pub fn truncate_chars(word: &str, max: usize) -> &str {
    match word.char_indices().nth(max) {
        Some((idx, _)) => &word[..idx],
        None => word,
    }
}

/// Split keyword-style values on commas and whitespace, lowercased and deduped
pub fn split_keywords<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for value in values {
        for part in value
            .as_ref()
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
        {
            let lower = part.to_lowercase();
            if seen.insert(lower.clone()) {
                result.push(lower);
            }
        }
    }

    result
}

/// Characters that continue a word for boundary checks
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
