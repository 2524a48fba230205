//! Context-window fragmenting over matched tokens.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::utils::Token;

/// Byte range of a match, relative to its fragment text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRange {
    pub start: usize,
    pub end: usize,
}

impl MatchRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A piece of document text with the matched ranges inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub matches: Vec<MatchRange>,
}

impl Fragment {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Text of each match
    pub fn matched_text(&self) -> impl Iterator<Item = &str> {
        self.matches.iter().map(|m| &self.text[m.start..m.end])
    }
}

/// Fragment span in document coordinates
#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub start: usize,
    pub end: usize,
    pub matches: Vec<(usize, usize)>,
}

impl Window {
    fn score(&self) -> f32 {
        let count = self.matches.len() as f32;
        let len = (self.end - self.start).max(1) as f32;
        count + count / len
    }

    pub fn into_fragment(self, text: &str) -> Fragment {
        Fragment {
            text: text[self.start..self.end].to_string(),
            matches: self
                .matches
                .iter()
                .map(|&(s, e)| MatchRange::new(s - self.start, e - self.start))
                .collect(),
        }
    }
}

/// Group matched tokens into context windows.
///
/// A window opens `surround` bytes before its first match, snapped forward
/// to a token start, and closes `surround` bytes after its last match,
/// snapped back to a token end. A following match joins the window while
/// it lies within the trailing context and the window stays within
/// `maxchars`.
pub(crate) fn context_windows(
    text: &str,
    tokens: &[Token],
    matched: &[bool],
    maxchars: usize,
    surround: usize,
) -> Vec<Window> {
    let hits: Vec<(usize, usize)> = tokens
        .iter()
        .zip(matched)
        .filter(|(_, m)| **m)
        .map(|(t, _)| (t.start, t.end))
        .collect();

    let mut windows = Vec::new();
    let mut i = 0;
    while i < hits.len() {
        let (first_start, first_end) = hits[i];
        let start = snap_start(tokens, first_start.saturating_sub(surround), first_start);
        let mut matches = vec![(first_start, first_end)];
        let mut last_end = first_end;

        i += 1;
        while i < hits.len() {
            let (s, e) = hits[i];
            if s > last_end + surround || e - start > maxchars {
                break;
            }
            matches.push((s, e));
            last_end = e;
            i += 1;
        }

        let limit = (last_end + surround).min(start + maxchars.max(last_end - start));
        let end = snap_end(tokens, text.len(), limit, last_end);
        windows.push(Window {
            start,
            end,
            matches,
        });
    }

    windows
}

/// First token start at or after `from`, never past `anchor`
fn snap_start(tokens: &[Token], from: usize, anchor: usize) -> usize {
    if from == 0 {
        return 0;
    }
    tokens
        .iter()
        .map(|t| t.start)
        .find(|&s| s >= from)
        .map_or(anchor, |s| s.min(anchor))
}

/// Last token end at or before `to`, never before `anchor`
fn snap_end(tokens: &[Token], text_len: usize, to: usize, anchor: usize) -> usize {
    if to >= text_len {
        return text_len;
    }
    tokens
        .iter()
        .map(|t| t.end)
        .take_while(|&e| e <= to)
        .last()
        .map_or(anchor, |e| e.max(anchor))
}

/// Best `top` windows by score, returned in document order
pub(crate) fn top_windows(mut windows: Vec<Window>, top: usize) -> Vec<Window> {
    // stable sort keeps earlier windows ahead on ties
    windows.sort_by(|a, b| b.score().total_cmp(&a.score()));
    windows.truncate(top);
    windows.retain(|w| !w.matches.is_empty());
    windows.sort_by_key(|w| w.start);
    windows
}

/// Keep fragments holding the terms as adjacent words, separated only by
/// punctuation or whitespace. Their matches become the phrase spans.
pub(crate) fn prune_phrase(fragments: Vec<Fragment>, terms: &[String]) -> Vec<Fragment> {
    if terms.len() < 2 {
        return fragments;
    }

    let pattern = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join(r"[\W_]+");
    let Ok(phrase) = RegexBuilder::new(&format!(r"\b{}\b", pattern))
        .case_insensitive(true)
        .build()
    else {
        return Vec::new();
    };

    fragments
        .into_iter()
        .filter(|f| f.matches.len() >= terms.len())
        .filter_map(|mut f| {
            let spans: Vec<MatchRange> = phrase
                .find_iter(&f.text)
                .map(|m| MatchRange::new(m.start(), m.end()))
                .collect();
            if spans.is_empty() {
                return None;
            }
            f.matches = spans;
            Some(f)
        })
        .collect()
}

/// Cut text at the last token ending within `maxchars` bytes and mark the cut
pub(crate) fn truncate(text: &str, tokens: &[Token], maxchars: usize) -> String {
    if text.len() <= maxchars {
        return text.to_string();
    }

    let cut = tokens
        .iter()
        .map(|t| t.end)
        .take_while(|&e| e <= maxchars)
        .last()
        .unwrap_or_else(|| floor_char_boundary(text, maxchars));
    format!("{}...", text[..cut].trim_end())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Analyzer;

    fn windows_for(text: &str, term: &str, maxchars: usize, surround: usize) -> Vec<Window> {
        let tokens = Analyzer::keep_all().tokens(text);
        let matched: Vec<bool> = tokens.iter().map(|t| t.text == term).collect();
        context_windows(text, &tokens, &matched, maxchars, surround)
    }

    #[test]
    fn test_window_snaps_to_tokens() {
        let text = "one two three four five six seven";
        let windows = windows_for(text, "four", 300, 6);
        assert_eq!(windows.len(), 1);
        let w = &windows[0];
        assert_eq!(&text[w.start..w.end], "three four five");
    }

    #[test]
    fn test_close_matches_share_a_window() {
        let text = "fire and fire again";
        let windows = windows_for(text, "fire", 300, 10);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].matches.len(), 2);
    }

    #[test]
    fn test_distant_matches_split() {
        let filler = "word ".repeat(40);
        let text = format!("fire {}fire", filler);
        let windows = windows_for(&text, "fire", 300, 10);
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn test_top_windows_document_order() {
        let filler = "word ".repeat(40);
        let text = format!("fire {filler}ice ice {filler}fire");
        let tokens = Analyzer::keep_all().tokens(&text);
        let matched: Vec<bool> = tokens.iter().map(|t| t.text == "ice" || t.text == "fire").collect();
        let windows = context_windows(&text, &tokens, &matched, 300, 10);
        assert_eq!(windows.len(), 3);

        let best = top_windows(windows, 2);
        assert_eq!(best.len(), 2);
        assert!(best[0].start < best[1].start);
        assert_eq!(best[0].matches.len(), 1);
        assert_eq!(best[1].matches.len(), 2);
    }

    #[test]
    fn test_prune_phrase() {
        let frag = |text: &str| Fragment {
            text: text.to_string(),
            matches: vec![MatchRange::new(0, 1), MatchRange::new(2, 3)],
        };
        let terms = vec!["all".to_string(), "waves".to_string()];

        let kept = prune_phrase(vec![frag("All, waves rise"), frag("all the waves")], &terms);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].matched_text().collect::<Vec<_>>(), vec!["All, waves"]);
    }

    #[test]
    fn test_truncate() {
        let text = "alpha beta gamma delta";
        let tokens = Analyzer::keep_all().tokens(text);
        assert_eq!(truncate(text, &tokens, 100), text);
        assert_eq!(truncate(text, &tokens, 12), "alpha beta...");
    }
}
