//! Edit distances over Unicode scalar values.

/// Levenshtein distance between two strings
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Smallest edit distance between `word` and any prefix of `candidate`.
///
/// This is the distance a typeahead user is "away" from a completion:
/// `prefix_edit_distance("ra", "rankle") == 0`.
pub fn prefix_edit_distance(word: &str, candidate: &str) -> usize {
    let w: Vec<char> = word.chars().collect();
    let c: Vec<char> = candidate.chars().collect();

    if w.is_empty() {
        return 0;
    }

    // Rows over word chars, columns over candidate chars; the answer is the
    // minimum of the last row (word fully consumed, any candidate prefix).
    let mut prev: Vec<usize> = (0..=c.len()).collect();
    let mut curr = vec![0usize; c.len() + 1];

    for (i, &cw) in w.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cc) in c.iter().enumerate() {
            let cost = usize::from(cw != cc);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev.into_iter().min().unwrap_or(w.len())
}

/// Number of leading characters two strings share
pub fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("rage", "rage"), 0);
        assert_eq!(levenshtein("ra", "rankle"), 4);
    }

    #[test]
    fn test_prefix_edit_distance() {
        assert_eq!(prefix_edit_distance("ra", "rankle"), 0);
        assert_eq!(prefix_edit_distance("rab", "rankle"), 1);
        assert_eq!(prefix_edit_distance("ra", "blue"), 2);
        assert_eq!(prefix_edit_distance("shield", "shield"), 0);
    }

    #[test]
    fn test_common_prefix_chars() {
        assert_eq!(common_prefix_chars("rain", "raise"), 3);
        assert_eq!(common_prefix_chars("blue", "rain"), 0);
    }
}
