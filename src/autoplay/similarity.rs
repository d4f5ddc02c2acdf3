use std::collections::HashSet;

use super::query::clean_title;

/// Token overlap above which two titles count as the same song.
const JACCARD_THRESHOLD: f64 = 0.8;
/// Containment only counts when the shorter title is at least this long, so
/// "Intro" does not swallow every title that mentions it.
const MIN_CONTAINED_LEN: usize = 5;

/// Lowercased, decoration-free form of a title with punctuation removed.
pub fn normalize(title: &str) -> String {
    clean_title(title)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<&str> = a.split(' ').collect();
    let b: HashSet<&str> = b.split(' ').collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Fuzzy match of two titles already passed through [`normalize`]: equal,
/// one containing the other, or a large token overlap.
pub fn is_similar(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.len() >= MIN_CONTAINED_LEN && long.contains(short) {
        return true;
    }
    jaccard(a, b) >= JACCARD_THRESHOLD
}
