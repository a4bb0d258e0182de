//! "Did you mean?" suggestions via Levenshtein distance.

/// Maximum edit distance a candidate may have to be suggested.
const MAX_DISTANCE: usize = 2;

/// Maximum number of suggestions attached to an error.
const MAX_SUGGESTIONS: usize = 3;

/// Levenshtein edit distance between `a` and `b`.
///
/// Classic two-row dynamic program over characters.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
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

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// The single closest candidate within [`MAX_DISTANCE`] of `input`, if the
/// minimum is unique.
pub fn closest_match(input: &str, candidates: &[String]) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    let mut tie = false;
    for candidate in candidates {
        if candidate == input {
            continue;
        }
        let d = levenshtein(input, candidate);
        if d > MAX_DISTANCE {
            continue;
        }
        match best {
            Some((_, best_d)) if d > best_d => {}
            Some((_, best_d)) if d == best_d => tie = true,
            _ => {
                best = Some((candidate, d));
                tie = false;
            }
        }
    }
    match best {
        Some((name, _)) if !tie => Some(name.to_string()),
        _ => None,
    }
}

/// Up to three candidates within [`MAX_DISTANCE`], most similar first.
pub fn suggestions_for(input: &str, candidates: &[String]) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .filter(|c| c.as_str() != input)
        .map(|c| (levenshtein(input, c), c))
        .filter(|(d, _)| *d <= MAX_DISTANCE)
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c.clone())
        .collect()
}
