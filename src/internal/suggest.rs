//! Near-miss name suggestions for unresolved tokens.

/// Classic two-row Levenshtein distance.
fn edit_distance(a: &str, b: &str) -> usize {
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
            let substitute = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Registered names within edit distance of `requested`, closest first.
///
/// The threshold scales with the requested name's length so short names only
/// match near-exact candidates; at most three suggestions are returned.
pub(crate) fn suggestions_for(requested: &str, mut candidates: Vec<String>) -> Vec<String> {
    let threshold = (requested.len() / 3).max(1);
    candidates.sort();
    candidates.dedup();

    let mut scored: Vec<(usize, String)> = candidates
        .into_iter()
        .filter(|candidate| candidate != requested)
        .filter_map(|candidate| {
            let distance = edit_distance(requested, &candidate);
            (distance <= threshold).then_some((distance, candidate))
        })
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    scored.truncate(3);
    scored.into_iter().map(|(_, name)| name).collect()
}
