//! Fuzzy handle suggestions for not-found errors.

/// Handles similar to `target`, best first. Jaro-Winkler over the full
/// handle; anything below 0.72 is noise and dropped.
pub fn suggest(target: &str, handles: &[String], limit: usize) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = handles
        .iter()
        .map(|h| (strsim::jaro_winkler(target, h), h))
        .filter(|(score, _)| *score >= 0.72)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(_, h)| h.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_misses_are_suggested() {
        let handles = vec![
            "world.garden".to_string(),
            "world.document".to_string(),
            "self.memory".to_string(),
        ];
        let suggestions = suggest("world.gardn", &handles, 3);
        assert_eq!(suggestions.first().map(String::as_str), Some("world.garden"));
    }

    #[test]
    fn unrelated_targets_yield_nothing() {
        let handles = vec!["world.garden".to_string()];
        assert!(suggest("zzzzzz.qqq", &handles, 3).is_empty());
    }
}
