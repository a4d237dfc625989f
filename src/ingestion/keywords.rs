//! Keyword Extraction
//!
//! Cheap, deterministic keyword sets for sections, chunks and tables. Domain
//! terms from wargame rulebooks are recognised by their word forms so that
//! "Injuries" and "injury" land on the same keyword. Only whole words count:
//! "prevent" is not an event and "skilled" is not a skill.

use std::collections::{BTreeMap, BTreeSet};

/// Domain terms and the lowercase word forms that signal them.
pub const DOMAIN_TERMS: &[(&str, &[&str])] = &[
    ("injury", &["injury", "injuries"]),
    ("exploration", &["exploration", "explorations"]),
    ("advancement", &["advancement", "advancements", "advance", "advances"]),
    ("skill", &["skill", "skills"]),
    ("loot", &["loot"]),
    ("encounter", &["encounter", "encounters"]),
    ("event", &["event", "events"]),
    ("critical", &["critical", "criticals"]),
    ("fumble", &["fumble", "fumbles"]),
    ("misfire", &["misfire", "misfires"]),
    ("weapon", &["weapon", "weapons"]),
    ("armour", &["armour", "armor", "armours", "armors"]),
    ("equipment", &["equipment"]),
    ("spell", &["spell", "spells"]),
];

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "been", "before", "being", "below",
    "between", "both", "cannot", "could", "does", "doing", "down", "during", "each", "either",
    "every", "from", "further", "have", "having", "here", "into", "just", "less", "more", "most",
    "must", "only", "other", "over", "same", "should", "some", "such", "than", "that", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "under", "until", "upon",
    "very", "were", "what", "when", "where", "which", "while", "will", "with", "within", "without",
    "would", "your",
];

/// Domain terms with a word form appearing as a whole word in `text`.
pub fn domain_terms(text: &str) -> BTreeSet<String> {
    let words: BTreeSet<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    DOMAIN_TERMS
        .iter()
        .filter(|(_, forms)| forms.iter().any(|form| words.contains(*form)))
        .map(|(term, _)| term.to_string())
        .collect()
}

/// Lowercase alphabetic words longer than three characters, in order of appearance.
pub fn significant_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphabetic() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() > 3)
        .collect()
}

/// Domain terms plus the most frequent non-stop-words of `text`, capped at `limit`.
///
/// Ties are broken alphabetically so the result is stable across runs.
pub fn extract_keywords(text: &str, limit: usize) -> BTreeSet<String> {
    let mut keywords = domain_terms(text);

    let mut frequency: BTreeMap<String, usize> = BTreeMap::new();
    for word in significant_words(text) {
        if STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        *frequency.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    for (word, _) in ranked {
        if keywords.len() >= limit {
            break;
        }
        keywords.insert(word);
    }
    keywords
}
