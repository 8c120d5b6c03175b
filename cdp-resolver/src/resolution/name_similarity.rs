//! Name normalization and similarity scoring for fuzzy matching

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Case-fold, strip diacritics and punctuation, collapse whitespace.
///
/// "Nguyễn  Văn-Đức" → "nguyen van duc"
pub fn normalize_name(raw: &str) -> String {
    let folded: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            // Stroke letters have no decomposition
            'đ' | 'Đ' => 'd',
            'ł' | 'Ł' => 'l',
            'ø' | 'Ø' => 'o',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized "first last", or `None` unless both parts survive normalization
pub fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let first = normalize_name(first?);
    let last = normalize_name(last?);
    if first.is_empty() || last.is_empty() {
        return None;
    }
    Some(format!("{} {}", first, last))
}

/// Stored lookup key for a city, compared verbatim by the fuzzy prefilter
pub fn city_key(city: &str) -> Option<String> {
    Some(normalize_name(city)).filter(|key| !key.is_empty())
}

/// Stored lookup key for a name: first character of the normalized last name.
///
/// Candidates are narrowed on it before the candidate limit applies.
pub fn name_key(last_name: &str) -> Option<String> {
    normalize_name(last_name).chars().next().map(String::from)
}

/// Jaro-Winkler similarity of two already-normalized names, in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b)
}
