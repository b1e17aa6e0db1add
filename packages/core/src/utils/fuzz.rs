//! Phonetic Search Keys
//!
//! Target nodes carry a precomputed fuzzy-search field so the playback
//! runtime can match misspelled queries without a stemming dependency.
//! Each word of the title and description is reduced to a compact phonetic
//! key: leading character kept, vowels dropped, runs collapsed.

/// Reduce text to whitespace-joined phonetic keys.
pub fn fuzz(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(word_key)
        .collect::<Vec<_>>()
        .join(" ")
}

fn word_key(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut key = String::new();
    let mut last: Option<char> = None;
    for (i, c) in lower.chars().enumerate() {
        let keep = i == 0 || !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u');
        if keep && last != Some(c) {
            key.push(c);
            last = Some(c);
        } else if !keep {
            last = None;
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_vowels_after_the_first_character() {
        assert_eq!(fuzz("hello"), "hl");
        assert_eq!(fuzz("apple"), "apl");
    }

    #[test]
    fn splits_on_non_alphanumeric_and_joins_keys() {
        assert_eq!(fuzz("Intro to Fractions!"), "intr t frctns");
        assert_eq!(fuzz(""), "");
        assert_eq!(fuzz("   "), "");
    }

    #[test]
    fn collapses_repeated_consonants() {
        assert_eq!(fuzz("mississippi"), "mssp");
    }
}
