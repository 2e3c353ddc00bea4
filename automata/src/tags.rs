//! Category tagging for service listings.
//!
//! Tags are derived during sync from a listing's name and metadata URL. The
//! derivation is pluggable through [`TagExtractor`]; the default
//! [`KeywordTagger`] performs substring matching against a fixed vocabulary.

/// Tag assigned when no keyword matches.
pub const FALLBACK_TAG: &str = "general";

/// Vocabulary used by [`KeywordTagger::default`].
const DEFAULT_VOCABULARY: &[(&str, &[&str])] = &[
    ("ai", &["gpt", "llm", "claude"]),
    ("image", &["image", "diffusion", "dalle"]),
    ("audio", &["audio", "whisper", "tts"]),
    ("data", &["data", "analytics"]),
    ("nlp", &["sentiment", "nlp"]),
];

/// Derives category tags for a listing.
pub trait TagExtractor: Send + Sync {
    /// Returns lowercase tags for a listing with the given name and metadata URL.
    fn extract(&self, name: &str, metadata_url: &str) -> Vec<String>;
}

impl<F> TagExtractor for F
where
    F: Fn(&str, &str) -> Vec<String> + Send + Sync,
{
    fn extract(&self, name: &str, metadata_url: &str) -> Vec<String> {
        self(name, metadata_url)
    }
}

/// Keyword containment tagger.
///
/// Each category fires when any of its keywords occurs in the lowercased
/// concatenation of metadata URL and name. Categories are reported in
/// vocabulary order; [`FALLBACK_TAG`] is used when none fires.
#[derive(Debug, Clone)]
pub struct KeywordTagger {
    vocabulary: Vec<(String, Vec<String>)>,
    fallback: String,
}

impl Default for KeywordTagger {
    fn default() -> Self {
        Self::new(DEFAULT_VOCABULARY.iter().copied())
    }
}

impl KeywordTagger {
    /// Builds a tagger from `(tag, keywords)` pairs.
    pub fn new<'a, I>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let vocabulary = vocabulary
            .into_iter()
            .map(|(tag, keywords)| {
                (
                    tag.to_ascii_lowercase(),
                    keywords.iter().map(|k| k.to_ascii_lowercase()).collect(),
                )
            })
            .collect();
        Self {
            vocabulary,
            fallback: FALLBACK_TAG.to_owned(),
        }
    }

    /// Replaces the catch-all tag.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into().to_ascii_lowercase();
        self
    }
}

impl TagExtractor for KeywordTagger {
    fn extract(&self, name: &str, metadata_url: &str) -> Vec<String> {
        let haystack = format!("{metadata_url}{name}").to_lowercase();
        let mut tags: Vec<String> = self
            .vocabulary
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|(tag, _)| tag.clone())
            .collect();
        if tags.is_empty() {
            tags.push(self.fallback.clone());
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_tagger_matches_name_and_url() {
        let tagger = KeywordTagger::default();
        assert_eq!(tagger.extract("GPT-4 proxy", "https://x.io"), vec!["ai"]);
        assert_eq!(
            tagger.extract("whisper", "https://data.example.com"),
            vec!["audio", "data"]
        );
    }

    #[test]
    fn test_keyword_tagger_fallback() {
        let tagger = KeywordTagger::default();
        assert_eq!(tagger.extract("weather", "https://w.io"), vec![FALLBACK_TAG]);
        let tagger = tagger.with_fallback("Misc");
        assert_eq!(tagger.extract("weather", "https://w.io"), vec!["misc"]);
    }

    #[test]
    fn test_closure_extractor() {
        let extractor = |name: &str, _: &str| vec![name.to_ascii_lowercase()];
        assert_eq!(extractor.extract("Echo", ""), vec!["echo"]);
    }
}
