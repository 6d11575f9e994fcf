use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A bounded span of source text, the unit of entity extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub document_id: String,
    pub text: String,
}

impl TextUnit {
    /// Build a text unit whose id is derived from its document, position and content.
    pub fn new(document_id: impl Into<String>, ordinal: usize, text: impl Into<String>) -> Self {
        let document_id = document_id.into();
        let text = text.into();
        let id = Self::generate_id(&document_id, ordinal, &text);

        Self {
            id,
            document_id,
            text,
        }
    }

    /// Build a text unit with an externally assigned id.
    pub fn with_id(
        id: impl Into<String>,
        document_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            text: text.into(),
        }
    }

    fn generate_id(document_id: &str, ordinal: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(ordinal.to_le_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Rough token estimate: 1.3 tokens per whitespace-separated word, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count * 13).div_ceil(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_position_sensitive() {
        let a = TextUnit::new("doc", 0, "same text");
        let b = TextUnit::new("doc", 0, "same text");
        let c = TextUnit::new("doc", 1, "same text");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }
}
