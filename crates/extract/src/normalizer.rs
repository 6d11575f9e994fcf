use regex::Regex;
use std::sync::LazyLock;

static EDGE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[\s"'`.,!?;:]+|[\s"'`.,!?;:]+$"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Maps surface forms of an entity name to the key used for merging.
///
/// Normalization is a pure function of the input so that merge results do not
/// depend on the order fragments are seen in.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityNormalizer;

impl EntityNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Uppercase, strip surrounding quotes and punctuation, collapse whitespace.
    pub fn normalize(&self, name: &str) -> String {
        let trimmed = EDGE_PUNCTUATION.replace_all(name, "");
        let collapsed = WHITESPACE.replace_all(&trimmed, " ");
        collapsed.to_uppercase()
    }

    /// Entity types follow the same rules as names.
    pub fn normalize_type(&self, entity_type: &str) -> String {
        self.normalize(entity_type)
    }
}
