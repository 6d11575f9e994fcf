use unicode_segmentation::UnicodeSegmentation;

use crate::text_unit::{TextUnit, estimate_tokens};

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 600,
            overlap_tokens: 100,
        }
    }
}

/// Splits a document into sentence-aligned text units with trailing overlap.
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    pub fn split(&self, document_id: &str, text: &str) -> Vec<TextUnit> {
        let sentences: Vec<&str> = text
            .unicode_sentences()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut units = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_tokens = 0;
        // Sentences carried over from the previous unit; they alone never make a unit.
        let mut carried = 0;

        for sentence in sentences {
            let tokens = estimate_tokens(sentence);

            if window_tokens + tokens > self.config.max_tokens && window.len() > carried {
                units.push(TextUnit::new(document_id, units.len(), window.join(" ")));

                let overlap = self.overlap(&window);
                window = overlap;
                window_tokens = window.iter().map(|s| estimate_tokens(s)).sum();

                // Drop the overlap when it would not leave room for the next sentence.
                if window_tokens + tokens > self.config.max_tokens {
                    window.clear();
                    window_tokens = 0;
                }
                carried = window.len();
            }

            window.push(sentence);
            window_tokens += tokens;
        }

        if window.len() > carried {
            units.push(TextUnit::new(document_id, units.len(), window.join(" ")));
        }

        units
    }

    fn overlap<'a>(&self, window: &[&'a str]) -> Vec<&'a str> {
        let mut kept = Vec::new();
        let mut tokens = 0;

        for sentence in window.iter().rev() {
            let sentence_tokens = estimate_tokens(sentence);
            if tokens + sentence_tokens > self.config.overlap_tokens {
                break;
            }
            tokens += sentence_tokens;
            kept.push(*sentence);
        }

        kept.reverse();
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_document_is_one_unit() {
        let splitter = TextSplitter::new(SplitterConfig::default());
        let units = splitter.split("doc-1", "Alice met Bob. Bob works at Acme.");

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].document_id, "doc-1");
        assert_eq!(units[0].text, "Alice met Bob. Bob works at Acme.");
    }

    #[test]
    fn long_document_respects_budget_and_overlaps() {
        let splitter = TextSplitter::new(SplitterConfig {
            max_tokens: 10,
            overlap_tokens: 3,
        });
        // Each sentence is two words, three tokens.
        let text = "Alpha one. Beta two. Gamma three. Delta four. Epsilon five.";
        let units = splitter.split("doc", text);

        assert!(units.len() > 1);
        for unit in &units {
            assert!(unit.estimated_tokens() <= 10, "unit too large: {:?}", unit.text);
        }
        // The last sentence of a unit opens the next one.
        assert_eq!(units[0].text, "Alpha one. Beta two. Gamma three.");
        assert!(units[1].text.starts_with("Gamma three."));
    }

    #[test]
    fn empty_text_has_no_units() {
        let splitter = TextSplitter::new(SplitterConfig::default());
        assert!(splitter.split("doc", "   ").is_empty());
    }
}
