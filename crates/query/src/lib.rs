pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod local_search;
pub mod relationships;
pub mod scoring;
pub mod text_units;

pub use config::LocalSearchConfig;
pub use context::{ContextSelectionResult, ContextSelector};
pub use entities::{EntitiesSelector, ScoredEntity};
pub use error::{SearchError, SelectionError};
pub use local_search::{LocalSearch, LocalSearchPromptBuilder, LocalSearchResult, SearchTrace};
pub use relationships::RelationshipsSelector;
pub use scoring::{EmbeddingSimilarityScorer, EntityScorer, KeywordOverlapScorer};
pub use text_units::TextUnitsSelector;
