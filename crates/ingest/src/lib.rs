pub mod reader;
pub mod splitter;
pub mod text_unit;

pub use reader::FileReader;
pub use splitter::{SplitterConfig, TextSplitter};
pub use text_unit::{TextUnit, estimate_tokens};

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Read a file or a directory tree and split it into text units.
///
/// Units are ordered by document path, then by position within the document.
pub async fn ingest_path(path: &Path, config: SplitterConfig) -> Result<Vec<TextUnit>> {
    let files = if path.is_dir() {
        FileReader::read_directory(path).await?
    } else {
        let content = FileReader::read_file(path).await?;
        vec![(path.to_string_lossy().to_string(), content)]
    };

    let splitter = TextSplitter::new(config);
    let mut units = Vec::new();

    for (path, content) in &files {
        let doc_id = generate_doc_id(path);
        units.extend(splitter.split(&doc_id, content));
    }

    info!(documents = files.len(), text_units = units.len(), "Ingested documents");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingest_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "Alice founded Acme. Bob joined later.").unwrap();

        let units = ingest_path(&file, SplitterConfig::default()).await.unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].document_id, generate_doc_id(&file.to_string_lossy()));
    }
}
