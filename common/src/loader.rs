use std::path::Path;

use async_trait::async_trait;

use crate::error::RagError;

/// Raw text lifted out of a source file, with per-page texts for paged
/// formats so chunk offsets can be mapped back to page numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub text: String,
    pub pages: Option<Vec<String>>,
}

/// File-format plug-in point. Parsers for rich formats (PDF, DOCX, …) live
/// outside this workspace; [`PlainTextLoader`] covers text and markdown.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, RagError>;
}

/// Default loader: reads the file as UTF-8, no page structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextLoader;

#[async_trait]
impl DocumentLoader for PlainTextLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, RagError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(LoadedDocument { text, pages: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn plain_text_loader_reads_utf8() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "Grüße from the test suite.").expect("write");

        let loaded = PlainTextLoader
            .load(file.path())
            .await
            .expect("load should succeed");
        assert_eq!(loaded.text, "Grüße from the test suite.");
        assert!(loaded.pages.is_none());
    }

    #[tokio::test]
    async fn missing_file_surfaces_io_error() {
        let result = PlainTextLoader.load(Path::new("/nonexistent/abc.txt")).await;
        assert!(matches!(result, Err(RagError::Io(_))));
    }
}
