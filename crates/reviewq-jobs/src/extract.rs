//! Built-in text extraction for plain-text uploads.

use async_trait::async_trait;

use reviewq_core::{Error, ExtractedText, FileMetadata, ProcessMode, Result, TextExtractor};

/// Extractor for UTF-8 text documents (plain text, Markdown, CSV).
///
/// Binary formats and image-mode files need a format-aware extractor and are
/// refused with [`Error::Extraction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, file: &FileMetadata, data: &[u8]) -> Result<ExtractedText> {
        if file.process_mode == ProcessMode::Image {
            return Err(Error::Extraction(format!(
                "{}: image processing is not available",
                file.original_name
            )));
        }
        let text = std::str::from_utf8(data).map_err(|e| {
            Error::Extraction(format!("{} is not UTF-8 text: {e}", file.original_name))
        })?;
        Ok(ExtractedText::text(text.trim_start_matches('\u{feff}')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn file(mode: ProcessMode) -> FileMetadata {
        FileMetadata {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            original_name: "notes.md".to_string(),
            mime_hint: Some("text/markdown".to_string()),
            size_bytes: 3,
            process_mode: mode,
            converted_image_count: 0,
        }
    }

    #[tokio::test]
    async fn test_extracts_utf8_and_strips_bom() {
        let out = PlainTextExtractor
            .extract(&file(ProcessMode::Text), "\u{feff}# Title".as_bytes())
            .await
            .unwrap();
        assert_eq!(out.text, "# Title");
        assert_eq!(out.converted_image_count, 0);
    }

    #[tokio::test]
    async fn test_rejects_binary_and_image_mode() {
        let err = PlainTextExtractor
            .extract(&file(ProcessMode::Text), &[0xff, 0xfe, 0x00])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));

        let err = PlainTextExtractor
            .extract(&file(ProcessMode::Image), b"text")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXTRACTION_FAILED");
    }
}
