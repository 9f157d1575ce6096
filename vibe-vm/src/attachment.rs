//! File attachments for commands
//!
//! Binary kinds (PDF, images) travel inline as base64 with their MIME type;
//! everything else is read as UTF-8 text and inlined with a short preamble.
//! Either way a file may not exceed [`MAX_ATTACHMENT_BYTES`].

use crate::error::{self, Result};
use crate::prompts;
use crate::provider::Part;
use base64::Engine;
use std::path::Path;

/// 20 MiB, the service's limit for inline payloads
pub const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// MIME type for files sent as binary, `None` for text files
pub fn binary_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Load `filename` as a content part for the outbound turn
pub fn load(filename: &str) -> Result<Part> {
    let path = Path::new(filename);
    match binary_mime_type(path) {
        Some(mime_type) => {
            let bytes = read_bytes(path)?;
            Ok(Part::InlineData {
                mime_type: mime_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        }
        None => {
            let contents = read_text(path)?;
            Ok(Part::text(prompts::text_file(filename, &contents)))
        }
    }
}

/// Read a text file, enforcing the size limit
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = read_bytes(path)?;
    String::from_utf8(bytes).map_err(|e| {
        error::attachment_error(path.display().to_string(), "file is not valid UTF-8 text").set_source(e)
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let name = path.display().to_string();
    let metadata = std::fs::metadata(path)
        .map_err(|e| error::attachment_error(&name, format!("file not found: {}", name)).set_source(e))?;

    if !metadata.is_file() {
        return Err(error::attachment_error(&name, format!("not a regular file: {}", name)));
    }
    if metadata.len() > MAX_ATTACHMENT_BYTES {
        return Err(error::attachment_error(
            &name,
            format!(
                "file size {} bytes exceeds the {} byte limit",
                metadata.len(),
                MAX_ATTACHMENT_BYTES
            ),
        ));
    }

    std::fs::read(path).map_err(|e| {
        error::attachment_error(&name, format!("failed to read {}: {}", name, e)).set_source(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_text_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Notes\nbuy milk").unwrap();

        let part = load(path.to_str().unwrap()).unwrap();
        let text = part.as_text().unwrap();
        assert!(text.contains("full contents of the file"));
        assert!(text.contains("buy milk"));
    }

    #[test]
    fn test_pdf_attachment_is_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.PDF");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        match load(path.to_str().unwrap()).unwrap() {
            Part::InlineData { mime_type, data } => {
                assert_eq!(mime_type, "application/pdf");
                assert_eq!(data, "JVBERi0xLjQ=");
            }
            other => panic!("expected inline data, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load("/definitely/not/here.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AttachmentError);
        assert_eq!(err.context_value("file"), Some("/definitely/not/here.txt"));
    }

    #[test]
    fn test_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.pdf");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_ATTACHMENT_BYTES + 1).unwrap();

        let err = load(path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AttachmentError);
        assert!(err.message().contains("exceeds"));
    }

    #[test]
    fn test_exactly_at_limit_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.bin");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_ATTACHMENT_BYTES).unwrap();

        // zero bytes are valid UTF-8, so this loads as (a very dull) text file
        assert!(load(path.to_str().unwrap()).is_ok());
    }
}
