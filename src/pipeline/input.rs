//! Input resolution: turn a path, URL or upload into validated PDF bytes.
//!
//! pdfium reads from a byte slice, so URL inputs are downloaded into memory
//! and local files are read whole. Every input is checked for the `%PDF`
//! magic bytes before it reaches pdfium so callers get a meaningful error
//! instead of a parser failure.

use crate::error::Book2CourseError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// PDF bytes plus the name they came from.
#[derive(Debug, Clone)]
pub struct LoadedPdf {
    /// File name (last path or URL segment).
    pub name: String,
    pub bytes: Vec<u8>,
}

impl LoadedPdf {
    /// The file name without its extension, if any.
    pub fn stem(&self) -> Option<String> {
        file_stem(&self.name)
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// `"notes/week1.pdf"` → `"week1"`.
pub fn file_stem(name: &str) -> Option<String> {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read a local path or download a URL, rejecting non-PDF content.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedPdf, Book2CourseError> {
    let loaded = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_magic(&loaded.name, &loaded.bytes)?;
    Ok(loaded)
}

/// Validate an uploaded file: `.pdf` name, size limit and magic bytes.
pub fn validate_upload(
    filename: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<(), Book2CourseError> {
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(Book2CourseError::InvalidInput {
            input: filename.to_string(),
            reason: "Only PDF files are allowed".to_string(),
        });
    }
    if bytes.len() > max_bytes {
        return Err(Book2CourseError::FileTooLarge {
            size: bytes.len(),
            limit_mb: max_bytes / (1024 * 1024),
        });
    }
    check_magic(filename, bytes)
}

/// Reject content that does not start with `%PDF`.
pub fn check_magic(name: &str, bytes: &[u8]) -> Result<(), Book2CourseError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(Book2CourseError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<LoadedPdf, Book2CourseError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            Book2CourseError::PermissionDenied { path: path.clone() }
        }
        _ => Book2CourseError::FileNotFound { path: path.clone() },
    })?;
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    Ok(LoadedPdf { name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedPdf, Book2CourseError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Book2CourseError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Book2CourseError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Book2CourseError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Book2CourseError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Book2CourseError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(LoadedPdf {
        name: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.org/books/rust.pdf?dl=1"), "rust.pdf");
        assert_eq!(filename_from_url("https://x.org/download/"), "downloaded.pdf");
    }

    #[test]
    fn stem_strips_directories_and_extension() {
        assert_eq!(file_stem("notes/week1.pdf").as_deref(), Some("week1"));
        assert_eq!(file_stem(""), None);
    }

    #[test]
    fn upload_validation() {
        let pdf = b"%PDF-1.7 rest".to_vec();
        assert!(validate_upload("a.PDF", &pdf, 1024).is_ok());
        assert!(matches!(
            validate_upload("a.docx", &pdf, 1024),
            Err(Book2CourseError::InvalidInput { .. })
        ));
        assert!(matches!(
            validate_upload("a.pdf", &pdf, 4),
            Err(Book2CourseError::FileTooLarge { size: 13, .. })
        ));
        match validate_upload("a.pdf", b"PK\x03\x04zip", 1024) {
            Err(Book2CourseError::NotAPdf { magic, .. }) => assert_eq!(magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = load_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, Book2CourseError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_magic_is_checked() {
        let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        f.write_all(b"hello world").unwrap();
        let err = load_input(f.path().to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, Book2CourseError::NotAPdf { .. }));

        let mut ok = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        ok.write_all(b"%PDF-1.4\n").unwrap();
        let loaded = load_input(ok.path().to_str().unwrap(), 5).await.unwrap();
        assert!(loaded.name.ends_with(".pdf"));
        assert_eq!(loaded.bytes.len(), 9);
    }
}
