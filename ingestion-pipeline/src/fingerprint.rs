use std::path::Path;

use chrono::{DateTime, Utc};
use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use common::error::RagError;

const READ_BUFFER_BYTES: usize = 8192;

/// Content identity of a source file, computed once per ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub md5: String,
    pub sha256: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Stats the file and feeds both hashers from a single streaming read.
pub async fn fingerprint_file(path: &Path) -> Result<FileFingerprint, RagError> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

    let mut file = tokio::fs::File::open(path).await?;
    let mut md5 = Md5::new();
    let mut sha256 = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER_BYTES];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        md5.update(&buffer[..n]);
        sha256.update(&buffer[..n]);
    }

    Ok(FileFingerprint {
        md5: format!("{:x}", md5.finalize()),
        sha256: format!("{:x}", sha256.finalize()),
        size: metadata.len(),
        modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn hashes_match_known_digests() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "hello world").expect("write");

        let fp = fingerprint_file(file.path()).await.expect("fingerprint");
        assert_eq!(fp.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            fp.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(fp.size, 11);
        assert!(fp.modified.is_some());
    }

    #[tokio::test]
    async fn identical_content_yields_identical_fingerprints() {
        let mut a = tempfile::NamedTempFile::new().expect("temp file");
        let mut b = tempfile::NamedTempFile::new().expect("temp file");
        write!(a, "same bytes").expect("write");
        write!(b, "same bytes").expect("write");

        let fp_a = fingerprint_file(a.path()).await.expect("fingerprint a");
        let fp_b = fingerprint_file(b.path()).await.expect("fingerprint b");
        assert_eq!(fp_a.sha256, fp_b.sha256);
        assert_eq!(fp_a.md5, fp_b.md5);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let result = fingerprint_file(Path::new("/definitely/not/here.txt")).await;
        assert!(matches!(result, Err(RagError::Io(_))));
    }
}
