//! Attachment files on disk

use super::{Attachment, AttachmentReader, AttachmentSlice};
use crate::error::StoreError;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

const MIME_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("webp", "image/webp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("json", "application/json"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("zip", "application/zip"),
];

/// Guess a MIME type from a file name's extension
pub fn guess_mime_type(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// Reads attachment files under a root directory
///
/// Relative paths that resolve outside the root (through `..` or a
/// symlink) are reported as not found.
#[derive(Debug, Clone)]
pub struct FsAttachmentReader {
    root: PathBuf,
}

impl FsAttachmentReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve(&self, attachment: &Attachment) -> Result<PathBuf, StoreError> {
        let not_found = || StoreError::not_found("attachment file", &attachment.relative_path);

        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            StoreError::Unavailable(format!(
                "attachment root {} unreadable: {}",
                self.root.display(),
                e
            ))
        })?;
        let target = match tokio::fs::canonicalize(root.join(&attachment.relative_path)).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        if !target.starts_with(&root) {
            warn!(
                attachment_id = attachment.id,
                "Attachment path escapes the attachment root"
            );
            return Err(not_found());
        }
        if !target.is_file() {
            return Err(not_found());
        }
        Ok(target)
    }
}

#[async_trait]
impl AttachmentReader for FsAttachmentReader {
    async fn size(&self, attachment: &Attachment) -> Result<u64, StoreError> {
        let path = self.resolve(attachment).await?;
        Ok(tokio::fs::metadata(&path).await?.len())
    }

    async fn read_range(
        &self,
        attachment: &Attachment,
        offset: u64,
        length: u64,
    ) -> Result<AttachmentSlice, StoreError> {
        let path = self.resolve(attachment).await?;
        let mut file = tokio::fs::File::open(&path).await?;
        let file_size = file.metadata().await?.len();
        if offset > file_size {
            return Err(StoreError::Invalid(format!(
                "offset {} beyond file size {}",
                offset, file_size
            )));
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let wanted = length.min(file_size - offset);
        let mut bytes = Vec::with_capacity(wanted as usize);
        file.take(wanted).read_to_end(&mut bytes).await?;

        Ok(AttachmentSlice { file_size, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(relative_path: &str) -> Attachment {
        Attachment {
            id: 1,
            record_id: 1,
            stored_name: "a.pdf".into(),
            original_name: "a.pdf".into(),
            relative_path: relative_path.into(),
            file_md5: None,
            file_size: None,
            deleted: false,
        }
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("scan.PDF"), Some("application/pdf"));
        assert_eq!(guess_mime_type("photo.jpeg"), Some("image/jpeg"));
        assert_eq!(guess_mime_type("noext"), None);
        assert_eq!(guess_mime_type("archive.rar"), None);
    }

    #[tokio::test]
    async fn test_read_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("7")).unwrap();
        std::fs::write(dir.path().join("7/a.pdf"), b"hello world").unwrap();

        let reader = FsAttachmentReader::new(dir.path());
        let attachment = meta("7/a.pdf");
        assert_eq!(reader.size(&attachment).await.unwrap(), 11);

        let slice = reader.read_range(&attachment, 6, 100).await.unwrap();
        assert_eq!(slice.bytes, b"world");
        assert_eq!(slice.file_size, 11);

        let slice = reader.read_range(&attachment, 11, 5).await.unwrap();
        assert!(slice.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_escape_is_not_found() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("attachments");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"nope").unwrap();

        let reader = FsAttachmentReader::new(&root);
        for path in ["../secret.txt", "missing.pdf"] {
            assert!(matches!(
                reader.size(&meta(path)).await,
                Err(StoreError::NotFound { .. })
            ));
        }
    }
}
