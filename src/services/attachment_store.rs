//! File-store collaborator: `storeAttachment(bytes, filename) -> {url, category, size}`

use crate::error::{AppError, AppResult};
use crate::models::Attachment;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const EXT_IMAGES: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const EXT_VIDEOS: &[&str] = &["mp4", "mov", "avi", "mkv"];
const EXT_AUDIOS: &[&str] = &["mp3", "wav", "ogg", "m4a"];
const EXT_DOCS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "zip", "rar",
];

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn store(&self, bytes: &[u8], filename: &str) -> AppResult<Attachment>;
    /// Remove a stored file whose message never made it to the store
    async fn discard(&self, attachment: &Attachment) -> AppResult<()>;
}

/// Folder a file lands in, by extension
pub fn category_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let ext = ext.as_str();
    if EXT_IMAGES.contains(&ext) {
        "images"
    } else if EXT_VIDEOS.contains(&ext) {
        "videos"
    } else if EXT_AUDIOS.contains(&ext) {
        "audios"
    } else if EXT_DOCS.contains(&ext) {
        "documents"
    } else {
        "others"
    }
}

fn sanitize(filename: &str) -> AppResult<String> {
    let safe: String = filename
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    if safe.is_empty() || safe == "." || safe == ".." {
        return Err(AppError::invalid("invalid file name"));
    }
    Ok(safe)
}

/// "name.ext", then "name (1).ext", "name (2).ext", ...
fn candidate(filename: &str, attempt: usize) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({attempt}){}", &filename[..dot], &filename[dot..]),
        _ => format!("{filename} ({attempt})"),
    }
}

/// Local-disk store under `root/<category>/`, served at `base_url/uploads/...`
pub struct LocalDiskStore {
    root: PathBuf,
    base_url: String,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AttachmentStore for LocalDiskStore {
    async fn store(&self, bytes: &[u8], filename: &str) -> AppResult<Attachment> {
        let safe_name = sanitize(filename)?;
        let category = category_for(&safe_name);
        let dir = self.root.join(category);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Internal(format!("create upload dir: {e}")))?;

        // create_new makes the existence check and the claim one step
        let mut attempt = 0;
        let (final_name, mut file) = loop {
            let name = candidate(&safe_name, attempt);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(&name))
                .await
            {
                Ok(file) => break (name, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(AppError::Internal(format!("open upload: {e}"))),
            }
        };

        let path = dir.join(&final_name);
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path).await {
                tracing::warn!(error = %cleanup, file = %final_name, "Partial upload left on disk");
            }
            return Err(AppError::Internal(format!("write upload: {e}")));
        }

        tracing::debug!(file = %final_name, category, size = bytes.len(), "Stored attachment");

        Ok(Attachment {
            url: format!("{}/uploads/{category}/{final_name}", self.base_url),
            category: category.to_string(),
            size: bytes.len() as i64,
            file_name: final_name,
        })
    }

    async fn discard(&self, attachment: &Attachment) -> AppResult<()> {
        let file_name = sanitize(&attachment.file_name)?;
        if file_name != attachment.file_name || category_for(&file_name) != attachment.category {
            return Err(AppError::invalid("attachment does not belong to this store"));
        }
        match fs::remove_file(self.root.join(&attachment.category).join(&file_name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Internal(format!("remove upload: {e}"))),
        }
        tracing::debug!(file = %file_name, category = %attachment.category, "Discarded attachment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_extension() {
        assert_eq!(category_for("photo.JPG"), "images");
        assert_eq!(category_for("clip.mkv"), "videos");
        assert_eq!(category_for("note.m4a"), "audios");
        assert_eq!(category_for("report.pdf"), "documents");
        assert_eq!(category_for("archive.tar.gz"), "others");
        assert_eq!(category_for("README"), "others");
    }

    #[test]
    fn candidates_number_before_extension() {
        assert_eq!(candidate("a.pdf", 0), "a.pdf");
        assert_eq!(candidate("a.pdf", 2), "a (2).pdf");
        assert_eq!(candidate("Makefile", 1), "Makefile (1)");
        assert_eq!(candidate(".env", 1), ".env (1)");
    }

    #[test]
    fn path_separators_are_neutralized() {
        assert_eq!(sanitize("../etc/passwd").unwrap(), ".._etc_passwd");
        assert!(sanitize("   ").is_err());
        assert!(sanitize("..").is_err());
    }

    #[tokio::test]
    async fn duplicate_names_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost:8000/");

        let first = store.store(b"one", "report.pdf").await.unwrap();
        let second = store.store(b"two!", "report.pdf").await.unwrap();

        assert_eq!(first.file_name, "report.pdf");
        assert_eq!(second.file_name, "report (1).pdf");
        assert_eq!(second.category, "documents");
        assert_eq!(second.size, 4);
        assert_eq!(
            second.url,
            "http://localhost:8000/uploads/documents/report (1).pdf"
        );
        let on_disk = tokio::fs::read(dir.path().join("documents/report (1).pdf"))
            .await
            .unwrap();
        assert_eq!(on_disk, b"two!");
    }

    #[tokio::test]
    async fn discard_removes_the_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost:8000");

        let stored = store.store(b"png", "photo.png").await.unwrap();
        let path = dir.path().join("images/photo.png");
        assert!(path.exists());

        store.discard(&stored).await.unwrap();
        assert!(!path.exists());
        // already gone is fine
        store.discard(&stored).await.unwrap();

        let escaped = Attachment {
            file_name: "../secret.png".into(),
            ..stored
        };
        assert!(store.discard(&escaped).await.is_err());
    }
}
