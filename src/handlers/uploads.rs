use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::feedback::ImageRef;
use crate::llm::media::{detect_mime_type, extension_for_mime};

const MAX_EXTENSION_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub file_name: String,
    pub public_url: String,
}

impl StoredUpload {
    pub fn image_ref(&self) -> ImageRef {
        ImageRef::uploaded(self.path.clone(), self.public_url.clone())
    }
}

/// Writes uploaded photos under fresh random names and reports where they are served.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    public_base_url: String,
}

fn extension_from_filename(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    if extension.is_empty()
        || extension.len() > MAX_EXTENSION_LEN
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(extension.to_string())
}

fn choose_extension(filename: Option<&str>, data: &[u8]) -> String {
    filename
        .and_then(extension_from_filename)
        .or_else(|| {
            detect_mime_type(data)
                .as_deref()
                .and_then(extension_for_mime)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "bin".to_string())
}

impl UploadStore {
    pub fn new(dir: PathBuf, public_base_url: &str) -> Self {
        UploadStore {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.upload_dir.clone(), &config.public_base_url)
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create upload directory {}", self.dir.display()))
    }

    pub async fn save(&self, filename: Option<&str>, data: &[u8]) -> Result<StoredUpload> {
        self.ensure_dir().await?;
        let file_name = format!("{}.{}", Uuid::new_v4(), choose_extension(filename, data));
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write upload {}", path.display()))?;
        info!(
            "Stored upload {:?} ({} bytes) as {}",
            filename.unwrap_or_default(),
            data.len(),
            path.display()
        );
        Ok(StoredUpload {
            public_url: format!("{}/uploads/{}", self.public_base_url, file_name),
            path,
            file_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_text_after_the_last_dot() {
        assert_eq!(choose_extension(Some("holiday.photo.HEIC"), b"x"), "HEIC");
        assert_eq!(choose_extension(Some("portrait.jpg"), b"x"), "jpg");
    }

    #[test]
    fn unsafe_or_missing_extensions_fall_back() {
        let png = [
            0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
        ];
        assert_eq!(choose_extension(Some("../../etc/passwd"), &png), "png");
        assert_eq!(choose_extension(Some("photo./x"), b"plain"), "bin");
        assert_eq!(choose_extension(None, b"plain"), "bin");
    }

    #[tokio::test]
    async fn save_writes_under_a_uuid_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"), "http://127.0.0.1:8000/");

        let stored = store.save(Some("me.heic"), b"image-bytes").await.unwrap();

        let (stem, extension) = stored.file_name.rsplit_once('.').unwrap();
        assert!(Uuid::parse_str(stem).is_ok());
        assert_eq!(extension, "heic");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"image-bytes");
        assert_eq!(
            stored.public_url,
            format!("http://127.0.0.1:8000/uploads/{}", stored.file_name)
        );

        let again = store.save(Some("me.heic"), b"image-bytes").await.unwrap();
        assert_ne!(again.file_name, stored.file_name);
    }
}
