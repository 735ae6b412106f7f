//! Local file collaborator.
//!
//! Adapters never touch the filesystem directly. Attached images are read and
//! generated images are saved through a [`FileStore`], so the host
//! application decides where files live.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use omnichat_util::{IdPrefix, Identifier};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// File operations the adapters depend on.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Download `url` into the store and return the local path.
    async fn save_from_url(&self, url: &str, file_name: &str) -> ProviderResult<String>;

    /// Decode `data` (optionally a `data:` URL) and return the local path.
    async fn save_from_base64(&self, data: &str, file_name: &str) -> ProviderResult<String>;

    /// Read a local file as base64.
    async fn read_base64(&self, path: &str) -> ProviderResult<String>;

    /// Read a local file as raw bytes.
    async fn read_bytes(&self, path: &str) -> ProviderResult<Vec<u8>>;
}

/// A fresh, collision-free file name for a generated image.
pub fn image_file_name() -> String {
    Identifier::file_name(IdPrefix::Image, "png")
}

/// Strip a `data:<mime>;base64,` prefix if present.
pub fn strip_data_url(data: &str) -> &str {
    match data.split_once(";base64,") {
        Some((head, body)) if head.starts_with("data:") => body,
        _ => data,
    }
}

/// [`FileStore`] backed by a cache directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl LocalFileStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Store rooted at the platform cache directory.
    pub fn with_default_dir() -> ProviderResult<Self> {
        default_cache_dir()
            .map(Self::new)
            .ok_or_else(|| ProviderError::internal("no cache directory on this platform"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn write(&self, file_name: &str, bytes: &[u8]) -> ProviderResult<String> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| ProviderError::file(file_name, "invalid file name"))?;
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| ProviderError::file(self.cache_dir.display().to_string(), e.to_string()))?;

        let path = self.cache_dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ProviderError::file(path.display().to_string(), e.to_string()))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Saved file");
        Ok(path.display().to_string())
    }
}

/// Default cache directory for generated files.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|p| p.join("omnichat"))
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save_from_url(&self, url: &str, file_name: &str) -> ProviderResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::api_error(status.as_u16(), body));
        }
        let bytes = response.bytes().await?;
        self.write(file_name, &bytes).await
    }

    async fn save_from_base64(&self, data: &str, file_name: &str) -> ProviderResult<String> {
        let bytes = STANDARD
            .decode(strip_data_url(data).trim())
            .map_err(|e| ProviderError::invalid_response(format!("invalid base64 image: {e}")))?;
        self.write(file_name, &bytes).await
    }

    async fn read_base64(&self, path: &str) -> ProviderResult<String> {
        Ok(STANDARD.encode(self.read_bytes(path).await?))
    }

    async fn read_bytes(&self, path: &str) -> ProviderResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ProviderError::file(path, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
        assert_eq!(strip_data_url("x;base64,QUJD"), "x;base64,QUJD");
    }

    #[test]
    fn test_image_file_name() {
        let name = image_file_name();
        assert!(name.starts_with("img_"));
        assert!(name.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_base64_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().join("cache"));

        let path = store
            .save_from_base64("data:image/png;base64,aGVsbG8=", "a.png")
            .await
            .unwrap();
        assert!(path.ends_with("a.png"));
        assert_eq!(store.read_bytes(&path).await.unwrap(), b"hello");
        assert_eq!(store.read_base64(&path).await.unwrap(), "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_file_name_cannot_escape_cache_dir() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        let path = store
            .save_from_base64("aGVsbG8=", "../../etc/evil.png")
            .await
            .unwrap();
        assert_eq!(Path::new(&path), dir.path().join("evil.png"));
    }

    #[tokio::test]
    async fn test_invalid_base64() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        let err = store.save_from_base64("@@@", "a.png").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let store = LocalFileStore::new("/nonexistent");
        let err = store.read_base64("/nonexistent/x.png").await.unwrap_err();
        assert!(matches!(err, ProviderError::File { .. }));
    }

    #[tokio::test]
    async fn test_save_from_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        let saved = store
            .save_from_url(&format!("{}/img.png", server.uri()), "out.png")
            .await
            .unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_save_from_url_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        let err = store
            .save_from_url(&format!("{}/missing.png", server.uri()), "out.png")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status: 404, .. }));
    }
}
