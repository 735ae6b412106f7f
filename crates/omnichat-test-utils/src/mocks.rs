//! Mock collaborators for isolated adapter tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use omnichat_provider::error::{ProviderError, ProviderResult};
use omnichat_provider::files::strip_data_url;
use omnichat_provider::{FileStore, ScriptExecutor};
use serde_json::Value;

/// What was saved through a [`MemoryFileStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedFile {
    /// Saved from a URL; the URL is recorded, nothing is downloaded.
    Url { path: String, url: String },
    Bytes { path: String, bytes: Vec<u8> },
}

impl SavedFile {
    pub fn path(&self) -> &str {
        match self {
            SavedFile::Url { path, .. } | SavedFile::Bytes { path, .. } => path,
        }
    }
}

/// A [`FileStore`] that keeps everything in memory.
///
/// Saved paths look like `mem://<file name>`.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    saved: Mutex<Vec<SavedFile>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a readable file.
    pub fn with_file(self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), bytes.into());
        self
    }

    pub fn saved(&self) -> Vec<SavedFile> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, file: SavedFile) -> String {
        let path = file.path().to_string();
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(file);
        path
    }

    fn get(&self, path: &str) -> ProviderResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::file(path, "not found"))
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save_from_url(&self, url: &str, file_name: &str) -> ProviderResult<String> {
        Ok(self.record(SavedFile::Url {
            path: format!("mem://{file_name}"),
            url: url.to_string(),
        }))
    }

    async fn save_from_base64(&self, data: &str, file_name: &str) -> ProviderResult<String> {
        let bytes = STANDARD
            .decode(strip_data_url(data))
            .map_err(|e| ProviderError::file(file_name, e.to_string()))?;
        Ok(self.record(SavedFile::Bytes {
            path: format!("mem://{file_name}"),
            bytes,
        }))
    }

    async fn read_base64(&self, path: &str) -> ProviderResult<String> {
        Ok(STANDARD.encode(self.get(path)?))
    }

    async fn read_bytes(&self, path: &str) -> ProviderResult<Vec<u8>> {
        self.get(path)
    }
}

/// A [`ScriptExecutor`] that returns a canned output and records its calls.
#[derive(Debug)]
pub struct StaticScriptExecutor {
    output: Result<String, String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StaticScriptExecutor {
    pub fn returning(output: impl Into<String>) -> Self {
        Self {
            output: Ok(output.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            output: Err(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(code, params)` of every call, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ScriptExecutor for StaticScriptExecutor {
    async fn execute(&self, code: &str, params: &Value) -> ProviderResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((code.to_string(), params.clone()));
        self.output.clone().map_err(ProviderError::ToolExecution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryFileStore::new().with_file("/img/cat.jpg", b"cat".to_vec());
        assert_eq!(store.read_base64("/img/cat.jpg").await.unwrap(), "Y2F0");
        assert!(store.read_bytes("/missing").await.is_err());

        let path = store
            .save_from_base64("data:image/png;base64,Y2F0", "a.png")
            .await
            .unwrap();
        assert_eq!(path, "mem://a.png");
        assert_eq!(
            store.saved(),
            vec![SavedFile::Bytes {
                path: "mem://a.png".into(),
                bytes: b"cat".to_vec()
            }]
        );
    }

    #[tokio::test]
    async fn test_static_executor_records_calls() {
        let executor = StaticScriptExecutor::returning("42");
        let out = executor.execute("params.x", &json!({"x": 42})).await.unwrap();
        assert_eq!(out, "42");
        assert_eq!(executor.calls()[0].1["x"], 42);

        let failing = StaticScriptExecutor::failing("boom");
        assert!(failing.execute("x", &json!({})).await.is_err());
    }
}
