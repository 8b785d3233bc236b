use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

use super::BlobStore;
use crate::error::FetchError;

/// 以本地目录作为对象存储
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

fn io_error(path: &str, e: std::io::Error) -> FetchError {
    match e.kind() {
        ErrorKind::NotFound => FetchError::NotFound(path.to_string()),
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            FetchError::Transient(format!("{path}: {e}"))
        }
        _ => FetchError::Rejected(format!("{path}: {e}")),
    }
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FetchError> {
        // 不允许通过 `..` 访问根目录之外的文件
        if path.split('/').any(|seg| seg == "..") {
            return Err(FetchError::Rejected(format!("非法路径: {path}")));
        }
        Ok(self.root.join(path.trim_start_matches('/')))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, FetchError> {
        let root = self.root.clone();
        let prefix = prefix.trim_start_matches('/').to_string();
        spawn_blocking(move || {
            let mut paths = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| {
                    let entry = entry.ok()?;
                    if !entry.file_type().is_file() {
                        return None;
                    }
                    let rel = entry.path().strip_prefix(&root).ok()?;
                    let parts = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>();
                    Some(parts.join("/"))
                })
                .filter(|rel| rel.starts_with(&prefix))
                .collect::<Vec<_>>();
            paths.sort();
            paths
        })
        .await
        .map_err(|e| FetchError::Transient(e.to_string()))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file).await.map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), FetchError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(path, e))?;
        }
        tokio::fs::write(&file, data).await.map_err(|e| io_error(path, e))
    }
}
