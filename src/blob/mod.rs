mod fs;
mod gcs;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

pub use self::fs::FsBlobStore;
pub use self::gcs::GcsBlobStore;
use crate::error::FetchError;
use crate::gcp::CloudOptions;

/// 对象存储
///
/// 路径均为相对于存储根的字符串，以 `/` 分隔，例如 `daisy/5547758_eea9edfd54_n.jpg`。
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// 列出以 `prefix` 开头的对象，按路径排序，不包含目录占位对象
    async fn list(&self, prefix: &str) -> Result<Vec<String>, FetchError>;

    /// 下载对象内容
    async fn download(&self, path: &str) -> Result<Vec<u8>, FetchError>;

    /// 写入对象，已存在时覆盖
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), FetchError>;
}

/// 对象存储中的一个位置：`gs://bucket/base` 或本地目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobLocation {
    Gcs { bucket: String, base: String },
    Local { root: PathBuf },
}

impl BlobLocation {
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("gs://") {
            let (bucket, base) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                bail!("无效的存储路径: {s}");
            }
            return Ok(Self::Gcs {
                bucket: bucket.to_string(),
                base: base.trim_matches('/').to_string(),
            });
        }
        if s.is_empty() {
            bail!("存储路径不能为空");
        }
        Ok(Self::Local { root: PathBuf::from(s) })
    }

    /// 本位置下的相对路径
    pub fn join(&self, rel: &str) -> String {
        let rel = rel.trim_start_matches('/');
        match self {
            Self::Gcs { base, .. } if !base.is_empty() => format!("{base}/{rel}"),
            _ => rel.to_string(),
        }
    }

    /// 在本位置下追加一级目录
    pub fn child(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        match self {
            Self::Gcs { bucket, .. } => Self::Gcs { bucket: bucket.clone(), base: self.join(name) },
            Self::Local { root } => Self::Local { root: root.join(name) },
        }
    }

    /// 打开该位置对应的对象存储
    pub fn open(&self, cloud: &CloudOptions) -> Result<Arc<dyn BlobStore>> {
        Ok(match self {
            Self::Gcs { bucket, .. } => {
                let mut store =
                    GcsBlobStore::new(bucket, cloud.http_client()?, cloud.credentials());
                if let Some(endpoint) = &cloud.storage_endpoint {
                    store = store.with_endpoint(endpoint);
                }
                Arc::new(store)
            }
            Self::Local { root } => Arc::new(FsBlobStore::new(root)),
        })
    }
}

impl std::fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gcs { bucket, base } if base.is_empty() => write!(f, "gs://{bucket}"),
            Self::Gcs { bucket, base } => write!(f, "gs://{bucket}/{base}"),
            Self::Local { root } => write!(f, "{}", root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_gcs_location() {
        let loc = BlobLocation::parse("gs://cloud-samples-data/ai-platform/flowers/").unwrap();
        assert_eq!(
            loc,
            BlobLocation::Gcs {
                bucket: "cloud-samples-data".to_string(),
                base: "ai-platform/flowers".to_string()
            }
        );
        assert_eq!(loc.join("daisy/a.jpg"), "ai-platform/flowers/daisy/a.jpg");
        assert_eq!(
            loc.child("daisy").to_string(),
            "gs://cloud-samples-data/ai-platform/flowers/daisy"
        );
    }

    #[test]
    fn parse_bucket_root() {
        let loc = BlobLocation::parse("gs://bucket").unwrap();
        assert_eq!(loc.join("a.json"), "a.json");
        assert_eq!(loc.child("flowers").join("a.json"), "flowers/a.json");
        assert!(BlobLocation::parse("gs:///x").is_err());
    }

    #[test]
    fn parse_local_location() {
        let loc = BlobLocation::parse("/tmp/out").unwrap();
        assert_eq!(loc.join("daisy.json"), "daisy.json");
        assert_eq!(
            loc.child("flowers"),
            BlobLocation::Local { root: PathBuf::from("/tmp/out/flowers") }
        );
    }
}
