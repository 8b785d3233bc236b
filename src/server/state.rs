use std::sync::Arc;

use crate::blob::{BlobLocation, BlobStore};
use crate::extractor::FeatureExtractor;
use crate::index::IndexClient;
use crate::retry::RetryPolicy;

/// 应用状态
///
/// 只读共享：模型、对象存储客户端和索引客户端本身都是无状态的。
pub struct AppState {
    /// 特征提取器
    pub extractor: Arc<dyn FeatureExtractor>,
    /// 图片所在的对象存储
    pub blobs: Arc<dyn BlobStore>,
    /// 图片根目录
    pub source: BlobLocation,
    /// 向量索引客户端
    pub index: IndexClient,
    /// 写入的索引资源名
    pub index_name: String,
    /// 下载图片的重试策略
    pub retry: RetryPolicy,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        blobs: Arc<dyn BlobStore>,
        source: BlobLocation,
        index: IndexClient,
        index_name: impl Into<String>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(AppState {
            extractor,
            blobs,
            source,
            index,
            index_name: index_name.into(),
            retry,
        })
    }
}
