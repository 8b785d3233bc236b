mod memory;
mod vertex;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use self::memory::MemoryStore;
pub use self::vertex::VertexStore;
use crate::error::{QueryError, UpsertError};
use crate::metrics;
use crate::retry::RetryPolicy;

/// 索引中的一条数据：`(id, 向量)`
///
/// 同时也是批量导出文件中每一行的格式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Datapoint {
    /// 调用方指定的唯一标识
    pub id: String,
    /// 特征向量
    pub embedding: Vec<f32>,
}

/// 查询结果中的一个近邻
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    /// 索引服务返回的值，含义由 [`DistanceMeasure`] 决定
    pub distance: f32,
}

/// 索引配置的距离度量，决定查询结果的排序方向
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMeasure {
    /// L2 距离的平方，越小越相似
    #[default]
    #[value(name = "squared-l2")]
    SquaredL2,
    /// 余弦距离 `1 - cos`，越小越相似
    Cosine,
    /// 内积相似度，越大越相似，可以为负数
    DotProduct,
}

impl DistanceMeasure {
    /// 值越大是否表示越相似
    pub fn higher_is_closer(self) -> bool {
        matches!(self, Self::DotProduct)
    }
}

/// 可查询的索引部署位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryTarget {
    /// 索引端点资源名
    pub index_endpoint: String,
    /// 端点上已部署索引的 ID
    pub deployed_index_id: String,
}

impl QueryTarget {
    pub fn new(index_endpoint: impl Into<String>, deployed_index_id: impl Into<String>) -> Self {
        Self { index_endpoint: index_endpoint.into(), deployed_index_id: deployed_index_id.into() }
    }
}

/// 外部近似最近邻索引服务
///
/// 实现只负责与具体服务通信，参数校验与重试由 [`IndexClient`] 完成。
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 写入或覆盖数据点，按 id 幂等
    async fn upsert(&self, index: &str, datapoints: &[Datapoint]) -> Result<(), UpsertError>;

    /// 查询最多 `k` 个近邻
    async fn query(
        &self,
        target: &QueryTarget,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, QueryError>;
}

/// 向量索引客户端
///
/// 在请求到达索引之前拒绝维度不一致的向量，对可重试的错误按策略重试，
/// 并保证查询结果按距离度量从近到远排列。
#[derive(Clone)]
pub struct IndexClient {
    store: Arc<dyn VectorStore>,
    dim: usize,
    retry: RetryPolicy,
    measure: DistanceMeasure,
}

impl IndexClient {
    pub fn new(store: Arc<dyn VectorStore>, dim: usize) -> Self {
        Self { store, dim, retry: RetryPolicy::default(), measure: DistanceMeasure::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_distance_measure(mut self, measure: DistanceMeasure) -> Self {
        self.measure = measure;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn validate(&self, datapoints: &[Datapoint]) -> Result<(), UpsertError> {
        if datapoints.is_empty() {
            return Err(UpsertError::Invalid("数据点列表为空".to_string()));
        }
        let mut seen = HashSet::with_capacity(datapoints.len());
        for dp in datapoints {
            if dp.id.is_empty() {
                return Err(UpsertError::Invalid("数据点 id 为空".to_string()));
            }
            if !seen.insert(dp.id.as_str()) {
                return Err(UpsertError::Invalid(format!("同一批次中 id 重复: {}", dp.id)));
            }
            if dp.embedding.len() != self.dim {
                return Err(UpsertError::DimensionMismatch {
                    id: dp.id.clone(),
                    expected: self.dim,
                    actual: dp.embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// 写入数据点到 `index`
    pub async fn upsert(&self, index: &str, datapoints: &[Datapoint]) -> Result<(), UpsertError> {
        self.validate(datapoints)?;
        debug!("写入 {} 个数据点到 {}", datapoints.len(), index);
        let result = self
            .retry
            .run("upsert", UpsertError::is_retriable, || self.store.upsert(index, datapoints))
            .await;
        metrics::inc_upsert(result.is_ok(), datapoints.len());
        result
    }

    /// 查询 `vector` 的 `k` 个近邻，最相似的排在最前
    pub async fn query(
        &self,
        target: &QueryTarget,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, QueryError> {
        if k == 0 {
            return Err(QueryError::Invalid("k 必须大于 0".to_string()));
        }
        if vector.len() != self.dim {
            return Err(QueryError::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }

        let start = Instant::now();
        let result = self
            .retry
            .run("query", QueryError::is_retriable, || self.store.query(target, vector, k))
            .await
            .and_then(|neighbors| rank(neighbors, k, self.measure));
        metrics::observe_query(result.is_ok(), start.elapsed().as_secs_f64());

        if let Ok(neighbors) = &result {
            info!("查询完成，返回 {} 个近邻", neighbors.len());
        }
        result
    }
}

/// 按距离度量从近到远排列并截断到 `k` 个
///
/// 相同的值保持服务返回的顺序。
fn rank(
    mut neighbors: Vec<Neighbor>,
    k: usize,
    measure: DistanceMeasure,
) -> Result<Vec<Neighbor>, QueryError> {
    for n in &neighbors {
        if !n.distance.is_finite() {
            return Err(QueryError::Rejected(format!("{} 的距离不是有限值: {}", n.id, n.distance)));
        }
        if n.distance < 0. && !measure.higher_is_closer() {
            return Err(QueryError::Rejected(format!("{} 的距离为负数: {}", n.id, n.distance)));
        }
    }
    if measure.higher_is_closer() {
        neighbors.sort_by(|a, b| b.distance.total_cmp(&a.distance));
    } else {
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }
    neighbors.truncate(k);
    Ok(neighbors)
}
