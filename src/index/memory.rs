use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{Datapoint, Neighbor, QueryTarget, VectorStore};
use crate::error::{QueryError, UpsertError};

/// 单个 usearch 索引及 id 映射
struct LocalIndex {
    index: Index,
    dim: usize,
    /// id -> (usearch key, 向量)
    entries: HashMap<String, (u64, Vec<f32>)>,
    /// usearch key -> id
    ids: HashMap<u64, String>,
    /// 下一个新 id 使用的 key，覆盖写入沿用原来的 key
    next_key: u64,
}

impl LocalIndex {
    fn new(dim: usize) -> Result<Self, String> {
        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            // 使用 usearch 默认参数
            connectivity: 0,
            expansion_add: 0,
            expansion_search: 0,
            ..Default::default()
        };
        let index = Index::new(&options).map_err(|e| e.to_string())?;
        Ok(Self { index, dim, entries: HashMap::new(), ids: HashMap::new(), next_key: 0 })
    }

    fn reserve(&self, additional: usize) -> Result<(), String> {
        // 删除后空出的槽位会被后续写入复用
        let needed = self.entries.len() + additional;
        let capacity = self.index.capacity();
        if needed > capacity {
            self.index.reserve(needed.max(capacity * 2).max(64)).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn upsert(&mut self, dp: &Datapoint) -> Result<(), String> {
        let key = match self.entries.get(&dp.id) {
            Some(&(key, _)) => {
                self.index.remove(key).map_err(|e| e.to_string())?;
                key
            }
            None => {
                self.next_key += 1;
                self.next_key - 1
            }
        };
        self.index.add(key, dp.embedding.as_slice()).map_err(|e| e.to_string())?;
        self.ids.insert(key, dp.id.clone());
        self.entries.insert(dp.id.clone(), (key, dp.embedding.clone()));
        Ok(())
    }

    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, String> {
        if self.entries.is_empty() {
            return Ok(vec![]);
        }
        let matches = self.index.search(vector, k).map_err(|e| e.to_string())?;
        Ok(matches
            .keys
            .into_iter()
            .zip(matches.distances)
            .filter_map(|(key, distance)| {
                self.ids.get(&key).map(|id| Neighbor { id: id.clone(), distance })
            })
            .collect())
    }
}

/// 进程内的向量索引，基于 usearch HNSW，距离为 L2 平方
///
/// 行为上模拟远程索引服务：索引需要先创建，再部署到 `(endpoint, deployed_index_id)`
/// 之后才能被查询。主要用于本地开发和测试。
#[derive(Default)]
pub struct MemoryStore {
    indexes: RwLock<HashMap<String, LocalIndex>>,
    deployments: RwLock<HashMap<QueryTarget, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个 `dim` 维的空索引，已存在时不做任何事
    pub async fn create_index(&self, name: &str, dim: usize) -> anyhow::Result<()> {
        let mut indexes = self.indexes.write().await;
        if !indexes.contains_key(name) {
            let index = LocalIndex::new(dim).map_err(anyhow::Error::msg)?;
            indexes.insert(name.to_string(), index);
        }
        Ok(())
    }

    /// 将索引部署到指定端点
    pub async fn deploy(&self, target: QueryTarget, index: &str) -> anyhow::Result<()> {
        if !self.indexes.read().await.contains_key(index) {
            anyhow::bail!("索引不存在: {index}");
        }
        self.deployments.write().await.insert(target, index.to_string());
        Ok(())
    }

    /// 索引中的数据点数量
    pub async fn len(&self, index: &str) -> Option<usize> {
        self.indexes.read().await.get(index).map(|i| i.entries.len())
    }

    /// usearch 索引已预留的容量
    pub async fn capacity(&self, index: &str) -> Option<usize> {
        self.indexes.read().await.get(index).map(|i| i.index.capacity())
    }

    /// 读取某个数据点当前的向量
    pub async fn get(&self, index: &str, id: &str) -> Option<Vec<f32>> {
        let indexes = self.indexes.read().await;
        indexes.get(index)?.entries.get(id).map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, index: &str, datapoints: &[Datapoint]) -> Result<(), UpsertError> {
        let mut indexes = self.indexes.write().await;
        let local =
            indexes.get_mut(index).ok_or_else(|| UpsertError::UnknownIndex(index.to_string()))?;

        // 先整体校验，避免写入一半
        for dp in datapoints {
            if dp.embedding.len() != local.dim {
                return Err(UpsertError::DimensionMismatch {
                    id: dp.id.clone(),
                    expected: local.dim,
                    actual: dp.embedding.len(),
                });
            }
        }

        local.reserve(datapoints.len()).map_err(UpsertError::Rejected)?;
        for dp in datapoints {
            local.upsert(dp).map_err(UpsertError::Rejected)?;
        }
        debug!("索引 {} 当前共 {} 个数据点", index, local.entries.len());
        Ok(())
    }

    async fn query(
        &self,
        target: &QueryTarget,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, QueryError> {
        let name = self.deployments.read().await.get(target).cloned().ok_or_else(|| {
            QueryError::Misconfigured(format!(
                "{} 上没有部署 {}",
                target.index_endpoint, target.deployed_index_id
            ))
        })?;
        let indexes = self.indexes.read().await;
        let local = indexes
            .get(&name)
            .ok_or_else(|| QueryError::Misconfigured(format!("索引不存在: {name}")))?;
        if vector.len() != local.dim {
            return Err(QueryError::DimensionMismatch { expected: local.dim, actual: vector.len() });
        }
        local.search(vector, k).map_err(QueryError::Rejected)
    }
}
