use std::sync::Arc;

use anyhow::{Result, bail};
use clap::ValueEnum;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::blob::{BlobLocation, BlobStore};
use crate::error::{BatchError, ExtractError, FetchError};
use crate::extractor::{FeatureExtractor, extract_blocking};
use crate::index::Datapoint;
use crate::retry::RetryPolicy;
use crate::utils::pb_style;

/// 示例数据集中的花卉分类，按任务序号分配
pub const DEFAULT_CATEGORIES: &str = "daisy,dandelion,roses,sunflowers,tulips";

/// 单张图片失败时的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 遇到第一个失败立即终止，不产生任何输出
    #[default]
    Abort,
    /// 跳过失败的图片，最后汇总报告
    Skip,
}

/// 按任务序号选择分类
pub fn category_for(categories: &[String], task_index: usize) -> Result<&str> {
    match categories.get(task_index) {
        Some(category) => Ok(category),
        None => bail!("任务序号 {} 超出分类数量 {}", task_index, categories.len()),
    }
}

/// 输出目录：建索引任务写入 `{root}/{category}`，其余任务写入 `{root}/{flat_dir}`
pub fn destination_for(
    root: &BlobLocation,
    category: &str,
    is_index_build_task: bool,
    flat_dir: &str,
) -> BlobLocation {
    if is_index_build_task { root.child(category) } else { root.child(flat_dir) }
}

/// 一个分类的向量化任务
#[derive(Debug, Clone)]
pub struct BatchTask {
    pub category: String,
    /// 图片根目录，图片位于 `{source}/{category}/` 下
    pub source: BlobLocation,
    /// 输出目录，结果写入 `{destination}/{category}.json`
    pub destination: BlobLocation,
}

impl BatchTask {
    pub fn output_path(&self) -> String {
        self.destination.join(&format!("{}.json", self.category))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// 输出文件在目标存储中的路径
    pub output: String,
    /// 写入的记录数量
    pub written: usize,
    /// 失败的图片 id，仅在 [`FailurePolicy::Skip`] 下非空
    pub failed: Vec<String>,
}

/// 序列化为每行一个 JSON 对象的格式
pub fn encode_ndjson(datapoints: &[Datapoint]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    for dp in datapoints {
        serde_json::to_writer(&mut buf, dp)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// 批量向量化：读取一个分类下的所有图片，全部完成后一次性写出结果
pub struct BatchVectorizer {
    extractor: Arc<dyn FeatureExtractor>,
    source: Arc<dyn BlobStore>,
    sink: Arc<dyn BlobStore>,
    policy: FailurePolicy,
    retry: RetryPolicy,
}

impl BatchVectorizer {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        source: Arc<dyn BlobStore>,
        sink: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            extractor,
            source,
            sink,
            policy: FailurePolicy::Abort,
            retry: RetryPolicy::default(),
        }
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn vectorize_one(&self, id: &str, path: &str) -> Result<Datapoint, BatchError> {
        let data = self
            .retry
            .run(path, FetchError::is_retriable, || self.source.download(path))
            .await
            .map_err(|source| BatchError::Fetch { id: id.to_string(), source })?;
        let embedding = extract_blocking(self.extractor.clone(), data)
            .await
            .map_err(|source| BatchError::Extract { id: id.to_string(), source })?;
        if embedding.len() != self.extractor.dim() {
            return Err(BatchError::Extract {
                id: id.to_string(),
                source: ExtractError::Inference(format!(
                    "向量维度 {} 与提取器维度 {} 不一致",
                    embedding.len(),
                    self.extractor.dim()
                )),
            });
        }
        Ok(Datapoint { id: id.to_string(), embedding })
    }

    pub async fn run(&self, task: &BatchTask) -> Result<BatchReport, BatchError> {
        let category = task.category.as_str();
        let prefix = task.source.join(&format!("{category}/"));
        info!("扫描 {}/{}", task.source, category);
        let paths = self
            .retry
            .run(&prefix, FetchError::is_retriable, || self.source.list(&prefix))
            .await
            .map_err(|source| BatchError::Fetch { id: category.to_string(), source })?;
        if paths.is_empty() {
            return Err(BatchError::Empty(category.to_string()));
        }
        info!("{} 共 {} 张图片", category, paths.len());

        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
        let mut datapoints = Vec::with_capacity(paths.len());
        let mut failed = vec![];

        for path in &paths {
            let name = path.rsplit('/').next().unwrap_or(path);
            let id = format!("{category}/{name}");
            pb.set_message(id.clone());

            match self.vectorize_one(&id, path).await {
                Ok(dp) => datapoints.push(dp),
                Err(e) if self.policy == FailurePolicy::Skip => {
                    warn!("跳过图片 {e}");
                    failed.push(id);
                }
                Err(e) => {
                    pb.abandon_with_message(format!("向量化失败: {id}"));
                    return Err(e);
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message(format!("{category} 向量化完成"));

        let output = task.output_path();
        if !datapoints.is_empty() {
            let data = encode_ndjson(&datapoints)?;
            self.retry
                .run(&output, FetchError::is_retriable, || self.sink.write(&output, data.clone()))
                .await
                .map_err(BatchError::Write)?;
            info!("写入 {} 条记录到 {}/{}.json", datapoints.len(), task.destination, category);
        }

        Ok(BatchReport { output, written: datapoints.len(), failed })
    }
}
