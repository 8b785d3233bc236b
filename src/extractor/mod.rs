mod dnn;
mod gradient;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::info;

pub use self::dnn::{DnnExtractor, global_average_pool};
pub use self::gradient::GradientExtractor;
use crate::error::ExtractError;
use crate::metrics;

/// 图片特征向量
pub type Vector = Vec<f32>;

/// 特征提取器：`图片字节 -> 固定长度向量`
///
/// 实现必须是确定性的：相同的输入字节总是得到相同（在浮点误差范围内）的向量，
/// 并且模型只在构造时加载一次，之后只读共享。
pub trait FeatureExtractor: Send + Sync {
    /// 输出向量的维度
    fn dim(&self) -> usize;

    /// 提取一张图片的特征向量
    fn extract(&self, bytes: &[u8]) -> Result<Vector, ExtractError>;
}

/// 在阻塞线程池中提取特征，避免阻塞异步运行时
pub async fn extract_blocking(
    extractor: Arc<dyn FeatureExtractor>,
    bytes: Vec<u8>,
) -> Result<Vector, ExtractError> {
    let start = Instant::now();
    let result = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
        .await
        .map_err(|e| ExtractError::Inference(format!("提取任务异常终止: {e}")))?;
    metrics::observe_extract(result.is_ok(), start.elapsed().as_secs_f64());
    result
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// ONNX 格式的 CNN 模型（EfficientNetB0，去掉分类头）
    Dnn,
    /// 不依赖模型文件的梯度特征，主要用于本地调试
    Gradient,
}

/// 模型输入张量的内存布局
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[N, H, W, C]`，Keras/tf2onnx 导出的默认布局
    Nhwc,
    /// `[N, C, H, W]`
    Nchw,
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 特征提取器类型
    #[arg(long, env = "EXTRACTOR", value_enum, default_value_t = ExtractorKind::Dnn)]
    pub extractor: ExtractorKind,
    /// ONNX 模型路径
    #[arg(long, env = "MODEL_PATH", value_name = "PATH", default_value = "efficientnet_b0.onnx")]
    pub model: PathBuf,
    /// 模型输入输出的张量布局
    #[arg(long, env = "MODEL_LAYOUT", value_enum, default_value_t = TensorLayout::Nhwc)]
    pub layout: TensorLayout,
    /// 模型输出特征向量维度
    #[arg(long, env = "EMBEDDING_DIM", value_name = "N", default_value_t = 1280)]
    pub dim: usize,
}

impl ExtractorOptions {
    /// 构造特征提取器，整个进程只应调用一次
    pub fn build(&self) -> Result<Arc<dyn FeatureExtractor>> {
        let extractor: Arc<dyn FeatureExtractor> = match self.extractor {
            ExtractorKind::Dnn => {
                if !self.model.exists() {
                    bail!("模型文件不存在: {}", self.model.display());
                }
                info!("加载模型: {}", self.model.display());
                Arc::new(DnnExtractor::open(&self.model, self.layout, self.dim)?)
            }
            ExtractorKind::Gradient => Arc::new(GradientExtractor),
        };
        info!("特征提取器已就绪，向量维度 {}", extractor.dim());
        Ok(extractor)
    }
}
