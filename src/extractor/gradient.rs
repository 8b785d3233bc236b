use ndarray::prelude::*;

use super::{FeatureExtractor, Vector};
use crate::error::ExtractError;
use crate::utils::{INPUT_SIZE, load_input};

/// 每个通道提取的特征数量
const FEATURES_PER_CHANNEL: usize = 5;

/// 不依赖模型权重的特征提取器
///
/// 对每个 RGB 通道计算 亮度、水平梯度、垂直梯度、拉普拉斯 四张特征图，
/// 全局平均池化后再附加通道标准差，共 15 维。
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientExtractor;

impl GradientExtractor {
    pub const DIM: usize = 3 * FEATURES_PER_CHANNEL;
}

impl FeatureExtractor for GradientExtractor {
    fn dim(&self) -> usize {
        Self::DIM
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vector, ExtractError> {
        let rgb = load_input(bytes)?;
        let s = INPUT_SIZE as usize;
        let image = ArrayView3::from_shape((s, s, 3), &rgb)
            .map_err(|e| ExtractError::Inference(e.to_string()))?
            .mapv(|v| v as f32 / 255.);

        let mut vector = Vec::with_capacity(Self::DIM);
        for plane in image.axis_iter(Axis(2)) {
            vector.extend(channel_features(plane));
        }
        Ok(vector)
    }
}

fn channel_features(plane: ArrayView2<f32>) -> [f32; FEATURES_PER_CHANNEL] {
    let mean = plane.mean().unwrap_or(0.);
    let std = plane.std(0.);

    let dx = &plane.slice(s![.., 1..]) - &plane.slice(s![.., ..-1]);
    let dy = &plane.slice(s![1.., ..]) - &plane.slice(s![..-1, ..]);

    // 4 邻域拉普拉斯，只计算内部像素
    let center = plane.slice(s![1..-1, 1..-1]);
    let laplacian = &plane.slice(s![..-2, 1..-1])
        + &plane.slice(s![2.., 1..-1])
        + &plane.slice(s![1..-1, ..-2])
        + &plane.slice(s![1..-1, 2..])
        - &center * 4.;

    [
        mean,
        dx.mapv(f32::abs).mean().unwrap_or(0.),
        dy.mapv(f32::abs).mean().unwrap_or(0.),
        laplacian.mapv(f32::abs).mean().unwrap_or(0.),
        std,
    ]
}
