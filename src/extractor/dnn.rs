use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::debug;
use opencv::core::{CV_32F, Mat, Scalar};
use opencv::dnn::{self, Net};
use opencv::prelude::*;

use super::{FeatureExtractor, TensorLayout, Vector};
use crate::error::ExtractError;
use crate::utils::{INPUT_SIZE, load_input};

/// 基于 OpenCV DNN 模块的 CNN 特征提取器
///
/// `Net::forward` 需要可变引用，这里用互斥锁把并发调用串行化到同一个网络实例上。
pub struct DnnExtractor {
    net: Mutex<Net>,
    layout: TensorLayout,
    dim: usize,
}

impl DnnExtractor {
    pub fn open(model: impl AsRef<Path>, layout: TensorLayout, dim: usize) -> Result<Self> {
        let model = model.as_ref();
        let path = model.to_str().context("模型路径不是合法的 UTF-8")?;
        let net = dnn::read_net_from_onnx(path)
            .with_context(|| format!("加载模型失败: {}", model.display()))?;
        Ok(Self { net: Mutex::new(net), layout, dim })
    }
}

impl FeatureExtractor for DnnExtractor {
    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vector, ExtractError> {
        let rgb = load_input(bytes)?;
        let tensor = pack_input(&rgb, self.layout)?;

        let output = {
            let mut net = self
                .net
                .lock()
                .map_err(|_| ExtractError::Inference("模型锁已损坏".to_string()))?;
            net.set_input(&tensor, "", 1.0, Scalar::default())?;
            net.forward_single("")?
        };

        let data = output.data_typed::<f32>()?;
        debug!("模型输出 {} 个值", data.len());
        global_average_pool(data, self.dim, self.layout)
    }
}

/// 把 224x224 的 RGB 像素构造成模型输入张量
///
/// 像素值保持 `[0, 255]`，归一化由模型自身完成。
fn pack_input(rgb: &[u8], layout: TensorLayout) -> Result<Mat, ExtractError> {
    let (s, c) = (INPUT_SIZE, 3);
    let plane = (s * s) as usize;
    if rgb.len() != plane * c as usize {
        return Err(ExtractError::Inference(format!(
            "输入像素数量 {} 与 {s}x{s}x{c} 不匹配",
            rgb.len()
        )));
    }
    let shape = match layout {
        TensorLayout::Nhwc => [1, s, s, c],
        TensorLayout::Nchw => [1, c, s, s],
    };
    let mut tensor = Mat::new_nd_with_default(&shape, CV_32F, Scalar::all(0.))?;
    let data = tensor.data_typed_mut::<f32>()?;
    match layout {
        TensorLayout::Nhwc => {
            for (dst, &src) in data.iter_mut().zip(rgb) {
                *dst = src as f32;
            }
        }
        TensorLayout::Nchw => {
            for (p, pixel) in rgb.chunks_exact(3).enumerate() {
                for (ch, &v) in pixel.iter().enumerate() {
                    data[ch * plane + p] = v as f32;
                }
            }
        }
    }
    Ok(tensor)
}

/// 对模型输出的特征图做全局平均池化，得到 `dim` 维向量
///
/// 输出长度恰好为 `dim` 时视为已池化。
pub fn global_average_pool(
    data: &[f32],
    dim: usize,
    layout: TensorLayout,
) -> Result<Vector, ExtractError> {
    if dim == 0 || data.is_empty() || data.len() % dim != 0 {
        return Err(ExtractError::Inference(format!(
            "模型输出长度 {} 与向量维度 {} 不匹配",
            data.len(),
            dim
        )));
    }
    let positions = data.len() / dim;
    let vector: Vector = match layout {
        // 通道在最后：第 p 个位置的第 c 个通道位于 p * dim + c
        TensorLayout::Nhwc => {
            let mut sum = vec![0f64; dim];
            for chunk in data.chunks_exact(dim) {
                for (acc, &v) in sum.iter_mut().zip(chunk) {
                    *acc += v as f64;
                }
            }
            sum.into_iter().map(|v| (v / positions as f64) as f32).collect()
        }
        // 通道在前：每个通道是一块连续的特征图
        TensorLayout::Nchw => data
            .chunks_exact(positions)
            .map(|plane| (plane.iter().map(|&v| v as f64).sum::<f64>() / positions as f64) as f32)
            .collect(),
    };
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(ExtractError::Inference("模型输出包含非有限值".to_string()));
    }
    Ok(vector)
}
