use indicatif::ProgressStyle;
use opencv::core::{Mat, Size, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::error::ExtractError;

/// 模型输入分辨率
pub const INPUT_SIZE: i32 = 224;

/// 将编码后的图片解码为 RGB 三通道图像
pub fn decode_rgb(bytes: &[u8]) -> Result<Mat, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::Decode("图片数据为空".to_string()));
    }
    let buf = Vector::<u8>::from_slice(bytes);
    let bgr = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)
        .map_err(|e| ExtractError::Decode(e.to_string()))?;
    // NOTE: 无法识别的数据 imdecode 不会报错，而是返回空矩阵
    if bgr.empty() {
        return Err(ExtractError::Decode("无法识别的图片格式".to_string()));
    }
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
    Ok(rgb)
}

/// 使用双线性插值将图片缩放到 `size`x`size`，忽略原始长宽比
pub fn resize_input(img: &Mat, size: i32) -> Result<Mat, ExtractError> {
    let mut output = Mat::default();
    imgproc::resize(
        img,
        &mut output,
        Size::new(size, size),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok(output)
}

/// 解码并缩放到模型输入尺寸，返回连续存储的 HWC 格式 RGB 字节
pub fn load_input(bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    let img = resize_input(&decode_rgb(bytes)?, INPUT_SIZE)?;
    let data = img.data_bytes()?;
    let expected = (INPUT_SIZE * INPUT_SIZE * 3) as usize;
    if data.len() != expected {
        return Err(ExtractError::Decode(format!("图片通道数异常: {} 字节", data.len())));
    }
    Ok(data.to_vec())
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("invalid progress bar template")
        .progress_chars("#>-")
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC3, Scalar};

    use super::*;

    fn encode(rows: i32, cols: i32) -> Vec<u8> {
        let img =
            Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::new(10., 120., 230., 0.))
                .unwrap();
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode_def(".jpg", &img, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn input_is_always_224() {
        for (rows, cols) in [(10, 10), (300, 120), (224, 224), (640, 480)] {
            let data = load_input(&encode(rows, cols)).unwrap();
            assert_eq!(data.len(), 224 * 224 * 3);
        }
    }

    #[test]
    fn decoded_channels_are_rgb() {
        let data = load_input(&encode(32, 32)).unwrap();
        // BGR(10, 120, 230) -> RGB(230, 120, 10)，JPEG 有损，允许一定误差
        assert!((data[0] as i32 - 230).abs() < 8);
        assert!((data[1] as i32 - 120).abs() < 8);
        assert!((data[2] as i32 - 10).abs() < 8);
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(decode_rgb(b"not an image"), Err(ExtractError::Decode(_))));
        assert!(matches!(decode_rgb(&[]), Err(ExtractError::Decode(_))));
    }
}
