#![allow(dead_code)]

use std::path::Path;

use opencv::core::{CV_8UC3, Rect, Scalar, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

/// 生成一张 JPEG：纯色背景上画一个色块，`seed` 决定色块的位置和颜色
pub fn jpeg(rows: i32, cols: i32, seed: u8) -> Vec<u8> {
    let s = seed as f64;
    let mut img = Mat::new_rows_cols_with_default(
        rows,
        cols,
        CV_8UC3,
        Scalar::new(30. + s * 7., 90., 200. - s * 5., 0.),
    )
    .unwrap();
    let w = (cols / 3).max(1);
    let h = (rows / 3).max(1);
    let x = (seed as i32 * 13) % (cols - w).max(1);
    let y = (seed as i32 * 29) % (rows - h).max(1);
    imgproc::rectangle(
        &mut img,
        Rect::new(x, y, w, h),
        Scalar::new(250. - s * 11., s * 17. % 255., 40., 0.),
        -1,
        imgproc::LINE_8,
        0,
    )
    .unwrap();
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode_def(".jpg", &img, &mut buf).unwrap();
    buf.to_vec()
}

/// 在 `dir/{category}/` 下写入 `count` 张图片，返回文件名
pub fn write_category(dir: &Path, category: &str, count: u8) -> Vec<String> {
    let category_dir = dir.join(category);
    std::fs::create_dir_all(&category_dir).unwrap();
    (0..count)
        .map(|i| {
            let name = format!("{category}_{i}.jpg");
            std::fs::write(category_dir.join(&name), jpeg(96 + i as i32 * 8, 128, i)).unwrap();
            name
        })
        .collect()
}
