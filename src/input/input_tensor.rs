// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/input_tensor.rs - 输入张量还原为图像
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputTensorError {
  #[error("加速器未提供输入张量，模型需在启用输入张量的情况下转换")]
  Missing,
  #[error("输入张量长度 {actual} 与 3x{height}x{width} 不符")]
  Size { width: u32, height: u32, actual: usize },
  #[error("输入张量配置无效: {0}")]
  InvalidConfig(String),
}

/// 加速器对输入张量做的归一化参数，按通道给出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTensorConfig {
  pub width: u32,
  pub height: u32,
  pub norm_val: [i32; 3],
  pub norm_shift: [u32; 3],
  pub div_val: [i32; 3],
  pub div_shift: u32,
}

impl InputTensorConfig {
  /// 不做任何变换的配置
  pub fn identity(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      norm_val: [0; 3],
      norm_shift: [0; 3],
      div_val: [1; 3],
      div_shift: 0,
    }
  }
}

fn floor_div(a: i64, b: i64) -> i64 {
  let q = a / b;
  if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

/// 把平面 (C, H, W) 的 RGB 输入张量还原成交错排列的 BGR 图像
pub fn input_tensor_image(raw: &[u8], config: &InputTensorConfig) -> Result<RgbImage, InputTensorError> {
  let (w, h) = (config.width as usize, config.height as usize);
  let plane = w * h;
  if raw.len() != 3 * plane {
    return Err(InputTensorError::Size {
      width: config.width,
      height: config.height,
      actual: raw.len(),
    });
  }
  if let Some(i) = config.div_val.iter().position(|&v| v == 0) {
    return Err(InputTensorError::InvalidConfig(format!("第 {} 通道 div_val 为 0", i)));
  }
  if config.div_shift >= 32 || config.norm_shift.iter().any(|&s| s >= 32) {
    return Err(InputTensorError::InvalidConfig("移位量过大".to_string()));
  }

  // 输出第 i 个通道取自输入的第 2 - i 个平面
  let convert = |i: usize, x: u8| -> u8 {
    let v = ((x as i64) << config.norm_shift[i]) - config.norm_val[i] as i64;
    (floor_div(v << config.div_shift, config.div_val[i] as i64) & 0xFF) as u8
  };

  Ok(RgbImage::from_fn(config.width, config.height, |x, y| {
    let at = y as usize * w + x as usize;
    Rgb([
      convert(0, raw[2 * plane + at]),
      convert(1, raw[plane + at]),
      convert(2, raw[at]),
    ])
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn planes_are_reversed_and_interleaved() {
    // 2x1 图像: R 平面 [1, 2], G 平面 [3, 4], B 平面 [5, 6]
    let raw = [1, 2, 3, 4, 5, 6];
    let image = input_tensor_image(&raw, &InputTensorConfig::identity(2, 1)).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([5, 3, 1]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([6, 4, 2]));
  }

  #[test]
  fn normalization_uses_floor_division_and_wraps() {
    let config = InputTensorConfig {
      width: 1,
      height: 1,
      norm_val: [10, 0, 0],
      norm_shift: [0, 1, 0],
      div_val: [3, 1, 1],
      div_shift: 0,
    };
    // 通道 0 取 B 平面: (5 - 10) // 3 = -2, & 0xFF = 254
    // 通道 1 取 G 平面: 200 << 1 = 400, & 0xFF = 144
    let image = input_tensor_image(&[7, 200, 5], &config).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([254, 144, 7]));
  }

  #[test]
  fn wrong_size_and_bad_config_are_errors() {
    let config = InputTensorConfig::identity(2, 2);
    assert!(matches!(
      input_tensor_image(&[0; 5], &config),
      Err(InputTensorError::Size { actual: 5, .. })
    ));
    let mut config = InputTensorConfig::identity(1, 1);
    config.div_val[2] = 0;
    assert!(matches!(
      input_tensor_image(&[0; 3], &config),
      Err(InputTensorError::InvalidConfig(_))
    ));
  }
}
