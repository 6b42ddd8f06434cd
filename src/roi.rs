// 该文件是 Yunjing （云镜） 项目的一部分。
// src/roi.rs - 感兴趣区域（ROI）定义
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 传感器全分辨率宽度
pub const SENSOR_W: u32 = 4056;
/// 传感器全分辨率高度
pub const SENSOR_H: u32 = 3040;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoiError {
  #[error("ROI 数值必须位于 [0, 1] 区间: {0:?}")]
  OutOfRange([f32; 4]),
  #[error("ROI 超出画面: left + width = {horizontal}, top + height = {vertical}")]
  OutOfFrame { horizontal: f32, vertical: f32 },
  #[error("ROI 宽高不能为 0: width = {width}, height = {height}")]
  Empty { width: f32, height: f32 },
}

/// 归一化的感兴趣区域 (left, top, width, height)，相对于传感器全画幅
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

/// 传感器像素坐标下的 ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiAbs {
  pub left: u32,
  pub top: u32,
  pub width: u32,
  pub height: u32,
}

impl Default for Roi {
  fn default() -> Self {
    Self::FULL
  }
}

impl Roi {
  /// 整幅画面，即恒等变换
  pub const FULL: Roi = Roi {
    left: 0.0,
    top: 0.0,
    width: 1.0,
    height: 1.0,
  };

  pub fn new(left: f32, top: f32, width: f32, height: f32) -> Result<Self, RoiError> {
    let values = [left, top, width, height];
    if !values.iter().all(|v| (0.0..=1.0).contains(v)) {
      return Err(RoiError::OutOfRange(values));
    }
    if width == 0.0 || height == 0.0 {
      return Err(RoiError::Empty { width, height });
    }
    let horizontal = left + width;
    let vertical = top + height;
    if horizontal > 1.0 || vertical > 1.0 {
      return Err(RoiError::OutOfFrame {
        horizontal,
        vertical,
      });
    }
    Ok(Self {
      left,
      top,
      width,
      height,
    })
  }

  pub fn is_identity(&self) -> bool {
    *self == Self::FULL
  }

  pub fn as_array(&self) -> [f32; 4] {
    [self.left, self.top, self.width, self.height]
  }

  /// 按传感器分辨率换算为像素坐标（截断取整）
  pub fn to_absolute(&self, sensor: (u32, u32)) -> RoiAbs {
    let (w, h) = (sensor.0 as f32, sensor.1 as f32);
    RoiAbs {
      left: (self.left * w) as u32,
      top: (self.top * h) as u32,
      width: (self.width * w) as u32,
      height: (self.height * h) as u32,
    }
  }

  /// 计算保持模型输入宽高比的居中裁剪区域
  pub fn preserving_aspect(model_size: (u32, u32), sensor: (u32, u32)) -> Self {
    let model_aspect = model_size.0 as f32 / model_size.1 as f32;
    let sensor_aspect = sensor.0 as f32 / sensor.1 as f32;
    let (w, h) = if model_aspect > sensor_aspect {
      (1.0, sensor_aspect / model_aspect)
    } else {
      (model_aspect / sensor_aspect, 1.0)
    };
    Self {
      left: (1.0 - w) / 2.0,
      top: (1.0 - h) / 2.0,
      width: w,
      height: h,
    }
  }
}

impl TryFrom<(f32, f32, f32, f32)> for Roi {
  type Error = RoiError;

  fn try_from((left, top, width, height): (f32, f32, f32, f32)) -> Result<Self, Self::Error> {
    Roi::new(left, top, width, height)
  }
}

impl From<Roi> for [f32; 4] {
  fn from(roi: Roi) -> Self {
    roi.as_array()
  }
}
