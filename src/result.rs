// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result.rs - 模型推理结果
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

//! # 推理结果
//!
//! 所有后处理函数的输出都是 [`ModelResult`] 的某一种变体。各变体共享同一组能力：
//! 长度、按下标选取、拼接、ROI 补偿以及 JSON 序列化。
//!
//! ROI 补偿把坐标从输入张量（裁剪后）空间映射回传感器全画幅空间，每个结果只会
//! 补偿一次；恒等 ROI `(0, 0, 1, 1)` 不做任何事，也不会标记为已补偿。

use std::ops::Range;

use ndarray::{Array2, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::roi::Roi;

mod anomaly;
mod classifications;
pub mod codec;
mod detections;
mod poses;
mod segments;

pub use self::anomaly::Anomaly;
pub use self::classifications::Classifications;
pub use self::detections::{DetectionItem, Detections};
pub use self::poses::{PoseItem, Poses};
pub use self::segments::Segments;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResultError {
  #[error("字段 {field} 的长度 {actual} 与检测数量 {expected} 不一致")]
  LengthMismatch {
    field: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("下标 {index} 越界，共 {len} 个检测")]
  IndexOutOfRange { index: usize, len: usize },
  #[error("无法拼接不同类型的结果: {0} 与 {1}")]
  VariantMismatch(&'static str, &'static str),
  #[error("结果类型 {0} 不支持该操作")]
  Unsupported(&'static str),
  #[error("网格形状不一致: {0:?} 与 {1:?}")]
  ShapeMismatch([usize; 2], [usize; 2]),
  #[error("无法拼接 ROI 补偿状态不同的结果")]
  CompensationMismatch,
}

/// 所有结果变体共享的能力
pub trait ResultVariant: Clone + Sized {
  const KIND: &'static str;

  fn len(&self) -> usize;

  /// 按下标选取检测，返回新的结果
  fn select(&self, indices: &[usize]) -> Result<Self, ResultError>;

  fn concat(&self, other: &Self) -> Result<Self, ResultError>;

  fn compensate_for_roi(&mut self, roi: &Roi);

  fn is_roi_compensated(&self) -> bool;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn get(&self, index: usize) -> Result<Self, ResultError> {
    self.select(&[index])
  }

  fn slice(&self, range: Range<usize>) -> Result<Self, ResultError> {
    let indices: Vec<usize> = range.collect();
    self.select(&indices)
  }
}

pub(crate) fn check_indices(indices: &[usize], len: usize) -> Result<(), ResultError> {
  match indices.iter().find(|&&i| i >= len) {
    Some(&index) => Err(ResultError::IndexOutOfRange { index, len }),
    None => Ok(()),
  }
}

pub(crate) fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), ResultError> {
  if expected == actual {
    Ok(())
  } else {
    Err(ResultError::LengthMismatch {
      field,
      expected,
      actual,
    })
  }
}

pub(crate) fn pick<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
  indices.iter().map(|&i| values[i].clone()).collect()
}

pub(crate) fn joined<T: Clone>(a: &[T], b: &[T]) -> Vec<T> {
  a.iter().chain(b.iter()).cloned().collect()
}

/// 把归一化边框从裁剪空间映射回全画幅
pub(crate) fn compensate_bbox(bbox: &mut [f32; 4], roi: &Roi) {
  bbox[0] = roi.left + bbox[0] * roi.width;
  bbox[1] = roi.top + bbox[1] * roi.height;
  bbox[2] = roi.left + bbox[2] * roi.width;
  bbox[3] = roi.top + bbox[3] * roi.height;
}

/// 把裁剪空间的网格放回全画幅尺寸的画布，ROI 之外补零
pub(crate) fn expand_grid<T: Clone + Default>(grid: &Array2<T>, roi: &Roi) -> Array2<T> {
  let (h, w) = grid.dim();
  let (left, top) = (roi.left as f64, roi.top as f64);
  let (width, height) = (roi.width as f64, roi.height as f64);
  // 未经校验的 ROI（如录制文件中读出的）无法放大，保持原网格
  if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
    warn!("ROI 宽高无效 {:?}, 跳过网格补偿", roi);
    return grid.clone();
  }

  let new_h = (h as f64 / height) as usize;
  let new_w = (w as f64 / width) as usize;
  let start_h = ((top * h as f64 / height) as usize).min(new_h);
  let start_w = ((left * w as f64 / width) as usize).min(new_w);
  let copy_h = h.min(new_h - start_h);
  let copy_w = w.min(new_w - start_w);

  let mut canvas = Array2::from_elem((new_h, new_w), T::default());
  canvas
    .slice_mut(s![start_h..start_h + copy_h, start_w..start_w + copy_w])
    .assign(&grid.slice(s![..copy_h, ..copy_w]));
  canvas
}

/// 模型推理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResult {
  Classifications(Classifications),
  Detections(Detections),
  Poses(Poses),
  Segments(Segments),
  Anomaly(Anomaly),
}

macro_rules! dispatch {
  ($value:expr, $inner:ident => $body:expr) => {
    match $value {
      ModelResult::Classifications($inner) => $body,
      ModelResult::Detections($inner) => $body,
      ModelResult::Poses($inner) => $body,
      ModelResult::Segments($inner) => $body,
      ModelResult::Anomaly($inner) => $body,
    }
  };
}

macro_rules! dispatch_wrap {
  ($value:expr, $inner:ident => $body:expr) => {
    match $value {
      ModelResult::Classifications($inner) => $body.map(ModelResult::Classifications),
      ModelResult::Detections($inner) => $body.map(ModelResult::Detections),
      ModelResult::Poses($inner) => $body.map(ModelResult::Poses),
      ModelResult::Segments($inner) => $body.map(ModelResult::Segments),
      ModelResult::Anomaly($inner) => $body.map(ModelResult::Anomaly),
    }
  };
}

impl ModelResult {
  pub fn kind(&self) -> &'static str {
    match self {
      ModelResult::Classifications(_) => Classifications::KIND,
      ModelResult::Detections(_) => Detections::KIND,
      ModelResult::Poses(_) => Poses::KIND,
      ModelResult::Segments(_) => Segments::KIND,
      ModelResult::Anomaly(_) => Anomaly::KIND,
    }
  }

  pub fn len(&self) -> usize {
    dispatch!(self, r => r.len())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn select(&self, indices: &[usize]) -> Result<Self, ResultError> {
    dispatch_wrap!(self, r => r.select(indices))
  }

  pub fn get(&self, index: usize) -> Result<Self, ResultError> {
    self.select(&[index])
  }

  pub fn slice(&self, range: Range<usize>) -> Result<Self, ResultError> {
    dispatch_wrap!(self, r => r.slice(range))
  }

  pub fn concat(&self, other: &Self) -> Result<Self, ResultError> {
    match (self, other) {
      (ModelResult::Classifications(a), ModelResult::Classifications(b)) => {
        a.concat(b).map(ModelResult::Classifications)
      }
      (ModelResult::Detections(a), ModelResult::Detections(b)) => a.concat(b).map(ModelResult::Detections),
      (ModelResult::Poses(a), ModelResult::Poses(b)) => a.concat(b).map(ModelResult::Poses),
      (ModelResult::Segments(a), ModelResult::Segments(b)) => a.concat(b).map(ModelResult::Segments),
      (ModelResult::Anomaly(a), ModelResult::Anomaly(b)) => a.concat(b).map(ModelResult::Anomaly),
      (a, b) => Err(ResultError::VariantMismatch(a.kind(), b.kind())),
    }
  }

  pub fn compensate_for_roi(&mut self, roi: &Roi) {
    dispatch!(self, r => r.compensate_for_roi(roi))
  }

  pub fn is_roi_compensated(&self) -> bool {
    dispatch!(self, r => r.is_roi_compensated())
  }

  pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }

  pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(value)
  }

  pub fn as_classifications(&self) -> Option<&Classifications> {
    match self {
      ModelResult::Classifications(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_detections(&self) -> Option<&Detections> {
    match self {
      ModelResult::Detections(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_detections_mut(&mut self) -> Option<&mut Detections> {
    match self {
      ModelResult::Detections(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_poses(&self) -> Option<&Poses> {
    match self {
      ModelResult::Poses(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_segments(&self) -> Option<&Segments> {
    match self {
      ModelResult::Segments(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_anomaly(&self) -> Option<&Anomaly> {
    match self {
      ModelResult::Anomaly(r) => Some(r),
      _ => None,
    }
  }
}

macro_rules! impl_from_variant {
  ($($variant:ident),*) => {
    $(
      impl From<$variant> for ModelResult {
        fn from(value: $variant) -> Self {
          ModelResult::$variant(value)
        }
      }
    )*
  };
}

impl_from_variant!(Classifications, Detections, Poses, Segments, Anomaly);
