// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result/anomaly.rs - 异常检测结果
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
use ndarray::Array2;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use super::codec::{CodecError, decode_f32_grid, encode_f32_grid};
use super::{ResultError, ResultVariant, expand_grid};
use crate::roi::Roi;

/// 整幅画面的异常分数与逐像素热力图
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "AnomalyRecord")]
pub struct Anomaly {
  score: f32,
  heatmap: Array2<f32>,
  roi_compensated: bool,
}

#[derive(Deserialize)]
struct AnomalyRecord {
  score: f32,
  heatmap: String,
  heatmap_shape: [usize; 2],
  #[serde(rename = "_roi_compensated", default)]
  roi_compensated: bool,
}

impl TryFrom<AnomalyRecord> for Anomaly {
  type Error = CodecError;

  fn try_from(record: AnomalyRecord) -> Result<Self, Self::Error> {
    Ok(Self {
      score: record.score,
      heatmap: decode_f32_grid(&record.heatmap, record.heatmap_shape)?,
      roi_compensated: record.roi_compensated,
    })
  }
}

impl Serialize for Anomaly {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let (heatmap, heatmap_shape) = encode_f32_grid(&self.heatmap).map_err(S::Error::custom)?;
    let mut state = serializer.serialize_struct("Anomaly", 4)?;
    state.serialize_field("score", &self.score)?;
    state.serialize_field("heatmap", &heatmap)?;
    state.serialize_field("heatmap_shape", &heatmap_shape)?;
    state.serialize_field("_roi_compensated", &self.roi_compensated)?;
    state.end()
  }
}

impl Default for Anomaly {
  fn default() -> Self {
    Self::new(0.0, Array2::zeros((0, 0)))
  }
}

impl Anomaly {
  pub fn new(score: f32, heatmap: Array2<f32>) -> Self {
    Self {
      score,
      heatmap,
      roi_compensated: false,
    }
  }

  pub fn score(&self) -> f32 {
    self.score
  }

  pub fn heatmap(&self) -> &Array2<f32> {
    &self.heatmap
  }

  /// 热力图不低于阈值的像素填充为 `color`，其余为黑色
  pub fn get_mask(&self, score_threshold: f32, color: [u8; 3]) -> RgbImage {
    let (h, w) = self.heatmap.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
      if self.heatmap[[y as usize, x as usize]] >= score_threshold {
        Rgb(color)
      } else {
        Rgb([0, 0, 0])
      }
    })
  }
}

impl ResultVariant for Anomaly {
  const KIND: &'static str = "anomaly";

  // 异常结果总是描述整幅画面
  fn len(&self) -> usize {
    1
  }

  fn select(&self, indices: &[usize]) -> Result<Self, ResultError> {
    match indices {
      [0] => Ok(self.clone()),
      [] => Err(ResultError::Unsupported(Self::KIND)),
      _ => match indices.iter().find(|&&i| i != 0) {
        Some(&index) => Err(ResultError::IndexOutOfRange { index, len: 1 }),
        None => Err(ResultError::Unsupported(Self::KIND)),
      },
    }
  }

  fn concat(&self, _other: &Self) -> Result<Self, ResultError> {
    Err(ResultError::Unsupported(Self::KIND))
  }

  fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_identity() || self.roi_compensated {
      return;
    }
    self.heatmap = expand_grid(&self.heatmap, roi);
    self.roi_compensated = true;
  }

  fn is_roi_compensated(&self) -> bool {
    self.roi_compensated
  }
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;

  #[test]
  fn mask_colors_pixels_over_threshold() {
    let anomaly = Anomaly::new(0.8, array![[0.1, 0.9], [0.5, 0.2]]);
    let mask = anomaly.get_mask(0.5, [0, 0, 255]);
    assert_eq!(mask.dimensions(), (2, 2));
    assert_eq!(mask.get_pixel(1, 0), &Rgb([0, 0, 255]));
    assert_eq!(mask.get_pixel(0, 1), &Rgb([0, 0, 255]));
    assert_eq!(mask.get_pixel(0, 0), &Rgb([0, 0, 0]));
  }

  #[test]
  fn heatmap_grows_to_full_frame() {
    let mut anomaly = Anomaly::new(0.3, array![[1.0, 2.0]]);
    anomaly.compensate_for_roi(&Roi::new(0.0, 0.5, 1.0, 0.5).unwrap());
    assert_eq!(anomaly.heatmap(), &array![[0.0, 0.0], [1.0, 2.0]]);
  }

  #[test]
  fn concat_is_unsupported() {
    let a = Anomaly::default();
    assert_eq!(a.concat(&a), Err(ResultError::Unsupported("anomaly")));
    assert!(matches!(
      a.select(&[0, 1]),
      Err(ResultError::IndexOutOfRange { index: 1, len: 1 })
    ));
  }
}
