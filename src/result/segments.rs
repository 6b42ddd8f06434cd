// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result/segments.rs - 语义分割结果
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

use std::collections::BTreeSet;

use ndarray::{Array2, Zip};
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use super::codec::{CodecError, decode_u8_grid, encode_u8_grid};
use super::{ResultError, ResultVariant, check_indices, expand_grid};
use crate::roi::Roi;

/// 分割掩码，每个像素存放所属分割的编号，0 为背景
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "SegmentsRecord")]
pub struct Segments {
  mask: Array2<u8>,
  roi_compensated: bool,
}

#[derive(Deserialize)]
struct SegmentsRecord {
  mask: String,
  mask_shape: [usize; 2],
  #[serde(rename = "_roi_compensated", default)]
  roi_compensated: bool,
}

impl TryFrom<SegmentsRecord> for Segments {
  type Error = CodecError;

  fn try_from(record: SegmentsRecord) -> Result<Self, Self::Error> {
    Ok(Self {
      mask: decode_u8_grid(&record.mask, record.mask_shape)?,
      roi_compensated: record.roi_compensated,
    })
  }
}

impl Serialize for Segments {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let (mask, mask_shape) = encode_u8_grid(&self.mask).map_err(S::Error::custom)?;
    let indeces = self.indeces();
    let mut state = serializer.serialize_struct("Segments", 5)?;
    state.serialize_field("n_segments", &indeces.len())?;
    state.serialize_field("indeces", &indeces)?;
    state.serialize_field("mask", &mask)?;
    state.serialize_field("mask_shape", &mask_shape)?;
    state.serialize_field("_roi_compensated", &self.roi_compensated)?;
    state.end()
  }
}

impl Default for Segments {
  fn default() -> Self {
    Self::new(Array2::zeros((0, 0)))
  }
}

impl Segments {
  pub fn new(mask: Array2<u8>) -> Self {
    Self {
      mask,
      roi_compensated: false,
    }
  }

  pub fn mask(&self) -> &Array2<u8> {
    &self.mask
  }

  /// 掩码中出现的分割编号（升序，不含背景）
  pub fn indeces(&self) -> Vec<u8> {
    let found: BTreeSet<u8> = self.mask.iter().copied().filter(|&v| v != 0).collect();
    found.into_iter().collect()
  }

  pub fn n_segments(&self) -> usize {
    self.indeces().len()
  }

  /// 指定编号的二值掩码
  pub fn get_mask(&self, id: u8) -> Array2<u8> {
    self.mask.mapv(|v| u8::from(v == id))
  }
}

impl ResultVariant for Segments {
  const KIND: &'static str = "segments";

  fn len(&self) -> usize {
    self.n_segments()
  }

  // 下标指向 `indeces()` 中的位置，未被选中的分割归为背景
  fn select(&self, indices: &[usize]) -> Result<Self, ResultError> {
    let ids = self.indeces();
    check_indices(indices, ids.len())?;
    let keep: BTreeSet<u8> = indices.iter().map(|&i| ids[i]).collect();
    Ok(Self {
      mask: self.mask.mapv(|v| if keep.contains(&v) { v } else { 0 }),
      roi_compensated: self.roi_compensated,
    })
  }

  /// 叠加两个同尺寸掩码，后者的非背景像素覆盖前者
  fn concat(&self, other: &Self) -> Result<Self, ResultError> {
    if self.mask.dim() != other.mask.dim() {
      let (a, b) = (self.mask.dim(), other.mask.dim());
      return Err(ResultError::ShapeMismatch([a.0, a.1], [b.0, b.1]));
    }
    if self.roi_compensated != other.roi_compensated {
      return Err(ResultError::CompensationMismatch);
    }
    let mut mask = self.mask.clone();
    Zip::from(&mut mask).and(&other.mask).for_each(|a, &b| {
      if b != 0 {
        *a = b;
      }
    });
    Ok(Self {
      mask,
      roi_compensated: self.roi_compensated,
    })
  }

  fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_identity() || self.roi_compensated {
      return;
    }
    self.mask = expand_grid(&self.mask, roi);
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
  fn indeces_skip_background() {
    let seg = Segments::new(array![[0, 3, 3], [1, 0, 3]]);
    assert_eq!(seg.indeces(), vec![1, 3]);
    assert_eq!(seg.len(), 2);
    assert_eq!(seg.get_mask(3), array![[0, 1, 1], [0, 0, 1]]);
  }

  #[test]
  fn select_keeps_only_chosen_segments() {
    let seg = Segments::new(array![[0, 3, 3], [1, 0, 2]]);
    let picked = seg.get(1).unwrap();
    assert_eq!(picked.mask(), &array![[0, 0, 0], [0, 0, 2]]);
    assert_eq!(picked.len(), 1);
  }

  #[test]
  fn compensation_places_mask_inside_full_frame() {
    let mut seg = Segments::new(array![[1, 2], [3, 4]]);
    seg.compensate_for_roi(&Roi::new(0.5, 0.5, 0.5, 0.5).unwrap());
    assert_eq!(
      seg.mask(),
      &array![[0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 1, 2], [0, 0, 3, 4]]
    );
    assert!(seg.is_roi_compensated());
  }

  #[test]
  fn later_roi_is_ignored_after_compensation() {
    let mut seg = Segments::new(array![[1, 2], [3, 4]]);
    seg.compensate_for_roi(&Roi::new(0.5, 0.5, 0.5, 0.5).unwrap());
    let once = seg.clone();
    seg.compensate_for_roi(&Roi::new(0.0, 0.0, 0.25, 0.25).unwrap());
    assert_eq!(seg, once);
    assert_eq!(seg.mask().dim(), (4, 4));
  }

  #[test]
  fn real_roi_still_applies_after_identity() {
    let mut seg = Segments::new(array![[1, 2], [3, 4]]);
    seg.compensate_for_roi(&Roi::FULL);
    assert!(!seg.is_roi_compensated());
    assert_eq!(seg.mask().dim(), (2, 2));
    seg.compensate_for_roi(&Roi::new(0.0, 0.5, 0.5, 0.5).unwrap());
    assert_eq!(
      seg.mask(),
      &array![[0, 0, 0, 0], [0, 0, 0, 0], [1, 2, 0, 0], [3, 4, 0, 0]]
    );
  }

  #[test]
  fn concat_overlays_and_checks_shape() {
    let a = Segments::new(array![[1, 0], [0, 0]]);
    let b = Segments::new(array![[0, 2], [0, 0]]);
    assert_eq!(a.concat(&b).unwrap().mask(), &array![[1, 2], [0, 0]]);

    let c = Segments::new(array![[1, 0, 0]]);
    assert_eq!(a.concat(&c), Err(ResultError::ShapeMismatch([2, 2], [1, 3])));
  }

  #[test]
  fn json_reports_segments_and_shape() {
    let seg = Segments::new(array![[0, 5], [5, 7]]);
    let value = serde_json::to_value(&seg).unwrap();
    assert_eq!(value["n_segments"], 2);
    assert_eq!(value["mask_shape"], serde_json::json!([2, 2]));
    let back: Segments = serde_json::from_value(value).unwrap();
    assert_eq!(back, seg);
  }
}
