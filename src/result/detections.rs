// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result/detections.rs - 目标检测结果
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

use super::{ResultError, ResultVariant, check_indices, check_len, compensate_bbox, joined, pick};
use crate::roi::Roi;

/// 目标检测结果
///
/// 边框为归一化的 `[x0, y0, x1, y1]`，左上角为原点。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "DetectionsRecord")]
pub struct Detections {
  bbox: Vec<[f32; 4]>,
  confidence: Vec<f32>,
  class_id: Vec<i32>,
  tracker_id: Option<Vec<i32>>,
  #[serde(rename = "_roi_compensated")]
  roi_compensated: bool,
}

#[derive(Deserialize)]
struct DetectionsRecord {
  bbox: Vec<[f32; 4]>,
  confidence: Vec<f32>,
  class_id: Vec<i32>,
  #[serde(default)]
  tracker_id: Option<Vec<i32>>,
  #[serde(rename = "_roi_compensated", default)]
  roi_compensated: bool,
}

impl TryFrom<DetectionsRecord> for Detections {
  type Error = ResultError;

  fn try_from(record: DetectionsRecord) -> Result<Self, Self::Error> {
    let mut result = Detections::new(record.bbox, record.confidence, record.class_id)?;
    if let Some(ids) = record.tracker_id {
      result.set_tracker_id(ids)?;
    }
    result.roi_compensated = record.roi_compensated;
    Ok(result)
  }
}

/// 单个检测的视图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionItem {
  pub bbox: [f32; 4],
  pub confidence: f32,
  pub class_id: i32,
  pub tracker_id: Option<i32>,
}

impl Detections {
  pub fn new(bbox: Vec<[f32; 4]>, confidence: Vec<f32>, class_id: Vec<i32>) -> Result<Self, ResultError> {
    check_len("confidence", bbox.len(), confidence.len())?;
    check_len("class_id", bbox.len(), class_id.len())?;
    Ok(Self {
      bbox,
      confidence,
      class_id,
      tracker_id: None,
      roi_compensated: false,
    })
  }

  /// 由外部跟踪器写入跟踪编号
  pub fn set_tracker_id(&mut self, ids: Vec<i32>) -> Result<(), ResultError> {
    check_len("tracker_id", self.bbox.len(), ids.len())?;
    self.tracker_id = Some(ids);
    Ok(())
  }

  pub fn clear_tracker_id(&mut self) {
    self.tracker_id = None;
  }

  pub fn bbox(&self) -> &[[f32; 4]] {
    &self.bbox
  }

  pub fn confidence(&self) -> &[f32] {
    &self.confidence
  }

  pub fn class_id(&self) -> &[i32] {
    &self.class_id
  }

  pub fn tracker_id(&self) -> Option<&[i32]> {
    self.tracker_id.as_deref()
  }

  pub fn bbox_width(&self) -> Vec<f32> {
    self.bbox.iter().map(|b| b[2] - b[0]).collect()
  }

  pub fn bbox_height(&self) -> Vec<f32> {
    self.bbox.iter().map(|b| b[3] - b[1]).collect()
  }

  /// 以归一化坐标计算的面积
  pub fn area(&self) -> Vec<f32> {
    self.bbox.iter().map(|b| (b[2] - b[0]) * (b[3] - b[1])).collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = DetectionItem> + '_ {
    (0..self.bbox.len()).map(move |i| DetectionItem {
      bbox: self.bbox[i],
      confidence: self.confidence[i],
      class_id: self.class_id[i],
      tracker_id: self.tracker_id.as_ref().map(|ids| ids[i]),
    })
  }

  /// 保留满足条件的检测
  pub fn filter<F>(&self, mut keep: F) -> Self
  where
    F: FnMut(&DetectionItem) -> bool,
  {
    let indices: Vec<usize> = self
      .iter()
      .enumerate()
      .filter(|(_, item)| keep(item))
      .map(|(i, _)| i)
      .collect();
    self.take(&indices)
  }

  fn take(&self, indices: &[usize]) -> Self {
    Self {
      bbox: pick(&self.bbox, indices),
      confidence: pick(&self.confidence, indices),
      class_id: pick(&self.class_id, indices),
      tracker_id: self.tracker_id.as_ref().map(|ids| pick(ids, indices)),
      roi_compensated: self.roi_compensated,
    }
  }
}

impl ResultVariant for Detections {
  const KIND: &'static str = "detections";

  fn len(&self) -> usize {
    self.bbox.len()
  }

  fn select(&self, indices: &[usize]) -> Result<Self, ResultError> {
    check_indices(indices, self.len())?;
    Ok(self.take(indices))
  }

  fn concat(&self, other: &Self) -> Result<Self, ResultError> {
    if self.roi_compensated != other.roi_compensated {
      return Err(ResultError::CompensationMismatch);
    }
    let tracker_id = match (&self.tracker_id, &other.tracker_id) {
      (Some(a), Some(b)) => Some(joined(a, b)),
      _ => None,
    };
    Ok(Self {
      bbox: joined(&self.bbox, &other.bbox),
      confidence: joined(&self.confidence, &other.confidence),
      class_id: joined(&self.class_id, &other.class_id),
      tracker_id,
      roi_compensated: self.roi_compensated,
    })
  }

  fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_identity() || self.roi_compensated {
      return;
    }
    for bbox in self.bbox.iter_mut() {
      compensate_bbox(bbox, roi);
    }
    self.roi_compensated = true;
  }

  fn is_roi_compensated(&self) -> bool {
    self.roi_compensated
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Detections {
    Detections::new(
      vec![[0.0, 0.0, 0.5, 0.5], [0.25, 0.5, 1.0, 1.0], [0.1, 0.1, 0.2, 0.3]],
      vec![0.9, 0.3, 0.6],
      vec![1, 2, 1],
    )
    .unwrap()
  }

  #[test]
  fn compensation_maps_into_roi_once() {
    let roi = Roi::new(0.5, 0.5, 0.5, 0.5).unwrap();
    let mut det = sample();
    det.compensate_for_roi(&roi);
    assert_eq!(det.bbox()[0], [0.5, 0.5, 0.75, 0.75]);
    assert!(det.is_roi_compensated());

    let once = det.clone();
    det.compensate_for_roi(&roi);
    assert_eq!(det, once);
  }

  #[test]
  fn identity_roi_is_a_no_op() {
    let mut det = sample();
    det.compensate_for_roi(&Roi::FULL);
    assert_eq!(det, sample());
    assert!(!det.is_roi_compensated());
  }

  #[test]
  fn later_roi_is_ignored_after_compensation() {
    let mut det = sample();
    det.compensate_for_roi(&Roi::new(0.5, 0.5, 0.5, 0.5).unwrap());
    let once = det.clone();
    det.compensate_for_roi(&Roi::new(0.0, 0.25, 0.25, 0.5).unwrap());
    assert_eq!(det, once);
  }

  #[test]
  fn real_roi_still_applies_after_identity() {
    let mut det = sample();
    det.compensate_for_roi(&Roi::FULL);
    det.compensate_for_roi(&Roi::new(0.5, 0.5, 0.5, 0.5).unwrap());
    assert!(det.is_roi_compensated());
    assert_eq!(det.bbox()[0], [0.5, 0.5, 0.75, 0.75]);
  }

  #[test]
  fn concat_keeps_tracker_ids_only_when_both_sides_have_them() {
    let mut tracked = sample();
    tracked.set_tracker_id(vec![5, 6, 7]).unwrap();
    let both = tracked.concat(&tracked).unwrap();
    assert_eq!(both.tracker_id(), Some(&[5, 6, 7, 5, 6, 7][..]));

    let mixed = tracked.concat(&sample()).unwrap();
    assert_eq!(mixed.len(), 6);
    assert_eq!(mixed.tracker_id(), None);
  }

  #[test]
  fn concat_refuses_mixed_coordinate_spaces() {
    let mut compensated = sample();
    compensated.compensate_for_roi(&Roi::new(0.0, 0.0, 0.5, 0.5).unwrap());
    assert_eq!(
      compensated.concat(&sample()),
      Err(ResultError::CompensationMismatch)
    );
  }

  #[test]
  fn tracker_ids_must_match_length() {
    let mut det = sample();
    assert!(det.set_tracker_id(vec![1, 2]).is_err());
  }

  #[test]
  fn filter_and_geometry_helpers() {
    let det = sample();
    let confident = det.filter(|d| d.confidence > 0.5);
    assert_eq!(confident.class_id(), &[1, 1]);
    assert_eq!(det.area()[0], 0.25);
    assert_eq!(det.bbox_width()[1], 0.75);
    assert_eq!(det.bbox_height()[1], 0.5);
  }

  #[test]
  fn selection_by_index_list() {
    let mut det = sample();
    det.set_tracker_id(vec![10, 20, 30]).unwrap();
    let picked = det.select(&[2, 0]).unwrap();
    assert_eq!(picked.confidence(), &[0.6, 0.9]);
    assert_eq!(picked.tracker_id(), Some(&[30, 10][..]));
  }
}
