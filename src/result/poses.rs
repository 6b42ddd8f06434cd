// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result/poses.rs - 姿态估计结果
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

/// 姿态估计结果
///
/// 每个检测的关键点按 `[y0, x0, y1, x1, ...]` 交错存放，均为归一化坐标；
/// `keypoint_scores` 每行长度是关键点行长度的一半。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "PosesRecord")]
pub struct Poses {
  n_detections: usize,
  confidence: Vec<f32>,
  keypoints: Vec<Vec<f32>>,
  keypoint_scores: Vec<Vec<f32>>,
  bbox: Option<Vec<[f32; 4]>>,
  tracker_id: Option<Vec<i32>>,
  #[serde(rename = "_roi_compensated")]
  roi_compensated: bool,
}

#[derive(Deserialize)]
struct PosesRecord {
  #[serde(default)]
  n_detections: Option<usize>,
  confidence: Vec<f32>,
  keypoints: Vec<Vec<f32>>,
  keypoint_scores: Vec<Vec<f32>>,
  #[serde(default)]
  bbox: Option<Vec<[f32; 4]>>,
  #[serde(default)]
  tracker_id: Option<Vec<i32>>,
  #[serde(rename = "_roi_compensated", default)]
  roi_compensated: bool,
}

impl TryFrom<PosesRecord> for Poses {
  type Error = ResultError;

  fn try_from(record: PosesRecord) -> Result<Self, Self::Error> {
    let mut result = Poses::new(record.confidence, record.keypoints, record.keypoint_scores)?;
    if let Some(n) = record.n_detections {
      check_len("n_detections", result.n_detections, n)?;
    }
    if let Some(bbox) = record.bbox {
      result.set_bbox(bbox)?;
    }
    if let Some(ids) = record.tracker_id {
      result.set_tracker_id(ids)?;
    }
    result.roi_compensated = record.roi_compensated;
    Ok(result)
  }
}

/// 单个姿态的视图
#[derive(Debug, Clone, PartialEq)]
pub struct PoseItem<'a> {
  pub confidence: f32,
  pub keypoints: &'a [f32],
  pub keypoint_scores: &'a [f32],
  pub bbox: Option<[f32; 4]>,
  pub tracker_id: Option<i32>,
}

impl Poses {
  pub fn new(
    confidence: Vec<f32>,
    keypoints: Vec<Vec<f32>>,
    keypoint_scores: Vec<Vec<f32>>,
  ) -> Result<Self, ResultError> {
    let n = confidence.len();
    check_len("keypoints", n, keypoints.len())?;
    check_len("keypoint_scores", n, keypoint_scores.len())?;
    for (points, scores) in keypoints.iter().zip(keypoint_scores.iter()) {
      check_len("keypoints", scores.len() * 2, points.len())?;
    }
    Ok(Self {
      n_detections: n,
      confidence,
      keypoints,
      keypoint_scores,
      bbox: None,
      tracker_id: None,
      roi_compensated: false,
    })
  }

  pub fn set_bbox(&mut self, bbox: Vec<[f32; 4]>) -> Result<(), ResultError> {
    check_len("bbox", self.n_detections, bbox.len())?;
    self.bbox = Some(bbox);
    Ok(())
  }

  pub fn set_tracker_id(&mut self, ids: Vec<i32>) -> Result<(), ResultError> {
    check_len("tracker_id", self.n_detections, ids.len())?;
    self.tracker_id = Some(ids);
    Ok(())
  }

  pub fn n_detections(&self) -> usize {
    self.n_detections
  }

  pub fn confidence(&self) -> &[f32] {
    &self.confidence
  }

  pub fn keypoints(&self) -> &[Vec<f32>] {
    &self.keypoints
  }

  pub fn keypoint_scores(&self) -> &[Vec<f32>] {
    &self.keypoint_scores
  }

  pub fn bbox(&self) -> Option<&[[f32; 4]]> {
    self.bbox.as_deref()
  }

  pub fn tracker_id(&self) -> Option<&[i32]> {
    self.tracker_id.as_deref()
  }

  pub fn iter(&self) -> impl Iterator<Item = PoseItem<'_>> + '_ {
    (0..self.n_detections).map(move |i| PoseItem {
      confidence: self.confidence[i],
      keypoints: &self.keypoints[i],
      keypoint_scores: &self.keypoint_scores[i],
      bbox: self.bbox.as_ref().map(|b| b[i]),
      tracker_id: self.tracker_id.as_ref().map(|ids| ids[i]),
    })
  }
}

fn join_optional<T: Clone>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> Option<Vec<T>> {
  match (a, b) {
    (Some(a), Some(b)) => Some(joined(a, b)),
    _ => None,
  }
}

impl ResultVariant for Poses {
  const KIND: &'static str = "poses";

  fn len(&self) -> usize {
    self.n_detections
  }

  fn select(&self, indices: &[usize]) -> Result<Self, ResultError> {
    check_indices(indices, self.len())?;
    Ok(Self {
      n_detections: indices.len(),
      confidence: pick(&self.confidence, indices),
      keypoints: pick(&self.keypoints, indices),
      keypoint_scores: pick(&self.keypoint_scores, indices),
      bbox: self.bbox.as_ref().map(|b| pick(b, indices)),
      tracker_id: self.tracker_id.as_ref().map(|ids| pick(ids, indices)),
      roi_compensated: self.roi_compensated,
    })
  }

  fn concat(&self, other: &Self) -> Result<Self, ResultError> {
    if self.roi_compensated != other.roi_compensated {
      return Err(ResultError::CompensationMismatch);
    }
    Ok(Self {
      n_detections: self.n_detections + other.n_detections,
      confidence: joined(&self.confidence, &other.confidence),
      keypoints: joined(&self.keypoints, &other.keypoints),
      keypoint_scores: joined(&self.keypoint_scores, &other.keypoint_scores),
      bbox: join_optional(&self.bbox, &other.bbox),
      tracker_id: join_optional(&self.tracker_id, &other.tracker_id),
      roi_compensated: self.roi_compensated,
    })
  }

  fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_identity() || self.roi_compensated || self.keypoints.is_empty() {
      return;
    }
    for points in self.keypoints.iter_mut() {
      for (i, v) in points.iter_mut().enumerate() {
        *v = if i % 2 == 0 {
          roi.top + *v * roi.height
        } else {
          roi.left + *v * roi.width
        };
      }
    }
    if let Some(bbox) = self.bbox.as_mut() {
      for b in bbox.iter_mut() {
        compensate_bbox(b, roi);
      }
    }
    self.roi_compensated = true;
  }

  fn is_roi_compensated(&self) -> bool {
    self.roi_compensated
  }
}
