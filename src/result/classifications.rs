// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result/classifications.rs - 分类结果
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

use super::{ResultError, ResultVariant, check_indices, check_len, joined, pick};
use crate::roi::Roi;

/// 按置信度降序排列的分类结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "ClassificationsRecord")]
pub struct Classifications {
  confidence: Vec<f32>,
  class_id: Vec<i32>,
  #[serde(rename = "_roi_compensated")]
  roi_compensated: bool,
}

#[derive(Deserialize)]
struct ClassificationsRecord {
  confidence: Vec<f32>,
  class_id: Vec<i32>,
  #[serde(rename = "_roi_compensated", default)]
  roi_compensated: bool,
}

impl TryFrom<ClassificationsRecord> for Classifications {
  type Error = ResultError;

  fn try_from(record: ClassificationsRecord) -> Result<Self, Self::Error> {
    let mut result = Classifications::new(record.confidence, record.class_id)?;
    result.roi_compensated = record.roi_compensated;
    Ok(result)
  }
}

impl Classifications {
  pub fn new(confidence: Vec<f32>, class_id: Vec<i32>) -> Result<Self, ResultError> {
    check_len("class_id", confidence.len(), class_id.len())?;
    Ok(Self {
      confidence,
      class_id,
      roi_compensated: false,
    })
  }

  pub fn confidence(&self) -> &[f32] {
    &self.confidence
  }

  pub fn class_id(&self) -> &[i32] {
    &self.class_id
  }

  /// 置信度最高的类别
  pub fn top(&self) -> Option<(i32, f32)> {
    self.iter().next()
  }

  /// 依次给出 `(class_id, confidence)`
  pub fn iter(&self) -> impl Iterator<Item = (i32, f32)> + '_ {
    self.class_id.iter().copied().zip(self.confidence.iter().copied())
  }
}

impl ResultVariant for Classifications {
  const KIND: &'static str = "classifications";

  fn len(&self) -> usize {
    self.confidence.len()
  }

  fn select(&self, indices: &[usize]) -> Result<Self, ResultError> {
    check_indices(indices, self.len())?;
    Ok(Self {
      confidence: pick(&self.confidence, indices),
      class_id: pick(&self.class_id, indices),
      roi_compensated: self.roi_compensated,
    })
  }

  fn concat(&self, other: &Self) -> Result<Self, ResultError> {
    if self.roi_compensated != other.roi_compensated {
      return Err(ResultError::CompensationMismatch);
    }
    Ok(Self {
      confidence: joined(&self.confidence, &other.confidence),
      class_id: joined(&self.class_id, &other.class_id),
      roi_compensated: self.roi_compensated,
    })
  }

  // 分类结果没有几何信息，只记录补偿状态
  fn compensate_for_roi(&mut self, roi: &Roi) {
    if !roi.is_identity() {
      self.roi_compensated = true;
    }
  }

  fn is_roi_compensated(&self) -> bool {
    self.roi_compensated
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mismatched_lengths_are_rejected() {
    assert_eq!(
      Classifications::new(vec![0.5, 0.2], vec![1]),
      Err(ResultError::LengthMismatch {
        field: "class_id",
        expected: 2,
        actual: 1
      })
    );
  }

  #[test]
  fn slice_keeps_order() {
    let result = Classifications::new(vec![0.6, 0.3, 0.1], vec![4, 2, 9]).unwrap();
    let head = result.slice(0..2).unwrap();
    assert_eq!(head.class_id(), &[4, 2]);
    assert_eq!(head.top(), Some((4, 0.6)));
  }

  #[test]
  fn deserializing_checks_lengths() {
    let value = serde_json::json!({ "confidence": [0.1, 0.2], "class_id": [1] });
    assert!(serde_json::from_value::<Classifications>(value).is_err());
  }
}
