// 该文件是 Yunjing （云镜） 项目的一部分。
// src/model/postprocess.rs - 输出张量后处理
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

use ndarray::{ArrayViewD, Axis, Ix2};
use thiserror::Error;
use tracing::debug;

use super::posenet::{PoseDecoder, PosenetOutput};
use crate::result::{Anomaly, Classifications, Detections, Poses, ResultError, Segments};
use crate::tensor::Tensor;

/// EfficientDet-Lite0 的边框以输入像素给出
const EFFICIENTDET_LITE0_INPUT: f32 = 320.0;

#[derive(Error, Debug)]
pub enum PostProcessError {
  #[error("需要 {expected} 个输出张量, 实际 {actual} 个")]
  TensorCount { expected: usize, actual: usize },
  #[error("张量形状不符: {0}")]
  Shape(String),
  #[error("张量包含非法数值: {0}")]
  NonNumeric(String),
  #[error("检测数量 {count} 无效, 可用 {available} 个")]
  DetectionCount { count: f32, available: usize },
  #[error("姿态解码失败: {0}")]
  NativeDecodeFailure(String),
  #[error("结果构造失败: {0}")]
  Result(#[from] ResultError),
}

fn require(outputs: &[Tensor], expected: usize) -> Result<(), PostProcessError> {
  if outputs.len() != expected {
    return Err(PostProcessError::TensorCount {
      expected,
      actual: outputs.len(),
    });
  }
  Ok(())
}

/// 去掉所有长度为 1 的维度
fn squeeze(tensor: &Tensor) -> ArrayViewD<'_, f32> {
  let mut view = tensor.view();
  for axis in (0..view.ndim()).rev() {
    if view.shape()[axis] == 1 {
      view = view.index_axis_move(Axis(axis), 0);
    }
  }
  view
}

/// 按逻辑（行主）顺序展开，并检查数值有限
fn finite_values(tensor: ArrayViewD<'_, f32>, what: &str) -> Result<Vec<f32>, PostProcessError> {
  let values: Vec<f32> = tensor.iter().copied().collect();
  if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
    return Err(PostProcessError::NonNumeric(format!("{} 中出现 {}", what, bad)));
  }
  Ok(values)
}

fn sorted_descending(scores: Vec<f32>) -> Result<Classifications, PostProcessError> {
  let mut order: Vec<usize> = (0..scores.len()).collect();
  // 稳定排序，同分时保持下标升序
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
  let confidence = order.iter().map(|&i| scores[i]).collect();
  let class_id = order.iter().map(|&i| i as i32).collect();
  Ok(Classifications::new(confidence, class_id)?)
}

fn class_scores(outputs: &[Tensor]) -> Result<Vec<f32>, PostProcessError> {
  require(outputs, 1)?;
  let t = squeeze(&outputs[0]);
  if t.ndim() > 1 {
    return Err(PostProcessError::Shape(format!(
      "分类输出应为一维, 实际形状 {:?}",
      t.shape()
    )));
  }
  finite_values(t, "分类分数")
}

pub fn pp_cls(outputs: &[Tensor]) -> Result<Classifications, PostProcessError> {
  sorted_descending(class_scores(outputs)?)
}

pub fn pp_cls_softmax(outputs: &[Tensor]) -> Result<Classifications, PostProcessError> {
  let logits = class_scores(outputs)?;
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
  let sum: f32 = exp.iter().sum();
  sorted_descending(exp.into_iter().map(|v| v / sum).collect())
}

/// 目标检测输出的四个张量里，分数与类别的排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectionLayout {
  BoxesClassesScoresNumber,
  BoxesScoresClassesNumber,
}

fn object_detection(outputs: &[Tensor], layout: DetectionLayout) -> Result<Detections, PostProcessError> {
  require(outputs, 4)?;
  let (class_index, score_index) = match layout {
    DetectionLayout::BoxesClassesScoresNumber => (1, 2),
    DetectionLayout::BoxesScoresClassesNumber => (2, 1),
  };

  let count = outputs[3]
    .iter()
    .next()
    .copied()
    .ok_or_else(|| PostProcessError::Shape("检测数量张量为空".to_string()))?;
  let boxes = finite_values(outputs[0].view(), "边框")?;
  if boxes.len() % 4 != 0 {
    return Err(PostProcessError::Shape(format!(
      "边框张量元素数 {} 不是 4 的倍数",
      boxes.len()
    )));
  }
  let classes = finite_values(outputs[class_index].view(), "类别")?;
  let scores = finite_values(outputs[score_index].view(), "分数")?;

  let available = (boxes.len() / 4).min(classes.len()).min(scores.len());
  if !count.is_finite() || count < 0.0 || count as usize > available {
    return Err(PostProcessError::DetectionCount { count, available });
  }
  let n = count as usize;
  debug!("检测数量: {}", n);

  // 模型给出 [y0, x0, y1, x1]
  let bbox = boxes
    .chunks_exact(4)
    .take(n)
    .map(|b| [b[1], b[0], b[3], b[2]])
    .collect();
  let class_id = classes[..n].iter().map(|&c| c as i32).collect();
  let confidence = scores[..n].to_vec();
  Ok(Detections::new(bbox, confidence, class_id)?)
}

pub fn pp_od_bcsn(outputs: &[Tensor]) -> Result<Detections, PostProcessError> {
  object_detection(outputs, DetectionLayout::BoxesClassesScoresNumber)
}

pub fn pp_od_bscn(outputs: &[Tensor]) -> Result<Detections, PostProcessError> {
  object_detection(outputs, DetectionLayout::BoxesScoresClassesNumber)
}

pub fn pp_od_efficientdet_lite0(outputs: &[Tensor]) -> Result<Detections, PostProcessError> {
  let detections = pp_od_bscn(outputs)?;
  let bbox = detections
    .bbox()
    .iter()
    .map(|b| b.map(|v| v / EFFICIENTDET_LITE0_INPUT))
    .collect();
  Ok(Detections::new(
    bbox,
    detections.confidence().to_vec(),
    detections.class_id().to_vec(),
  )?)
}

/// 交给原生解码器，并把关键点归一化到输入尺寸 `(w, h)`
pub fn pp_posenet(
  outputs: &[Tensor],
  decoder: &dyn PoseDecoder,
  input_size: (u32, u32),
) -> Result<Poses, PostProcessError> {
  require(outputs, 3)?;
  let buffers = outputs[..3]
    .iter()
    .map(|t| {
      t.as_slice_memory_order()
        .ok_or_else(|| PostProcessError::Shape("PoseNet 输入张量不连续".to_string()))
    })
    .collect::<Result<Vec<_>, _>>()?;

  let mut output = PosenetOutput::default();
  decoder.decode(buffers[0], buffers[1], buffers[2], &mut output)?;
  let n = output.detection_count()?;

  let (w, h) = (input_size.0 as f32, input_size.1 as f32);
  let keypoints = output.pose_keypoints[..n]
    .iter()
    .map(|p| {
      p.keypoints
        .iter()
        .enumerate()
        .map(|(i, &v)| if i % 2 == 0 { v / h } else { v / w })
        .collect()
    })
    .collect();
  let keypoint_scores = output.pose_keypoint_scores[..n]
    .iter()
    .map(|s| s.scores.to_vec())
    .collect();

  Ok(Poses::new(
    output.pose_scores[..n].to_vec(),
    keypoints,
    keypoint_scores,
  )?)
}

pub fn pp_segment(outputs: &[Tensor]) -> Result<Segments, PostProcessError> {
  require(outputs, 1)?;
  let t = squeeze(&outputs[0]);
  let grid = t
    .into_dimensionality::<Ix2>()
    .map_err(|_| PostProcessError::Shape(format!("分割输出应为二维, 实际形状 {:?}", outputs[0].shape())))?;
  if let Some(bad) = grid.iter().find(|v| !v.is_finite() || **v < 0.0 || **v > 255.0) {
    return Err(PostProcessError::NonNumeric(format!("分割编号 {} 超出 0..=255", bad)));
  }
  Ok(Segments::new(grid.mapv(|v| v as u8)))
}

pub fn pp_anomaly(outputs: &[Tensor]) -> Result<Anomaly, PostProcessError> {
  require(outputs, 1)?;
  let t = squeeze(&outputs[0]);
  if t.ndim() != 3 || t.shape()[2] < 2 {
    return Err(PostProcessError::Shape(format!(
      "异常检测输出应为 (H, W, C>=2), 实际形状 {:?}",
      t.shape()
    )));
  }
  let score = t[[0, 0, 1]];
  let heatmap = t
    .index_axis(Axis(2), 0)
    .into_dimensionality::<Ix2>()
    .map_err(|e| PostProcessError::Shape(e.to_string()))?
    .to_owned();
  if !score.is_finite() || heatmap.iter().any(|v| !v.is_finite()) {
    return Err(PostProcessError::NonNumeric("异常分数或热力图".to_string()));
  }
  Ok(Anomaly::new(score, heatmap))
}

#[cfg(test)]
mod tests {
  use ndarray::{ArrayD, IxDyn, ShapeBuilder};

  use super::*;
  use crate::result::ResultVariant;

  fn tensor(shape: &[usize], values: &[f32]) -> Tensor {
    ArrayD::from_shape_vec(IxDyn(shape), values.to_vec()).unwrap()
  }

  #[test]
  fn classification_is_sorted_descending() {
    let result = pp_cls(&[tensor(&[4], &[0.1, 0.4, 0.3, 0.2])]).unwrap();
    assert_eq!(result.class_id(), &[1, 2, 3, 0]);
    assert_eq!(result.confidence(), &[0.4, 0.3, 0.2, 0.1]);
  }

  #[test]
  fn classification_ties_keep_index_order() {
    let result = pp_cls(&[tensor(&[1, 3], &[0.2, 0.5, 0.5])]).unwrap();
    assert_eq!(result.class_id(), &[1, 2, 0]);
  }

  #[test]
  fn softmax_sums_to_one() {
    let result = pp_cls_softmax(&[tensor(&[3], &[1.0, 3.0, 2.0])]).unwrap();
    let sum: f32 = result.confidence().iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert_eq!(result.class_id(), &[1, 2, 0]);
  }

  fn detection_outputs(count: f32) -> Vec<Tensor> {
    vec![
      tensor(&[2, 4], &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]),
      tensor(&[2], &[1.0, 2.0]),
      tensor(&[2], &[0.9, 0.8]),
      tensor(&[1], &[count]),
    ]
  }

  #[test]
  fn boxes_are_reordered_to_xy() {
    let det = pp_od_bcsn(&detection_outputs(2.0)).unwrap();
    assert_eq!(det.bbox(), &[[0.1, 0.0, 0.3, 0.2], [0.5, 0.4, 0.7, 0.6]]);
    assert_eq!(det.class_id(), &[1, 2]);
    assert_eq!(det.confidence(), &[0.9, 0.8]);
  }

  #[test]
  fn scores_first_layout_swaps_tensors() {
    let det = pp_od_bscn(&detection_outputs(1.0)).unwrap();
    assert_eq!(det.len(), 1);
    assert_eq!(det.class_id(), &[0]);
    assert_eq!(det.confidence(), &[1.0]);
  }

  #[test]
  fn column_major_boxes_are_read_logically() {
    let mut outputs = detection_outputs(2.0);
    let flat = [0.0, 0.4, 0.1, 0.5, 0.2, 0.6, 0.3, 0.7];
    outputs[0] = ArrayD::from_shape_vec(IxDyn(&[2, 4]).f(), flat.to_vec()).unwrap();
    let det = pp_od_bcsn(&outputs).unwrap();
    assert_eq!(det.bbox()[1], [0.5, 0.4, 0.7, 0.6]);
  }

  #[test]
  fn count_beyond_rows_is_rejected() {
    assert!(matches!(
      pp_od_bcsn(&detection_outputs(3.0)),
      Err(PostProcessError::DetectionCount { available: 2, .. })
    ));
    assert!(matches!(
      pp_od_bcsn(&detection_outputs(-1.0)),
      Err(PostProcessError::DetectionCount { .. })
    ));
  }

  #[test]
  fn efficientdet_boxes_are_scaled() {
    let mut outputs = detection_outputs(1.0);
    outputs[0] = tensor(&[1, 4], &[32.0, 64.0, 160.0, 320.0]);
    let det = pp_od_efficientdet_lite0(&outputs).unwrap();
    assert_eq!(det.bbox()[0], [0.2, 0.1, 1.0, 0.5]);
  }

  #[test]
  fn missing_tensors_are_reported() {
    assert!(matches!(
      pp_od_bcsn(&detection_outputs(1.0)[..2]),
      Err(PostProcessError::TensorCount { expected: 4, actual: 2 })
    ));
  }

  #[test]
  fn extra_tensors_are_reported() {
    let mut outputs = detection_outputs(1.0);
    outputs.push(tensor(&[1], &[0.0]));
    assert!(matches!(
      pp_od_bcsn(&outputs),
      Err(PostProcessError::TensorCount { expected: 4, actual: 5 })
    ));
    assert!(matches!(
      pp_cls(&[tensor(&[2], &[0.1, 0.9]), tensor(&[2], &[0.1, 0.9])]),
      Err(PostProcessError::TensorCount { expected: 1, actual: 2 })
    ));
  }

  #[test]
  fn segmentation_mask_ids() {
    let seg = pp_segment(&[tensor(&[1, 2, 3], &[0.0, 2.0, 2.0, 1.0, 0.0, 5.0])]).unwrap();
    assert_eq!(seg.indeces(), vec![1, 2, 5]);
    assert!(!seg.indeces().contains(&0));
    assert!(pp_segment(&[tensor(&[2], &[300.0, 1.0])]).is_err());
  }

  #[test]
  fn anomaly_takes_score_and_first_channel() {
    let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
    let anomaly = pp_anomaly(&[tensor(&[1, 2, 2, 2], &values)]).unwrap();
    assert_eq!(anomaly.score(), 1.0);
    assert_eq!(anomaly.heatmap().iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0, 6.0]);
    assert!(pp_anomaly(&[tensor(&[2, 2], &values[..4])]).is_err());
  }

  struct FixedDecoder;

  impl PoseDecoder for FixedDecoder {
    fn decode(
      &self,
      heatmaps: &[f32],
      _short_offsets: &[f32],
      _mid_offsets: &[f32],
      output: &mut PosenetOutput,
    ) -> Result<(), PostProcessError> {
      output.n_detections = heatmaps.len() as i32;
      output.pose_scores[0] = 0.9;
      output.pose_keypoints[0].keypoints[0] = 353.0;
      output.pose_keypoints[0].keypoints[1] = 240.5;
      output.pose_keypoint_scores[0].scores[0] = 0.7;
      Ok(())
    }
  }

  #[test]
  fn posenet_keypoints_are_normalized() {
    let outputs = vec![tensor(&[1], &[0.0]), tensor(&[1], &[0.0]), tensor(&[1], &[0.0])];
    let poses = pp_posenet(&outputs, &FixedDecoder, (481, 353)).unwrap();
    assert_eq!(poses.n_detections(), 1);
    assert_eq!(poses.confidence(), &[0.9]);
    assert_eq!(poses.keypoints()[0][0], 1.0);
    assert_eq!(poses.keypoints()[0][1], 0.5);
    assert_eq!(poses.keypoint_scores()[0].len(), 17);
  }

  #[test]
  fn posenet_rejects_bad_counts() {
    let outputs = vec![tensor(&[11], &[0.0; 11]), tensor(&[1], &[0.0]), tensor(&[1], &[0.0])];
    assert!(matches!(
      pp_posenet(&outputs, &FixedDecoder, (481, 353)),
      Err(PostProcessError::NativeDecodeFailure(_))
    ));
  }
}
