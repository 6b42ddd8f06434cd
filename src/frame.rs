// 该文件是 Yunjing （云镜） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::RgbImage;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};

use crate::model::ColorFormat;
use crate::result::ModelResult;
use crate::result::codec::{CodecError, compress_to_base64, decompress_from_base64};
use crate::roi::Roi;

const RGB_CHANNELS: u32 = 3;

/// 帧图像的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
  /// 传感器预览流
  #[default]
  SensorPreview,
  /// 由加速器输入张量还原
  InputTensor,
}

/// 流水线发布的一帧
///
/// 检测结果保持在输入张量（裁剪后）坐标系下，第一次通过 [`Frame::detections`]
/// 读取时才按 `roi` 补偿到全画幅坐标。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  pub timestamp: String,
  image: Option<RgbImage>,
  pub image_kind: ImageKind,
  pub width: u32,
  pub height: u32,
  pub channels: u32,
  detections: ModelResult,
  pub new_detection: bool,
  pub fps: f32,
  pub dps: f32,
  pub color_format: ColorFormat,
  pub input_tensor: Option<Vec<u8>>,
  pub roi: Roi,
}

impl Frame {
  /// 无图像的帧，时间戳取当前本地时间
  pub fn new(detections: ModelResult, roi: Roi) -> Self {
    Self {
      timestamp: chrono::Local::now().to_rfc3339(),
      image: None,
      image_kind: ImageKind::default(),
      width: 0,
      height: 0,
      channels: 0,
      detections,
      new_detection: false,
      fps: 0.0,
      dps: 0.0,
      color_format: ColorFormat::Bgr,
      input_tensor: None,
      roi,
    }
  }

  pub fn with_image(mut self, image: Option<RgbImage>, kind: ImageKind) -> Self {
    self.image_kind = kind;
    self.set_image(image);
    self
  }

  pub fn image(&self) -> Option<&RgbImage> {
    self.image.as_ref()
  }

  /// 替换图像，并同步宽、高与通道数
  pub fn set_image(&mut self, image: Option<RgbImage>) {
    let (width, height, channels) = match &image {
      Some(image) => (image.width(), image.height(), RGB_CHANNELS),
      None => (0, 0, 0),
    };
    self.width = width;
    self.height = height;
    self.channels = channels;
    self.image = image;
  }

  /// 返回补偿到全画幅坐标的检测结果
  pub fn detections(&mut self) -> &ModelResult {
    self.detections.compensate_for_roi(&self.roi);
    &self.detections
  }

  /// 返回检测结果，不做补偿
  pub fn detections_raw(&self) -> &ModelResult {
    &self.detections
  }

  pub fn set_detections(&mut self, detections: ModelResult) {
    self.detections = detections;
  }
}

#[derive(Serialize, Deserialize)]
struct FrameRecord {
  timestamp: String,
  image: Option<String>,
  image_shape: Option<[u32; 3]>,
  image_type: ImageKind,
  width: u32,
  height: u32,
  channels: u32,
  detections: ModelResult,
  new_detection: bool,
  fps: f32,
  dps: f32,
  color_format: ColorFormat,
  #[serde(default)]
  input_tensor: Option<String>,
  roi: Roi,
}

impl FrameRecord {
  fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
    let (image, image_shape) = match &frame.image {
      Some(image) => (
        Some(compress_to_base64(image.as_raw())?),
        Some([image.height(), image.width(), RGB_CHANNELS]),
      ),
      None => (None, None),
    };
    let input_tensor = frame
      .input_tensor
      .as_deref()
      .map(compress_to_base64)
      .transpose()?;

    Ok(Self {
      timestamp: frame.timestamp.clone(),
      image,
      image_shape,
      image_type: frame.image_kind,
      width: frame.width,
      height: frame.height,
      channels: frame.channels,
      detections: frame.detections.clone(),
      new_detection: frame.new_detection,
      fps: frame.fps,
      dps: frame.dps,
      color_format: frame.color_format,
      input_tensor,
      roi: frame.roi,
    })
  }
}

impl TryFrom<FrameRecord> for Frame {
  type Error = CodecError;

  fn try_from(record: FrameRecord) -> Result<Self, Self::Error> {
    let image = match (record.image, record.image_shape) {
      (Some(text), Some([h, w, c])) => {
        let bytes = decompress_from_base64(&text)?;
        let actual = bytes.len();
        let shape_mismatch = || CodecError::ShapeMismatch {
          shape: vec![h as usize, w as usize, c as usize],
          actual,
        };
        let expected = (h as usize)
          .checked_mul(w as usize)
          .and_then(|n| n.checked_mul(c as usize));
        if c != RGB_CHANNELS || expected != Some(actual) {
          return Err(shape_mismatch());
        }
        Some(RgbImage::from_raw(w, h, bytes).ok_or_else(shape_mismatch)?)
      }
      _ => None,
    };
    let input_tensor = record
      .input_tensor
      .as_deref()
      .map(decompress_from_base64)
      .transpose()?;

    Ok(Frame {
      timestamp: record.timestamp,
      image,
      image_kind: record.image_type,
      width: record.width,
      height: record.height,
      channels: record.channels,
      detections: record.detections,
      new_detection: record.new_detection,
      fps: record.fps,
      dps: record.dps,
      color_format: record.color_format,
      input_tensor,
      roi: record.roi,
    })
  }
}

impl Serialize for Frame {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    FrameRecord::from_frame(self)
      .map_err(S::Error::custom)?
      .serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Frame {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let record = FrameRecord::deserialize(deserializer)?;
    Frame::try_from(record).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;
  use crate::result::Detections;

  fn sample() -> Frame {
    let mut detections = Detections::new(vec![[0.1, 0.2, 0.3, 0.4]], vec![0.9], vec![1]).unwrap();
    detections.set_tracker_id(vec![5]).unwrap();
    let roi = Roi::new(0.1, 0.2, 0.3, 0.4).unwrap();
    let mut frame = Frame::new(detections.into(), roi)
      .with_image(Some(RgbImage::from_pixel(64, 48, Rgb([127, 127, 127]))), ImageKind::SensorPreview);
    frame.timestamp = "2025-01-01T00:00:00Z".to_string();
    frame.new_detection = true;
    frame.fps = 30.0;
    frame.dps = 10.0;
    frame
  }

  #[test]
  fn image_sets_dimensions() {
    let mut frame = sample();
    assert_eq!((frame.width, frame.height, frame.channels), (64, 48, 3));
    frame.set_image(None);
    assert_eq!((frame.width, frame.height, frame.channels), (0, 0, 0));
  }

  #[test]
  fn detections_are_compensated_on_first_access() {
    let mut frame = sample();
    assert!(!frame.detections_raw().is_roi_compensated());
    let bbox = frame.detections().as_detections().unwrap().bbox()[0];
    assert!((bbox[0] - (0.1 + 0.1 * 0.3)).abs() < 1e-6);
    assert!((bbox[1] - (0.2 + 0.2 * 0.4)).abs() < 1e-6);

    let again = frame.detections().as_detections().unwrap().bbox()[0];
    assert_eq!(bbox, again);
  }

  #[test]
  fn json_round_trip_keeps_image_and_detections() {
    let frame = sample();
    let text = serde_json::to_string(&frame).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["image_shape"], serde_json::json!([48, 64, 3]));
    assert_eq!(value["detections"]["type"], "detections");
    assert_eq!(value["color_format"], "BGR");

    let restored: Frame = serde_json::from_str(&text).unwrap();
    assert_eq!(restored, frame);
    assert_eq!(
      restored.detections_raw().as_detections().unwrap().tracker_id(),
      Some(&[5][..])
    );
  }

  #[test]
  fn corrupt_image_shape_is_rejected() {
    let mut value = serde_json::to_value(sample()).unwrap();
    value["image_shape"] = serde_json::json!([10, 10, 3]);
    assert!(serde_json::from_value::<Frame>(value).is_err());
  }

  #[test]
  fn image_shape_must_cover_every_byte() {
    let mut value = serde_json::to_value(sample()).unwrap();
    // 字节数比 48x64x3 少，但仍够 32x64x3 使用
    value["image_shape"] = serde_json::json!([32, 64, 3]);
    assert!(serde_json::from_value::<Frame>(value.clone()).is_err());
    value["image_shape"] = serde_json::json!([u32::MAX, u32::MAX, 3]);
    assert!(serde_json::from_value::<Frame>(value).is_err());
  }
}
