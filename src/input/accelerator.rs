// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/accelerator.rs - 加速器驱动接口
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
use thiserror::Error;

use super::input_tensor::InputTensorConfig;
use crate::roi::{RoiAbs, SENSOR_H, SENSOR_W};

#[derive(Error, Debug)]
pub enum AcceleratorError {
  #[error("加速器已断开")]
  Disconnected,
  #[error("采集元数据失败: {0}")]
  Capture(String),
  #[error("配置加速器失败: {0}")]
  Configure(String),
}

/// 每个周期从加速器取得的元数据
#[derive(Debug, Clone, Default)]
pub struct Metadata {
  /// 扁平的输出张量，本周期没有推理结果时为空
  pub output_tensor: Option<Vec<f32>>,
  /// 描述输出张量布局的侧信道结构
  pub output_tensor_info: Option<Vec<u8>>,
  /// 平面排列的原始输入张量
  pub input_tensor: Option<Vec<u8>>,
  /// 传感器预览图像
  pub preview: Option<RgbImage>,
}

/// 带神经网络加速器的相机驱动
///
/// `capture_metadata` 阻塞直到下一个周期。返回 [`AcceleratorError::Disconnected`]
/// 时流水线结束，其他错误只跳过当前周期。
pub trait Accelerator: Send {
  fn capture_metadata(&mut self) -> Result<Metadata, AcceleratorError>;

  /// 设置推理使用的传感器裁剪区域（像素）
  fn set_inference_roi_abs(&mut self, roi: RoiAbs) -> Result<(), AcceleratorError>;

  fn input_tensor_config(&self) -> Option<InputTensorConfig>;

  fn sensor_size(&self) -> (u32, u32) {
    (SENSOR_W, SENSOR_H)
  }
}

impl<A: Accelerator + ?Sized> Accelerator for Box<A> {
  fn capture_metadata(&mut self) -> Result<Metadata, AcceleratorError> {
    (**self).capture_metadata()
  }

  fn set_inference_roi_abs(&mut self, roi: RoiAbs) -> Result<(), AcceleratorError> {
    (**self).set_inference_roi_abs(roi)
  }

  fn input_tensor_config(&self) -> Option<InputTensorConfig> {
    (**self).input_tensor_config()
  }

  fn sensor_size(&self) -> (u32, u32) {
    (**self).sensor_size()
  }
}
