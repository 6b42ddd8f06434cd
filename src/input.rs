// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input.rs - 帧输入
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

use thiserror::Error;

use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme};

mod accelerator;
mod ai_camera;
mod input_tensor;
pub mod metrics;
pub mod recording;

pub use self::accelerator::{Accelerator, AcceleratorError, Metadata};
pub use self::ai_camera::{
  AiCamera, AiCameraBuilder, CameraOptions, ConfigError, DEFAULT_QUEUE_CAPACITY, DEFAULT_RECV_TIMEOUT, FrameStream,
};
pub use self::input_tensor::{InputTensorConfig, InputTensorError, input_tensor_image};
pub use self::recording::{RecordingError, RecordingSource};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("录制回放错误: {0}")]
  RecordingError(#[from] RecordingError),
  #[error("相机配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的帧来源
///
/// 相机需要调用方提供加速器驱动，因此这里只处理无需外部资源的来源；
/// 已启动的 [`FrameStream`] 可通过 `From` 包装。
pub enum InputWrapper {
  Recording(RecordingSource),
  Camera(FrameStream),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      RecordingSource::SCHEME => Ok(InputWrapper::Recording(RecordingSource::from_url(url)?)),
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl From<FrameStream> for InputWrapper {
  fn from(stream: FrameStream) -> Self {
    InputWrapper::Camera(stream)
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Recording(source) => source.next(),
      InputWrapper::Camera(stream) => stream.next(),
    }
  }
}
