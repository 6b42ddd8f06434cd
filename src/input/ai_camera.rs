// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/ai_camera.rs - AI 相机帧采集流水线
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

//! # AI 相机
//!
//! 一个具名采集线程循环读取加速器元数据，解码输出张量并做后处理，把结果打包成
//! [`Frame`] 推入有界队列；消费端通过 [`FrameStream`] 迭代取帧。
//!
//! - 加速器本周期没有输出张量时，重发上一次的结果（`new_detection = false`）；
//!   还没有任何结果时跳过该周期。
//! - 队列满时生产端阻塞，期间定期检查停止标志。
//! - 消费端等待超时或生产端退出即视为流结束。
//! - 未部署模型但启用了输入张量时，每个周期只发布输入张量图像，结果为空。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::accelerator::{Accelerator, AcceleratorError, Metadata};
use super::input_tensor::{InputTensorConfig, InputTensorError, input_tensor_image};
use super::metrics::RateWindow;
use crate::frame::{Frame, ImageKind};
use crate::model::{Model, PostProcessError};
use crate::result::{Detections, ModelResult};
use crate::roi::{Roi, RoiError};
use crate::tensor::{OutputTensorInfo, TensorError, split_output_tensor};
use crate::{FromUrl, FromUrlWithScheme, query_flag, query_value};

pub const DEFAULT_QUEUE_CAPACITY: usize = 5;
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(120);
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WORKER_NAME: &str = "aicam-capture";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("尚未部署模型")]
  NoModel,
  #[error("ROI 无效: {0}")]
  Roi(#[from] RoiError),
  #[error("加速器错误: {0}")]
  Accelerator(#[from] AcceleratorError),
  #[error("加速器不支持输入张量")]
  InputTensorUnavailable,
  #[error("参数 {0} 无效")]
  InvalidParameter(&'static str),
  #[error("无法启动采集线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 单个周期内可恢复的错误，出现时丢弃该周期
#[derive(Error, Debug)]
enum CycleError {
  #[error("输出张量: {0}")]
  Tensor(#[from] TensorError),
  #[error("后处理: {0}")]
  PostProcess(#[from] PostProcessError),
  #[error("输入张量: {0}")]
  InputTensor(#[from] InputTensorError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraOptions {
  /// 不输出图像
  pub headless: bool,
  /// 用加速器的输入张量替代预览图像
  pub enable_input_tensor: bool,
  /// 整个流的运行时长
  pub timeout: Option<Duration>,
  pub queue_capacity: usize,
  pub recv_timeout: Duration,
}

impl Default for CameraOptions {
  fn default() -> Self {
    Self {
      headless: false,
      enable_input_tensor: false,
      timeout: None,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      recv_timeout: DEFAULT_RECV_TIMEOUT,
    }
  }
}

/// `aicam://?headless&input_tensor&timeout=60&queue=5&recv_timeout=120`
///
/// 时间单位均为秒。
#[derive(Debug, Clone, Default)]
pub struct AiCameraBuilder {
  options: CameraOptions,
}

impl FromUrlWithScheme for AiCameraBuilder {
  const SCHEME: &'static str = "aicam";
}

impl FromUrl for AiCameraBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch);
    }

    let defaults = CameraOptions::default();
    let options = CameraOptions {
      headless: query_flag(url, "headless").unwrap_or(false),
      enable_input_tensor: query_flag(url, "input_tensor").unwrap_or(false),
      timeout: query_seconds(url, "timeout")?,
      queue_capacity: query_value(url, "queue").unwrap_or(defaults.queue_capacity),
      recv_timeout: query_seconds(url, "recv_timeout")?.unwrap_or(defaults.recv_timeout),
    };
    debug!("AI 相机参数: {:?}", options);
    Ok(Self { options })
  }
}

/// 以秒为单位的时长参数，负数、NaN 与无穷大均视为无效
fn query_seconds(url: &Url, key: &'static str) -> Result<Option<Duration>, ConfigError> {
  query_value::<f64>(url, key)
    .map(|secs| Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidParameter(key)))
    .transpose()
}

impl AiCameraBuilder {
  pub fn headless(mut self, headless: bool) -> Self {
    self.options.headless = headless;
    self
  }

  pub fn enable_input_tensor(mut self, enable: bool) -> Self {
    self.options.enable_input_tensor = enable;
    self
  }

  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.options.timeout = timeout;
    self
  }

  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.options.queue_capacity = capacity;
    self
  }

  pub fn recv_timeout(mut self, timeout: Duration) -> Self {
    self.options.recv_timeout = timeout;
    self
  }

  pub fn build<A: Accelerator + 'static>(self, accelerator: A) -> Result<AiCamera<A>, ConfigError> {
    if self.options.queue_capacity == 0 {
      return Err(ConfigError::InvalidParameter("queue"));
    }
    Ok(AiCamera {
      accelerator,
      options: self.options,
      model: None,
      roi: Roi::FULL,
    })
  }
}

/// 已配置但尚未启动的 AI 相机
pub struct AiCamera<A: Accelerator> {
  accelerator: A,
  options: CameraOptions,
  model: Option<Arc<dyn Model>>,
  roi: Roi,
}

impl<A: Accelerator + 'static> AiCamera<A> {
  pub fn options(&self) -> &CameraOptions {
    &self.options
  }

  pub fn roi(&self) -> Roi {
    self.roi
  }

  /// 部署模型，并按模型要求设置推理裁剪区域
  pub fn deploy(&mut self, model: Arc<dyn Model>) -> Result<(), ConfigError> {
    info!(
      "部署模型 {}, 输入尺寸 {:?}",
      model.name(),
      model.input_tensor_size()
    );
    let roi = if model.preserve_aspect_ratio() {
      Roi::preserving_aspect(model.input_tensor_size(), self.accelerator.sensor_size())
    } else {
      Roi::FULL
    };
    self.model = Some(model);
    self.set_input_tensor_cropping(roi)
  }

  /// 设置推理裁剪区域，需要先部署模型
  pub fn set_input_tensor_cropping(&mut self, roi: Roi) -> Result<(), ConfigError> {
    if self.model.is_none() {
      return Err(ConfigError::NoModel);
    }
    // 字段是公开的，这里重新校验
    let roi = Roi::new(roi.left, roi.top, roi.width, roi.height)?;
    let abs = roi.to_absolute(self.accelerator.sensor_size());
    debug!("推理裁剪区域: {:?} -> {:?}", roi, abs);
    self.accelerator.set_inference_roi_abs(abs)?;
    self.roi = roi;
    Ok(())
  }

  /// 启动采集线程，返回帧流
  ///
  /// 未部署模型时只有启用输入张量才能启动。
  pub fn start(self) -> Result<FrameStream, ConfigError> {
    if self.model.is_none() && !self.options.enable_input_tensor {
      return Err(ConfigError::NoModel);
    }
    let input_config = self.accelerator.input_tensor_config();
    if self.options.enable_input_tensor && input_config.is_none() {
      return Err(ConfigError::InputTensorUnavailable);
    }
    if self.model.is_none() {
      info!("未部署模型, 仅输出输入张量图像");
    }
    let model = self.model;

    let (sender, receiver) = bounded(self.options.queue_capacity);
    let stop = Arc::new(AtomicBool::new(false));

    let worker = CaptureWorker {
      accelerator: self.accelerator,
      model,
      options: self.options.clone(),
      roi: self.roi,
      input_config,
      last_detections: None,
      last_input_tensor: None,
      last_image: None,
      dps: RateWindow::new(2),
      sender,
      stop: stop.clone(),
    };
    let handle = thread::Builder::new()
      .name(WORKER_NAME.to_string())
      .spawn(move || worker.run())?;

    info!("AI 相机已启动, 队列容量 {}", self.options.queue_capacity);
    Ok(FrameStream {
      receiver: Some(receiver),
      stop,
      worker: Some(handle),
      recv_timeout: self.options.recv_timeout,
      deadline: self.options.timeout.map(|t| Instant::now() + t),
      fps: RateWindow::new(1),
    })
  }
}

struct CaptureWorker<A: Accelerator> {
  accelerator: A,
  model: Option<Arc<dyn Model>>,
  options: CameraOptions,
  roi: Roi,
  input_config: Option<InputTensorConfig>,
  last_detections: Option<ModelResult>,
  last_input_tensor: Option<Vec<u8>>,
  last_image: Option<RgbImage>,
  dps: RateWindow,
  sender: Sender<Frame>,
  stop: Arc<AtomicBool>,
}

impl<A: Accelerator> CaptureWorker<A> {
  fn run(mut self) {
    info!("采集线程启动");
    self.dps.restart();
    while !self.stop.load(Ordering::Acquire) {
      let metadata = match self.accelerator.capture_metadata() {
        Ok(metadata) => metadata,
        Err(AcceleratorError::Disconnected) => {
          warn!("加速器已断开, 停止采集");
          break;
        }
        Err(e) => {
          warn!("采集失败, 跳过本周期: {}", e);
          continue;
        }
      };

      let frame = match self.cycle(metadata) {
        Ok(Some(frame)) => frame,
        Ok(None) => continue,
        Err(e) => {
          warn!("丢弃本周期: {}", e);
          continue;
        }
      };

      if !self.publish(frame) {
        break;
      }
    }
    info!("采集线程退出");
  }

  fn cycle(&mut self, metadata: Metadata) -> Result<Option<Frame>, CycleError> {
    let Metadata {
      output_tensor,
      output_tensor_info,
      input_tensor,
      preview,
    } = metadata;

    let Some(model) = self.model.clone() else {
      return self.input_tensor_only(input_tensor).map(Some);
    };

    if !self.options.headless && !self.options.enable_input_tensor {
      if let Some(preview) = preview {
        self.last_image = Some(preview);
      }
    }

    let (detections, new_detection) = match output_tensor {
      Some(buffer) => {
        let info = output_tensor_info
          .as_deref()
          .ok_or_else(|| TensorError::MalformedLayout("缺少输出张量布局".to_string()))?;
        let layout = OutputTensorInfo::parse(info)?;
        let outputs = split_output_tensor(&buffer, &layout.shapes)?;
        let detections = model.post_process(&outputs)?;

        if self.options.enable_input_tensor {
          if !self.options.headless {
            let raw = input_tensor.as_deref().ok_or(InputTensorError::Missing)?;
            let config = self
              .input_config
              .as_ref()
              .ok_or_else(|| InputTensorError::InvalidConfig("加速器未提供配置".to_string()))?;
            self.last_image = Some(input_tensor_image(raw, config)?);
          }
          self.last_input_tensor = input_tensor;
        }

        let dps = self.dps.tick();
        debug!("新的推理结果: {} 个, dps {:.2}", detections.len(), dps);
        self.last_detections = Some(detections.clone());
        (detections, true)
      }
      None => match &self.last_detections {
        Some(last) => (last.clone(), false),
        None => return Ok(None),
      },
    };

    let kind = if self.options.enable_input_tensor {
      ImageKind::InputTensor
    } else {
      ImageKind::SensorPreview
    };
    let image = if self.options.headless {
      None
    } else {
      self.last_image.clone()
    };

    let mut frame = Frame::new(detections, self.roi).with_image(image, kind);
    frame.new_detection = new_detection;
    frame.dps = self.dps.rate();
    if self.options.enable_input_tensor {
      frame.input_tensor = self.last_input_tensor.clone();
    }
    Ok(Some(frame))
  }

  fn input_tensor_only(&mut self, input_tensor: Option<Vec<u8>>) -> Result<Frame, CycleError> {
    let raw = input_tensor.ok_or(InputTensorError::Missing)?;
    let image = if self.options.headless {
      None
    } else {
      let config = self
        .input_config
        .as_ref()
        .ok_or_else(|| InputTensorError::InvalidConfig("加速器未提供配置".to_string()))?;
      Some(input_tensor_image(&raw, config)?)
    };
    let mut frame = Frame::new(Detections::default().into(), self.roi).with_image(image, ImageKind::InputTensor);
    frame.input_tensor = Some(raw);
    Ok(frame)
  }

  /// 返回 `false` 表示应当停止
  fn publish(&self, mut frame: Frame) -> bool {
    loop {
      if self.stop.load(Ordering::Acquire) {
        return false;
      }
      match self.sender.send_timeout(frame, SEND_POLL_INTERVAL) {
        Ok(()) => return true,
        Err(SendTimeoutError::Timeout(back)) => frame = back,
        Err(SendTimeoutError::Disconnected(_)) => {
          debug!("消费端已关闭");
          return false;
        }
      }
    }
  }
}

/// 消费端的帧迭代器，丢弃时停止并回收采集线程
pub struct FrameStream {
  receiver: Option<Receiver<Frame>>,
  stop: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
  recv_timeout: Duration,
  deadline: Option<Instant>,
  fps: RateWindow,
}

impl FrameStream {
  pub fn fps(&self) -> f32 {
    self.fps.rate()
  }

  pub fn is_running(&self) -> bool {
    self.worker.as_ref().is_some_and(|w| !w.is_finished())
  }

  pub fn stop(&mut self) {
    self.stop.store(true, Ordering::Release);
    self.receiver.take();
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        warn!("采集线程异常退出");
      } else {
        debug!("采集线程已回收");
      }
    }
  }
}

impl Iterator for FrameStream {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.deadline.is_some_and(|d| Instant::now() >= d) {
      info!("到达设定的运行时长, 停止");
      self.stop();
      return None;
    }

    let fps = self.fps.tick();
    let receiver = self.receiver.as_ref()?;
    match receiver.recv_timeout(self.recv_timeout) {
      Ok(mut frame) => {
        frame.fps = fps;
        Some(frame)
      }
      Err(RecvTimeoutError::Timeout) => {
        warn!("等待帧超时 ({:?}), 结束", self.recv_timeout);
        None
      }
      Err(RecvTimeoutError::Disconnected) => {
        info!("采集线程已结束");
        None
      }
    }
  }
}

impl Drop for FrameStream {
  fn drop(&mut self) {
    self.stop();
  }
}
