// 该文件是 Yunjing （云镜） 项目的一部分。
// src/model.rs - 模型
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

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::result::ModelResult;
use crate::tensor::Tensor;
use crate::{FromUrl, FromUrlWithScheme, query_flag, query_value};

mod posenet;
pub mod postprocess;

#[cfg(feature = "posenet_native")]
pub use self::posenet::NativePoseDecoder;
pub use self::posenet::{
  MAX_POSES, NUM_KEYPOINTS, POSENET_INPUT_SIZE, PoseDecoder, PoseKeypointScores, PoseKeypoints, PosenetOutput,
};
pub use self::postprocess::PostProcessError;

/// 模型期望的输入颜色顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorFormat {
  #[default]
  #[serde(rename = "RGB")]
  Rgb,
  #[serde(rename = "BGR")]
  Bgr,
}

impl std::str::FromStr for ColorFormat {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ColorFormat::Rgb),
      "bgr" => Ok(ColorFormat::Bgr),
      _ => Err(ModelError::InvalidParameter("color", s.to_string())),
    }
  }
}

/// 部署到加速器上的模型
pub trait Model: Send + Sync {
  fn name(&self) -> &str;

  /// 输入张量尺寸 `(w, h)`
  fn input_tensor_size(&self) -> (u32, u32);

  fn color_format(&self) -> ColorFormat;

  fn preserve_aspect_ratio(&self) -> bool;

  fn post_process(&self, outputs: &[Tensor]) -> Result<ModelResult, PostProcessError>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型路径必须使用 {0} 方案")]
  Scheme(&'static str),
  #[error("未知的后处理函数: {0}")]
  UnknownPostProcessor(String),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("未指定模型输入尺寸")]
  MissingInputSize,
  #[error("姿态解码器不可用: {0}")]
  PoseDecoderUnavailable(String),
}

/// 内置后处理函数
#[derive(Clone)]
pub enum PostProcessor {
  Cls,
  ClsSoftmax,
  OdBcsn,
  OdBscn,
  OdEfficientdetLite0,
  Posenet(Arc<dyn PoseDecoder>),
  Segment,
  Anomaly,
}

impl fmt::Debug for PostProcessor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl PostProcessor {
  pub fn name(&self) -> &'static str {
    match self {
      PostProcessor::Cls => "cls",
      PostProcessor::ClsSoftmax => "cls_softmax",
      PostProcessor::OdBcsn => "od_bcsn",
      PostProcessor::OdBscn => "od_bscn",
      PostProcessor::OdEfficientdetLite0 => "od_efficientdet_lite0",
      PostProcessor::Posenet(_) => "posenet",
      PostProcessor::Segment => "segment",
      PostProcessor::Anomaly => "anomaly",
    }
  }

  /// 按名称选择，PoseNet 需要额外提供解码器
  pub fn from_name(name: &str, decoder: Option<Arc<dyn PoseDecoder>>) -> Result<Self, ModelError> {
    let name = name.strip_prefix("pp_").unwrap_or(name);
    match name {
      "cls" => Ok(PostProcessor::Cls),
      "cls_softmax" => Ok(PostProcessor::ClsSoftmax),
      "od_bcsn" => Ok(PostProcessor::OdBcsn),
      "od_bscn" => Ok(PostProcessor::OdBscn),
      "od_efficientdet_lite0" => Ok(PostProcessor::OdEfficientdetLite0),
      "posenet" => decoder
        .map(PostProcessor::Posenet)
        .ok_or_else(|| ModelError::PoseDecoderUnavailable("未提供解码器".to_string())),
      "segment" => Ok(PostProcessor::Segment),
      "anomaly" => Ok(PostProcessor::Anomaly),
      other => Err(ModelError::UnknownPostProcessor(other.to_string())),
    }
  }

  pub fn apply(&self, outputs: &[Tensor], input_size: (u32, u32)) -> Result<ModelResult, PostProcessError> {
    use self::postprocess::*;

    let result: ModelResult = match self {
      PostProcessor::Cls => pp_cls(outputs)?.into(),
      PostProcessor::ClsSoftmax => pp_cls_softmax(outputs)?.into(),
      PostProcessor::OdBcsn => pp_od_bcsn(outputs)?.into(),
      PostProcessor::OdBscn => pp_od_bscn(outputs)?.into(),
      PostProcessor::OdEfficientdetLite0 => pp_od_efficientdet_lite0(outputs)?.into(),
      PostProcessor::Posenet(decoder) => pp_posenet(outputs, decoder.as_ref(), input_size)?.into(),
      PostProcessor::Segment => pp_segment(outputs)?.into(),
      PostProcessor::Anomaly => pp_anomaly(outputs)?.into(),
    };
    Ok(result)
  }
}

/// 由 URL 描述的网络
#[derive(Debug, Clone)]
pub struct Network {
  name: String,
  model_file: PathBuf,
  input_size: (u32, u32),
  color_format: ColorFormat,
  preserve_aspect_ratio: bool,
  post_processor: PostProcessor,
}

impl Network {
  pub fn model_file(&self) -> &PathBuf {
    &self.model_file
  }

  pub fn post_processor(&self) -> &PostProcessor {
    &self.post_processor
  }
}

impl Model for Network {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_tensor_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn color_format(&self) -> ColorFormat {
    self.color_format
  }

  fn preserve_aspect_ratio(&self) -> bool {
    self.preserve_aspect_ratio
  }

  fn post_process(&self, outputs: &[Tensor]) -> Result<ModelResult, PostProcessError> {
    self.post_processor.apply(outputs, self.input_size)
  }
}

/// 网络构建器
///
/// `network:///path/to/model.rpk?pp=od_bcsn&width=320&height=320&preserve_aspect_ratio&color=rgb`
///
/// PoseNet 网络可通过 `posenet_lib=/path/libposenet.so` 指定解码库。
pub struct NetworkBuilder {
  model_file: PathBuf,
  post_processor: String,
  input_size: Option<(u32, u32)>,
  color_format: ColorFormat,
  preserve_aspect_ratio: bool,
  pose_decoder: Option<Arc<dyn PoseDecoder>>,
  posenet_lib: Option<PathBuf>,
}

impl FromUrlWithScheme for NetworkBuilder {
  const SCHEME: &'static str = "network";
}

impl FromUrl for NetworkBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::Scheme(Self::SCHEME));
    }

    let post_processor = url
      .query_pairs()
      .find(|(k, _)| k == "pp")
      .map(|(_, v)| v.into_owned())
      .ok_or_else(|| ModelError::InvalidParameter("pp", "缺失".to_string()))?;

    let width = query_value::<u32>(url, "width");
    let height = query_value::<u32>(url, "height");
    let input_size = width.zip(height);

    let color_format = match url.query_pairs().find(|(k, _)| k == "color") {
      Some((_, v)) => v.parse()?,
      None => ColorFormat::default(),
    };

    let posenet_lib = url
      .query_pairs()
      .find(|(k, _)| k == "posenet_lib")
      .map(|(_, v)| PathBuf::from(v.as_ref()));

    Ok(NetworkBuilder {
      model_file: PathBuf::from(url.path()),
      post_processor,
      input_size,
      color_format,
      preserve_aspect_ratio: query_flag(url, "preserve_aspect_ratio").unwrap_or(false),
      pose_decoder: None,
      posenet_lib,
    })
  }
}

impl NetworkBuilder {
  pub fn new<P: Into<PathBuf>>(model_file: P, post_processor: &str) -> Self {
    NetworkBuilder {
      model_file: model_file.into(),
      post_processor: post_processor.to_string(),
      input_size: None,
      color_format: ColorFormat::default(),
      preserve_aspect_ratio: false,
      pose_decoder: None,
      posenet_lib: None,
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = Some((width, height));
    self
  }

  pub fn color_format(mut self, color_format: ColorFormat) -> Self {
    self.color_format = color_format;
    self
  }

  pub fn preserve_aspect_ratio(mut self, preserve: bool) -> Self {
    self.preserve_aspect_ratio = preserve;
    self
  }

  pub fn pose_decoder(mut self, decoder: Arc<dyn PoseDecoder>) -> Self {
    self.pose_decoder = Some(decoder);
    self
  }

  fn resolve_pose_decoder(&self) -> Result<Option<Arc<dyn PoseDecoder>>, ModelError> {
    if let Some(decoder) = &self.pose_decoder {
      return Ok(Some(decoder.clone()));
    }
    match &self.posenet_lib {
      #[cfg(feature = "posenet_native")]
      Some(path) => NativePoseDecoder::load(path)
        .map(|d| Some(Arc::new(d) as Arc<dyn PoseDecoder>))
        .map_err(|e| ModelError::PoseDecoderUnavailable(e.to_string())),
      #[cfg(not(feature = "posenet_native"))]
      Some(_) => Err(ModelError::PoseDecoderUnavailable(
        "未启用 posenet_native 特性".to_string(),
      )),
      None => Ok(None),
    }
  }

  pub fn build(self) -> Result<Network, ModelError> {
    let post_processor = PostProcessor::from_name(&self.post_processor, self.resolve_pose_decoder()?)?;

    let input_size = match (self.input_size, &post_processor) {
      (Some(size), _) => size,
      (None, PostProcessor::Posenet(_)) => POSENET_INPUT_SIZE,
      (None, _) => return Err(ModelError::MissingInputSize),
    };
    if input_size.0 == 0 || input_size.1 == 0 {
      return Err(ModelError::InvalidParameter("width/height", format!("{:?}", input_size)));
    }

    let name = self
      .model_file
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| post_processor.name().to_string());

    info!("网络 {} 使用后处理 {}", name, post_processor.name());
    debug!(
      "输入尺寸: {:?}, 颜色: {:?}, 保持宽高比: {}",
      input_size, self.color_format, self.preserve_aspect_ratio
    );

    Ok(Network {
      name,
      model_file: self.model_file,
      input_size,
      color_format: self.color_format,
      preserve_aspect_ratio: self.preserve_aspect_ratio,
      post_processor,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_from_url() {
    let url = Url::parse("network:///models/ssd_mobilenet.rpk?pp=od_bcsn&width=300&height=300&preserve_aspect_ratio&color=bgr")
      .unwrap();
    let network = NetworkBuilder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(network.name(), "ssd_mobilenet");
    assert_eq!(network.input_tensor_size(), (300, 300));
    assert_eq!(network.color_format(), ColorFormat::Bgr);
    assert!(network.preserve_aspect_ratio());
    assert_eq!(network.post_processor().name(), "od_bcsn");
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("file:///models/a.rpk?pp=cls").unwrap();
    assert!(matches!(NetworkBuilder::from_url(&url), Err(ModelError::Scheme("network"))));
  }

  #[test]
  fn unknown_post_processor_is_rejected() {
    let result = NetworkBuilder::new("/m.rpk", "pp_yolo").input_size(1, 1).build();
    assert!(matches!(result, Err(ModelError::UnknownPostProcessor(_))));
  }

  #[test]
  fn input_size_is_required_except_for_posenet() {
    assert!(matches!(
      NetworkBuilder::new("/m.rpk", "cls").build(),
      Err(ModelError::MissingInputSize)
    ));

    struct NoPoses;
    impl PoseDecoder for NoPoses {
      fn decode(&self, _: &[f32], _: &[f32], _: &[f32], _: &mut PosenetOutput) -> Result<(), PostProcessError> {
        Ok(())
      }
    }
    let network = NetworkBuilder::new("/m.rpk", "posenet")
      .pose_decoder(Arc::new(NoPoses))
      .build()
      .unwrap();
    assert_eq!(network.input_tensor_size(), POSENET_INPUT_SIZE);
  }

  #[test]
  fn network_dispatches_to_its_post_processor() {
    let network = NetworkBuilder::new("/m.rpk", "pp_cls").input_size(224, 224).build().unwrap();
    let outputs = vec![Tensor::from_shape_vec(ndarray::IxDyn(&[3]), vec![0.2, 0.7, 0.1]).unwrap()];
    let result = network.post_process(&outputs).unwrap();
    assert_eq!(result.as_classifications().unwrap().class_id(), &[1, 0, 2]);
  }
}
