// 该文件是 Yunjing （云镜） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;

use crate::frame::Frame;
use crate::output::Render;
use crate::result::ModelResult;
use crate::{FromUrl, FromUrlWithScheme};

/// 每帧输出一行摘要，`log://?new_only` 只记录新的推理结果
#[derive(Debug, Default, Clone)]
pub struct LogOutput {
  new_only: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    Ok(LogOutput {
      new_only: url.query_pairs().any(|(k, _)| k == "new_only"),
    })
  }
}

pub(crate) fn summary(frame: &Frame, result: &ModelResult) -> String {
  format!(
    "{} {} x{}{} fps {:.1} dps {:.1}",
    frame.timestamp,
    result.kind(),
    result.len(),
    if frame.new_detection { "" } else { " (沿用)" },
    frame.fps,
    frame.dps
  )
}

impl Render for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &Frame, result: &ModelResult) -> Result<(), Self::Error> {
    if self.new_only && !frame.new_detection {
      return Ok(());
    }
    info!("{}", summary(frame, result));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::result::Detections;
  use crate::roi::Roi;

  #[test]
  fn summary_marks_stale_frames() {
    let result: ModelResult = Detections::new(vec![[0.0, 0.0, 1.0, 1.0]], vec![0.5], vec![3])
      .unwrap()
      .into();
    let mut frame = Frame::new(result.clone(), Roi::FULL);
    frame.timestamp = "t".to_string();
    assert_eq!(summary(&frame, &result), "t detections x1 (沿用) fps 0.0 dps 0.0");
    frame.new_detection = true;
    assert!(!summary(&frame, &result).contains("沿用"));
  }
}
