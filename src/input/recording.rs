// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/recording.rs - 录制文件回放
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

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme, query_value};

#[derive(Error, Debug)]
pub enum RecordingError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("录制文件格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把帧序列写成 JSON 数组
pub fn save_recording<P: AsRef<Path>>(path: P, frames: &[Frame]) -> Result<(), RecordingError> {
  let path = path.as_ref();
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() && !parent.exists() {
      std::fs::create_dir_all(parent)?;
    }
  }
  let mut writer = BufWriter::new(File::create(path)?);
  serde_json::to_writer(&mut writer, frames)?;
  writer.flush()?;
  info!("已写入 {} 帧到 {}", frames.len(), path.display());
  Ok(())
}

pub fn load_recording<P: AsRef<Path>>(path: P) -> Result<Vec<Frame>, RecordingError> {
  let path = path.as_ref();
  let reader = BufReader::new(File::open(path)?);
  let frames: Vec<Frame> = serde_json::from_reader(reader)?;
  info!("从 {} 读取 {} 帧", path.display(), frames.len());
  Ok(frames)
}

/// 回放录制文件
///
/// `replay:///path/to/recording.json?repeat=3`
pub struct RecordingSource {
  path: PathBuf,
  frames: Vec<Frame>,
  repeat: usize,
  round: usize,
  cursor: usize,
}

impl FromUrlWithScheme for RecordingSource {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for RecordingSource {
  type Error = RecordingError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordingError::SchemeMismatch);
    }
    let path = PathBuf::from(url.path());
    let repeat = query_value(url, "repeat").unwrap_or(1);
    let frames = load_recording(&path)?;
    Ok(Self::from_frames(frames).with_path(path).repeat(repeat))
  }
}

impl RecordingSource {
  pub fn from_frames(frames: Vec<Frame>) -> Self {
    Self {
      path: PathBuf::new(),
      frames,
      repeat: 1,
      round: 0,
      cursor: 0,
    }
  }

  fn with_path(mut self, path: PathBuf) -> Self {
    self.path = path;
    self
  }

  /// 整段序列重复的次数
  pub fn repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl Iterator for RecordingSource {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.frames.is_empty() || self.round >= self.repeat {
      return None;
    }
    // 克隆出去，消费端对帧的修改不会影响下一轮
    let frame = self.frames[self.cursor].clone();
    self.cursor += 1;
    if self.cursor == self.frames.len() {
      self.cursor = 0;
      self.round += 1;
      debug!("{} 第 {} 轮回放结束", self.path.display(), self.round);
    }
    Some(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::result::Classifications;
  use crate::roi::Roi;

  fn frames() -> Vec<Frame> {
    (0..3)
      .map(|i| {
        let result = Classifications::new(vec![0.5], vec![i]).unwrap();
        Frame::new(result.into(), Roi::FULL)
      })
      .collect()
  }

  #[test]
  fn repeats_whole_sequence() {
    let source = RecordingSource::from_frames(frames()).repeat(2);
    let ids: Vec<i32> = source
      .map(|f| f.detections_raw().as_classifications().unwrap().class_id()[0])
      .collect();
    assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);
  }

  #[test]
  fn zero_repeat_is_empty() {
    assert_eq!(RecordingSource::from_frames(frames()).repeat(0).count(), 0);
  }
}
