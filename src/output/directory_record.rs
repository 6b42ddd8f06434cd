// 该文件是 Yunjing （云镜） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::frame::Frame;
use crate::output::Render;
use crate::result::ModelResult;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按日期分目录，把每一帧写成 JSON 文件
///
/// `folder:///data/records?always`，不带 `always` 时只记录有结果的帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput::new(PathBuf::from(uri.path()), always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: PathBuf, always: bool) -> Self {
    DirectoryRecordOutput {
      directory,
      frame_counters: Arc::new(Mutex::new(0)),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    // 计数器只做自增，锁中毒时沿用旧值
    let mut counter = match self.frame_counters.lock() {
      Ok(counter) => counter,
      Err(poisoned) => poisoned.into_inner(),
    };
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &ModelResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path()?;
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(&mut writer, frame)?;
    writer.flush()?;
    debug!("帧已记录到 {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::result::{Classifications, Detections};
  use crate::roi::Roi;

  fn json_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
      for entry in std::fs::read_dir(current).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else if path.extension().is_some_and(|e| e == "json") {
          found.push(path);
        }
      }
    }
    found
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let empty: ModelResult = Detections::default().into();
    let frame = Frame::new(empty.clone(), Roi::FULL);

    let output = DirectoryRecordOutput::new(dir.path().to_path_buf(), false);
    output.render_result(&frame, &empty).unwrap();
    assert!(json_files(dir.path()).is_empty());

    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &empty).unwrap();
    assert_eq!(json_files(dir.path()).len(), 1);
  }

  #[test]
  fn written_frame_can_be_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let result: ModelResult = Classifications::new(vec![0.8], vec![2]).unwrap().into();
    let frame = Frame::new(result.clone(), Roi::FULL);

    let output = DirectoryRecordOutput::new(dir.path().to_path_buf(), false);
    output.render_result(&frame, &result).unwrap();

    let files = json_files(dir.path());
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("-0001.json"));
    let text = std::fs::read_to_string(&files[0]).unwrap();
    let restored: Frame = serde_json::from_str(&text).unwrap();
    assert_eq!(restored, frame);
  }
}
