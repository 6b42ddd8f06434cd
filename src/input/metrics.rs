// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/metrics.rs - 帧率与检测率统计
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

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 滑动窗口长度
pub const RATE_WINDOW: usize = 30;

/// 以最近若干次间隔的倒数均值估计速率
#[derive(Debug, Clone)]
pub struct RateWindow {
  intervals: VecDeque<f64>,
  min_samples: usize,
  last: Instant,
  rate: f32,
}

impl RateWindow {
  /// 样本数达到 `min_samples` 之前速率保持为 0
  pub fn new(min_samples: usize) -> Self {
    Self {
      intervals: VecDeque::with_capacity(RATE_WINDOW),
      min_samples: min_samples.max(1),
      last: Instant::now(),
      rate: 0.0,
    }
  }

  /// 记录自上次调用以来经过的时间
  pub fn tick(&mut self) -> f32 {
    let now = Instant::now();
    let elapsed = now.duration_since(self.last);
    self.last = now;
    self.record(elapsed)
  }

  pub fn record(&mut self, interval: Duration) -> f32 {
    if self.intervals.len() == RATE_WINDOW {
      self.intervals.pop_front();
    }
    self.intervals.push_back(interval.as_secs_f64());

    let sum: f64 = self.intervals.iter().sum();
    if self.intervals.len() >= self.min_samples && sum > 0.0 {
      self.rate = (self.intervals.len() as f64 / sum) as f32;
    }
    self.rate
  }

  pub fn rate(&self) -> f32 {
    self.rate
  }

  /// 重新开始计时，不清空窗口
  pub fn restart(&mut self) {
    self.last = Instant::now();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rate_needs_minimum_samples() {
    let mut dps = RateWindow::new(2);
    assert_eq!(dps.record(Duration::from_millis(100)), 0.0);
    let rate = dps.record(Duration::from_millis(300));
    assert!((rate - 5.0).abs() < 1e-4);
  }

  #[test]
  fn window_keeps_only_recent_intervals() {
    let mut fps = RateWindow::new(1);
    for _ in 0..RATE_WINDOW {
      fps.record(Duration::from_secs(1));
    }
    for _ in 0..RATE_WINDOW {
      fps.record(Duration::from_millis(100));
    }
    assert!((fps.rate() - 10.0).abs() < 1e-3);
  }
}
