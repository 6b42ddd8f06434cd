// 该文件是 Yunjing （云镜） 项目的一部分。
// src/task.rs - 帧消费任务
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

use std::{thread, time::Duration};
use tracing::{debug, info, warn};

use crate::{frame::Frame, output::Render};

pub trait Task<I, O>: Sized {
  type Error;
  /// 返回处理的帧数
  fn run_task(self, input: I, output: O) -> Result<usize, Self::Error>;
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 安装 Ctrl-C 处理，收到信号后结束循环
  pub fn with_interrupt(mut self, handle_interrupt: bool) -> Self {
    self.handle_interrupt = handle_interrupt;
    self
  }
}

impl<RE, I, O> Task<I, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Frame>,
  O: Render<Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, output: O) -> Result<usize, Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    if self.handle_interrupt {
      let installed = ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(());
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      });
      if let Err(e) = installed {
        warn!("无法设置中断处理: {}", e);
      }
    }

    let mut frame_index = 0;
    let mut now = std::time::Instant::now();
    for mut frame in input {
      frame_index += 1;
      debug!("处理第 {} 帧", frame_index);
      // 首次读取时完成 ROI 补偿
      let result_len = frame.detections().len();
      output.render_result(&frame, frame.detections_raw())?;
      let elapsed = now.elapsed();
      now = std::time::Instant::now();
      info!(
        "第 {} 帧: {} 个结果{}, fps {:.2}, dps {:.2}, 耗时 {:.2?}",
        frame_index,
        result_len,
        if frame.new_detection { "" } else { "（沿用）" },
        frame.fps,
        frame.dps,
        elapsed
      );
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(frame_index)
  }
}
