// 该文件是 Yunjing （云镜） 项目的一部分。
// src/model/posenet.rs - PoseNet 原生解码器接口
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

//! PoseNet 的姿态解码由外部原生库完成，调用方持有全部缓冲区。

use super::postprocess::PostProcessError;

/// 单帧最多解码的姿态数
pub const MAX_POSES: usize = 10;
/// 每个姿态的关键点数
pub const NUM_KEYPOINTS: usize = 17;

/// PoseNet 默认输入尺寸 (w, h)
pub const POSENET_INPUT_SIZE: (u32, u32) = (481, 353);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PoseKeypoints {
  /// 交错的 `[y, x]` 像素坐标
  pub keypoints: [f32; NUM_KEYPOINTS * 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PoseKeypointScores {
  pub scores: [f32; NUM_KEYPOINTS],
}

/// 原生解码器填充的固定容量输出
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PosenetOutput {
  pub n_detections: i32,
  pub pose_scores: [f32; MAX_POSES],
  pub pose_keypoints: [PoseKeypoints; MAX_POSES],
  pub pose_keypoint_scores: [PoseKeypointScores; MAX_POSES],
}

impl Default for PosenetOutput {
  fn default() -> Self {
    Self {
      n_detections: 0,
      pose_scores: [0.0; MAX_POSES],
      pose_keypoints: [PoseKeypoints {
        keypoints: [0.0; NUM_KEYPOINTS * 2],
      }; MAX_POSES],
      pose_keypoint_scores: [PoseKeypointScores {
        scores: [0.0; NUM_KEYPOINTS],
      }; MAX_POSES],
    }
  }
}

impl PosenetOutput {
  /// 检查解码器报告的姿态数
  pub fn detection_count(&self) -> Result<usize, PostProcessError> {
    match usize::try_from(self.n_detections) {
      Ok(n) if n <= MAX_POSES => Ok(n),
      _ => Err(PostProcessError::NativeDecodeFailure(format!(
        "姿态数 {} 不在 0..={} 范围内",
        self.n_detections, MAX_POSES
      ))),
    }
  }
}

/// 姿态解码器
///
/// 三个输入依次为 PoseNet 的热力图、短程偏移与中程偏移，按内存顺序传入。
pub trait PoseDecoder: Send + Sync {
  fn decode(
    &self,
    heatmaps: &[f32],
    short_offsets: &[f32],
    mid_offsets: &[f32],
    output: &mut PosenetOutput,
  ) -> Result<(), PostProcessError>;
}

#[cfg(feature = "posenet_native")]
mod native {
  use std::ffi::OsStr;

  use libloading::Library;
  use tracing::info;

  use super::{PoseDecoder, PosenetOutput};
  use crate::model::postprocess::PostProcessError;

  type DecodePoses = unsafe extern "C" fn(*const f32, *const f32, *const f32, *mut PosenetOutput);

  /// 通过动态库中的 `decode_poses` 解码
  pub struct NativePoseDecoder {
    decode_poses: DecodePoses,
    // 函数指针在库卸载后失效，必须与库同生命周期
    _library: Library,
  }

  impl NativePoseDecoder {
    pub fn load<P: AsRef<OsStr>>(path: P) -> Result<Self, libloading::Error> {
      let path = path.as_ref();
      info!("加载姿态解码库: {}", path.to_string_lossy());
      // SAFETY: 库的初始化例程与 `decode_poses` 的签名由调用方保证
      unsafe {
        let library = Library::new(path)?;
        let decode_poses = *library.get::<DecodePoses>(b"decode_poses\0")?;
        Ok(Self {
          decode_poses,
          _library: library,
        })
      }
    }
  }

  impl PoseDecoder for NativePoseDecoder {
    fn decode(
      &self,
      heatmaps: &[f32],
      short_offsets: &[f32],
      mid_offsets: &[f32],
      output: &mut PosenetOutput,
    ) -> Result<(), PostProcessError> {
      if heatmaps.is_empty() || short_offsets.is_empty() || mid_offsets.is_empty() {
        return Err(PostProcessError::NativeDecodeFailure("输入张量为空".to_string()));
      }
      // SAFETY: 所有缓冲区在调用期间保持有效，输出结构为 repr(C)
      unsafe {
        (self.decode_poses)(
          heatmaps.as_ptr(),
          short_offsets.as_ptr(),
          mid_offsets.as_ptr(),
          output as *mut PosenetOutput,
        );
      }
      output.detection_count().map(|_| ())
    }
  }
}

#[cfg(feature = "posenet_native")]
pub use self::native::NativePoseDecoder;
