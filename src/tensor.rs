// 该文件是 Yunjing （云镜） 项目的一部分。
// src/tensor.rs - 输出张量布局解析
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

//! # 输出张量布局
//!
//! 加速器每个周期给出一段扁平的 `f32` 缓冲区，以及一个固定长度的二进制
//! 侧信道结构，描述缓冲区里依次排布了几个张量、每个张量的维度。
//!
//! 侧信道结构（小端序）：
//!
//! ```text
//! network_name   [u8; 64]
//! num_tensors    u32
//! info[16] {
//!   tensor_data_num  u32
//!   num_dimensions   u32
//!   size             [u16; 16]
//! }
//! ```

use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use thiserror::Error;
use tracing::debug;

pub const NETWORK_NAME_LEN: usize = 64;
pub const MAX_NUM_TENSORS: usize = 16;
pub const MAX_NUM_DIMENSIONS: usize = 16;

const TENSOR_INFO_SIZE: usize = 4 + 4 + 2 * MAX_NUM_DIMENSIONS;

/// 侧信道结构的固定字节长度
pub const OUTPUT_TENSOR_INFO_SIZE: usize = NETWORK_NAME_LEN + 4 + TENSOR_INFO_SIZE * MAX_NUM_TENSORS;

/// 解码后的单个输出张量
pub type Tensor = ArrayD<f32>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("张量布局信息无效: {0}")]
  MalformedLayout(String),
  #[error("输出缓冲区过短: 需要 {required} 个元素, 实际 {actual} 个")]
  BufferTooShort { required: usize, actual: usize },
}

/// 解析后的输出张量布局
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensorInfo {
  pub network_name: String,
  pub shapes: Vec<Vec<usize>>,
}

impl OutputTensorInfo {
  pub fn parse(payload: &[u8]) -> Result<Self, TensorError> {
    if payload.len() != OUTPUT_TENSOR_INFO_SIZE {
      return Err(TensorError::MalformedLayout(format!(
        "长度 {} 与期望的 {} 字节不符",
        payload.len(),
        OUTPUT_TENSOR_INFO_SIZE
      )));
    }

    let name = &payload[..NETWORK_NAME_LEN];
    let name_end = name.iter().position(|&b| b == 0).unwrap_or(NETWORK_NAME_LEN);
    let network_name = String::from_utf8_lossy(&name[..name_end]).into_owned();

    let num_tensors = read_u32(payload, NETWORK_NAME_LEN) as usize;
    if num_tensors > MAX_NUM_TENSORS {
      return Err(TensorError::MalformedLayout(format!(
        "张量数量 {} 超过上限 {}",
        num_tensors, MAX_NUM_TENSORS
      )));
    }

    let mut shapes = Vec::with_capacity(num_tensors);
    for index in 0..num_tensors {
      let base = NETWORK_NAME_LEN + 4 + index * TENSOR_INFO_SIZE;
      let num_dimensions = read_u32(payload, base + 4) as usize;
      if num_dimensions > MAX_NUM_DIMENSIONS {
        return Err(TensorError::MalformedLayout(format!(
          "第 {} 个张量的维度数 {} 超过上限 {}",
          index, num_dimensions, MAX_NUM_DIMENSIONS
        )));
      }
      let shape = (0..num_dimensions)
        .map(|d| read_u16(payload, base + 8 + 2 * d) as usize)
        .collect();
      shapes.push(shape);
    }

    debug!("网络 {} 输出张量形状: {:?}", network_name, shapes);
    Ok(Self {
      network_name,
      shapes,
    })
  }

  pub fn num_tensors(&self) -> usize {
    self.shapes.len()
  }
}

fn read_u32(payload: &[u8], offset: usize) -> u32 {
  let mut bytes = [0u8; 4];
  bytes.copy_from_slice(&payload[offset..offset + 4]);
  u32::from_le_bytes(bytes)
}

fn read_u16(payload: &[u8], offset: usize) -> u16 {
  u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

/// 按形状顺序切分扁平缓冲区，每段以列主序（Fortran 序）还原为张量
pub fn split_output_tensor(buffer: &[f32], shapes: &[Vec<usize>]) -> Result<Vec<Tensor>, TensorError> {
  let required: usize = shapes.iter().map(|s| s.iter().product::<usize>()).sum();
  if required > buffer.len() {
    return Err(TensorError::BufferTooShort {
      required,
      actual: buffer.len(),
    });
  }

  let mut offset = 0;
  let mut outputs = Vec::with_capacity(shapes.len());
  for shape in shapes {
    let size: usize = shape.iter().product();
    let data = buffer[offset..offset + size].to_vec();
    let tensor = ArrayD::from_shape_vec(IxDyn(shape).f(), data)
      .map_err(|e| TensorError::MalformedLayout(format!("形状 {:?} 无法重排: {}", shape, e)))?;
    outputs.push(tensor);
    offset += size;
  }

  Ok(outputs)
}

/// 构造侧信道结构字节，供录制回放与测试使用
pub fn encode_output_tensor_info(network_name: &str, shapes: &[Vec<usize>]) -> Vec<u8> {
  let mut payload = vec![0u8; OUTPUT_TENSOR_INFO_SIZE];
  let name = network_name.as_bytes();
  let name_len = name.len().min(NETWORK_NAME_LEN - 1);
  payload[..name_len].copy_from_slice(&name[..name_len]);

  let count = shapes.len().min(MAX_NUM_TENSORS);
  payload[NETWORK_NAME_LEN..NETWORK_NAME_LEN + 4].copy_from_slice(&(count as u32).to_le_bytes());
  for (index, shape) in shapes.iter().take(count).enumerate() {
    let base = NETWORK_NAME_LEN + 4 + index * TENSOR_INFO_SIZE;
    let data_num: usize = shape.iter().product();
    let dims = shape.len().min(MAX_NUM_DIMENSIONS);
    payload[base..base + 4].copy_from_slice(&(data_num as u32).to_le_bytes());
    payload[base + 4..base + 8].copy_from_slice(&(dims as u32).to_le_bytes());
    for (d, &size) in shape.iter().take(dims).enumerate() {
      let at = base + 8 + 2 * d;
      payload[at..at + 2].copy_from_slice(&(size as u16).to_le_bytes());
    }
  }
  payload
}
