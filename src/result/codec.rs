// 该文件是 Yunjing （云镜） 项目的一部分。
// src/result/codec.rs - 网格数据压缩编码
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

use std::io::{Read, Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
  #[error("Base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("gzip 编解码失败: {0}")]
  Gzip(#[from] std::io::Error),
  #[error("数据长度 {actual} 与形状 {shape:?} 不符")]
  ShapeMismatch { shape: Vec<usize>, actual: usize },
}

/// gzip 压缩后再做 Base64 编码
pub fn compress_to_base64(bytes: &[u8]) -> Result<String, CodecError> {
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(bytes)?;
  let compressed = encoder.finish()?;
  Ok(STANDARD.encode(compressed))
}

pub fn decompress_from_base64(text: &str) -> Result<Vec<u8>, CodecError> {
  let compressed = STANDARD.decode(text)?;
  let mut decoder = GzDecoder::new(compressed.as_slice());
  let mut bytes = Vec::new();
  decoder.read_to_end(&mut bytes)?;
  Ok(bytes)
}

pub fn encode_u8_grid(grid: &Array2<u8>) -> Result<(String, [usize; 2]), CodecError> {
  let (h, w) = grid.dim();
  let bytes: Vec<u8> = grid.iter().copied().collect();
  Ok((compress_to_base64(&bytes)?, [h, w]))
}

pub fn decode_u8_grid(text: &str, shape: [usize; 2]) -> Result<Array2<u8>, CodecError> {
  let bytes = decompress_from_base64(text)?;
  let actual = bytes.len();
  Array2::from_shape_vec((shape[0], shape[1]), bytes).map_err(|_| CodecError::ShapeMismatch {
    shape: shape.to_vec(),
    actual,
  })
}

pub fn encode_f32_grid(grid: &Array2<f32>) -> Result<(String, [usize; 2]), CodecError> {
  let (h, w) = grid.dim();
  let bytes: Vec<u8> = grid.iter().flat_map(|v| v.to_le_bytes()).collect();
  Ok((compress_to_base64(&bytes)?, [h, w]))
}

pub fn decode_f32_grid(text: &str, shape: [usize; 2]) -> Result<Array2<f32>, CodecError> {
  let bytes = decompress_from_base64(text)?;
  if bytes.len() % 4 != 0 {
    return Err(CodecError::ShapeMismatch {
      shape: shape.to_vec(),
      actual: bytes.len(),
    });
  }
  let values: Vec<f32> = bytes
    .chunks_exact(4)
    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    .collect();
  let actual = values.len();
  Array2::from_shape_vec((shape[0], shape[1]), values).map_err(|_| CodecError::ShapeMismatch {
    shape: shape.to_vec(),
    actual,
  })
}
