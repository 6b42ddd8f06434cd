// 该文件是 Yunjing （云镜） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod result;
pub mod roi;
pub mod task;
pub mod tensor;

pub use self::frame::{Frame, ImageKind};
pub use self::result::ModelResult;
pub use self::roi::Roi;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 从 URL 查询参数中解析布尔开关
///
/// 只写键名（如 `?headless`）视为开启，`0`/`false`/`no`/`off` 视为关闭。
pub(crate) fn query_flag(url: &url::Url, key: &str) -> Option<bool> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| !matches!(v.as_ref(), "0" | "false" | "no" | "off"))
}

/// 从 URL 查询参数中解析任意可解析的值
pub(crate) fn query_value<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<T> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_helpers_parse_flags_and_values() {
    let url = url::Url::parse("aicam://sensor?headless&input_tensor=false&queue=7").unwrap();
    assert_eq!(query_flag(&url, "headless"), Some(true));
    assert_eq!(query_flag(&url, "input_tensor"), Some(false));
    assert_eq!(query_flag(&url, "missing"), None);
    assert_eq!(query_value::<usize>(&url, "queue"), Some(7));
    assert_eq!(query_value::<usize>(&url, "headless"), None);
  }
}
