// 该文件是 Yunjing （云镜） 项目的一部分。
// tests/recording.rs - 录制与回放测试
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

use image::{Rgb, RgbImage};
use ndarray::Array2;
use url::Url;

use yunjing::input::recording::{load_recording, save_recording};
use yunjing::input::{InputWrapper, RecordingSource};
use yunjing::result::{Detections, Segments};
use yunjing::task::{ContinuousTask, Task};
use yunjing::{FromUrl, Frame, ImageKind, Roi};

fn sample_frames() -> Vec<Frame> {
  let roi = Roi::new(0.25, 0.0, 0.5, 1.0).unwrap();
  let detections = Detections::new(vec![[0.0, 0.0, 0.5, 0.5]], vec![0.7], vec![1]).unwrap();
  let mut image = RgbImage::new(3, 2);
  image.put_pixel(1, 1, Rgb([10, 20, 30]));
  let mut first = Frame::new(detections.into(), roi).with_image(Some(image), ImageKind::SensorPreview);
  first.new_detection = true;
  first.dps = 12.5;

  let mut mask = Array2::<u8>::zeros((2, 2));
  mask[[0, 1]] = 3;
  let second = Frame::new(Segments::new(mask).into(), Roi::FULL);
  vec![first, second]
}

#[test]
fn recording_survives_disk_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("session").join("frames.json");
  let frames = sample_frames();

  save_recording(&path, &frames).unwrap();
  let loaded = load_recording(&path).unwrap();
  assert_eq!(loaded, frames);
  assert_eq!(loaded[0].image().unwrap().get_pixel(1, 1), &Rgb([10, 20, 30]));
}

#[test]
fn replay_url_repeats_the_sequence() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("frames.json");
  save_recording(&path, &sample_frames()).unwrap();

  let url = Url::parse(&format!("replay://{}?repeat=3", path.display())).unwrap();
  let source = RecordingSource::from_url(&url).unwrap();
  assert_eq!(source.len(), 2);
  let kinds: Vec<_> = source.map(|f| f.detections_raw().kind()).collect();
  assert_eq!(kinds.len(), 6);
  assert_eq!(kinds[0], kinds[2]);
  assert_ne!(kinds[0], kinds[1]);
}

#[test]
fn replayed_frames_compensate_once() {
  let mut source = RecordingSource::from_frames(sample_frames()).repeat(2);
  let mut first = source.next().unwrap();
  let bbox = first.detections().as_detections().unwrap().bbox()[0];
  assert_eq!(bbox, [0.25, 0.0, 0.5, 0.5]);

  // 下一轮拿到的是未补偿的副本
  let mut again = source.nth(1).unwrap();
  assert!(!again.detections_raw().is_roi_compensated());
  assert_eq!(again.detections().as_detections().unwrap().bbox()[0], bbox);
}

#[test]
fn input_wrapper_feeds_a_task() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("frames.json");
  save_recording(&path, &sample_frames()).unwrap();

  let input = InputWrapper::from_url(&Url::parse(&format!("replay://{}", path.display())).unwrap()).unwrap();
  let output = yunjing::output::OutputWrapper::from_url(&Url::parse("log://").unwrap()).unwrap();
  let count = ContinuousTask::default().run_task(input, output).unwrap();
  assert_eq!(count, 2);
}

#[test]
fn unknown_schemes_are_rejected() {
  assert!(InputWrapper::from_url(&Url::parse("rtsp://camera/stream").unwrap()).is_err());
  assert!(yunjing::output::OutputWrapper::from_url(&Url::parse("rtsp://camera/out").unwrap()).is_err());
  let missing = Url::parse("replay:///does/not/exist.json").unwrap();
  assert!(RecordingSource::from_url(&missing).is_err());
}
