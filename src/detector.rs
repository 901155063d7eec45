// 该文件是 Qianli （千里目） 项目的一部分。
// src/detector.rs - 检测引擎与几何规范化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{COCO_CLASSES, InferenceBackend, InferenceError, RawDetection};

/// 边界框（整数像素坐标，原点在左上角）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

/// 单个检测结果
#[derive(Clone, Debug, Serialize)]
pub struct Detection {
  pub label: String,
  pub bbox: BoundingBox,
  pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum DetectionError {
  #[error("Image file not found: {0}")]
  NotFound(String),
  #[error("Invalid image format: {0}")]
  InvalidFormat(String),
  #[error(transparent)]
  Inference(#[from] InferenceError),
}

/// 把模型原始记录转换为规范检测记录。
///
/// 取整策略：左上角坐标与宽高分别向零截断（不是四舍五入），
/// 相同原始输入必须得到逐字节一致的结果。宽高在退化输入下钳到 0。
pub fn normalize(raw: &RawDetection, labels: &[&str]) -> Detection {
  let [x1, y1, x2, y2] = raw.bbox;

  let x = x1 as i32;
  let y = y1 as i32;
  let width = ((x2 - x1) as i32).max(0);
  let height = ((y2 - y1) as i32).max(0);

  let label = labels.get(raw.class_id).unwrap_or(&"unknown").to_string();

  Detection {
    label,
    bbox: BoundingBox {
      x,
      y,
      width,
      height,
    },
    confidence: raw.score,
  }
}

/// 检测引擎：持有启动时加载的推理后端，按原始顺序产出规范检测序列
pub struct DetectionEngine {
  backend: Box<dyn InferenceBackend>,
  labels: &'static [&'static str],
}

impl DetectionEngine {
  pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
    Self {
      backend,
      labels: &COCO_CLASSES,
    }
  }

  pub fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
    self.labels = labels;
    self
  }

  /// 对单张图像运行目标检测。
  ///
  /// 推理之前依次确认路径存在、图像可解码，
  /// 保证推理失败不会与坏输入混淆。空结果是合法输出而非错误。
  pub fn detect(&self, image_path: &str) -> Result<Vec<Detection>, DetectionError> {
    let path = Path::new(image_path);
    if !path.exists() {
      return Err(DetectionError::NotFound(image_path.to_string()));
    }

    let image = image::open(path)
      .map_err(|_| DetectionError::InvalidFormat(image_path.to_string()))?
      .into_rgb8();

    let raw = self.backend.infer(&image)?;
    debug!("检测到 {} 个候选框", raw.len());

    Ok(raw.iter().map(|det| normalize(det, self.labels)).collect())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::rc::Rc;

  use image::RgbImage;

  use super::*;

  /// 返回脚本化结果的桩后端
  struct Scripted {
    raw: Vec<RawDetection>,
    calls: Rc<Cell<usize>>,
  }

  impl Scripted {
    fn new(raw: Vec<RawDetection>) -> (Self, Rc<Cell<usize>>) {
      let calls = Rc::new(Cell::new(0));
      (
        Self {
          raw,
          calls: Rc::clone(&calls),
        },
        calls,
      )
    }
  }

  impl InferenceBackend for Scripted {
    fn infer(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.raw.clone())
    }
  }

  fn raw(bbox: [f32; 4], class_id: usize, score: f32) -> RawDetection {
    RawDetection {
      bbox,
      class_id,
      score,
    }
  }

  fn write_sample_image(dir: &std::path::Path) -> String {
    let path = dir.join("sample.png");
    RgbImage::new(64, 48)
      .save(&path)
      .expect("写入测试图像失败");
    path.to_string_lossy().into_owned()
  }

  #[test]
  fn normalize_truncates_instead_of_rounding() {
    let det = normalize(&raw([10.4, 20.9, 50.1, 80.0], 0, 0.87), &COCO_CLASSES);

    assert_eq!(det.label, "person");
    assert_eq!(
      det.bbox,
      BoundingBox {
        x: 10,
        y: 20,
        width: 39,
        height: 59,
      }
    );
    assert_eq!(det.confidence, 0.87);
  }

  #[test]
  fn normalize_clamps_degenerate_spans_to_zero() {
    let det = normalize(&raw([5.5, 7.25, 5.5, 7.25], 2, 0.3), &COCO_CLASSES);

    assert_eq!(det.bbox.width, 0);
    assert_eq!(det.bbox.height, 0);
  }

  #[test]
  fn normalize_maps_out_of_range_class_to_unknown() {
    let det = normalize(&raw([0.0, 0.0, 1.0, 1.0], 999, 0.5), &COCO_CLASSES);

    assert_eq!(det.label, "unknown");
  }

  #[test]
  fn detect_fails_on_missing_file_before_inference() {
    let (backend, calls) = Scripted::new(vec![]);
    let engine = DetectionEngine::new(Box::new(backend));

    let err = engine.detect("no/such/image.png").unwrap_err();
    assert!(matches!(err, DetectionError::NotFound(_)));
    assert!(err.to_string().contains("no/such/image.png"));
    assert_eq!(calls.get(), 0);
  }

  #[test]
  fn detect_fails_on_undecodable_file_before_inference() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"definitely not a jpeg").expect("写入失败");

    let (backend, calls) = Scripted::new(vec![]);
    let engine = DetectionEngine::new(Box::new(backend));

    let err = engine.detect(&path.to_string_lossy()).unwrap_err();
    assert!(matches!(err, DetectionError::InvalidFormat(_)));
    assert_eq!(calls.get(), 0);
  }

  #[test]
  fn detect_preserves_backend_order_one_to_one() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let image_path = write_sample_image(dir.path());

    let (backend, calls) = Scripted::new(vec![
      raw([1.0, 2.0, 11.0, 22.0], 16, 0.4),
      raw([5.0, 5.0, 25.0, 35.0], 0, 0.9),
      raw([0.0, 0.0, 8.0, 8.0], 2, 0.7),
    ]);
    let engine = DetectionEngine::new(Box::new(backend));

    let detections = engine.detect(&image_path).expect("检测失败");

    assert_eq!(calls.get(), 1);
    assert_eq!(detections.len(), 3);
    // 保持后端返回顺序，不按置信度或位置排序
    assert_eq!(detections[0].label, "dog");
    assert_eq!(detections[1].label, "person");
    assert_eq!(detections[2].label, "car");

    for det in &detections {
      assert!(det.confidence >= 0.0 && det.confidence <= 1.0);
      assert!(det.bbox.width >= 0);
      assert!(det.bbox.height >= 0);
    }
  }

  #[test]
  fn custom_label_table_overrides_default() {
    static LABELS: [&str; 2] = ["widget", "gadget"];

    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let image_path = write_sample_image(dir.path());

    let (backend, _) = Scripted::new(vec![
      raw([0.0, 0.0, 5.0, 5.0], 1, 0.6),
      raw([1.0, 1.0, 6.0, 6.0], 7, 0.6),
    ]);
    let engine = DetectionEngine::new(Box::new(backend)).with_labels(&LABELS);

    let detections = engine.detect(&image_path).expect("检测失败");
    assert_eq!(detections[0].label, "gadget");
    // 超出自定义标签表的索引同样映射为 unknown
    assert_eq!(detections[1].label, "unknown");
  }

  #[test]
  fn detect_returns_empty_sequence_when_nothing_found() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let image_path = write_sample_image(dir.path());

    let (backend, _) = Scripted::new(vec![]);
    let engine = DetectionEngine::new(Box::new(backend));

    let detections = engine.detect(&image_path).expect("检测失败");
    assert!(detections.is_empty());
  }
}
