// 该文件是 Qianli （千里目） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Mutex;

use image::RgbImage;
use ndarray::{Array4, ArrayViewD};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{InferenceBackend, InferenceError, RawDetection};

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("Failed to load model: {0}")]
  Load(#[from] ort::Error),
}

/// YOLOv8 目标检测后端
pub struct Yolov8Model {
  /// ONNX Runtime 会话（run 需要可变引用，用锁包一层）
  session: Mutex<Session>,
  input_name: String,
  /// 模型输入宽度
  input_width: u32,
  /// 模型输入高度
  input_height: u32,
  /// 后端内部置信度阈值
  confidence_threshold: f32,
  /// NMS IOU 阈值
  nms_threshold: f32,
}

impl Yolov8Model {
  /// 从 ONNX 模型文件创建后端
  pub fn new(
    model_path: &str,
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Self, Yolov8Error> {
    let session = Session::builder()?
      .with_execution_providers([CPUExecutionProvider::default().build()])?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .commit_from_file(model_path)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .unwrap_or_else(|| "images".to_string());

    info!("模型加载完成: {}", model_path);

    Ok(Self {
      session: Mutex::new(session),
      input_name,
      // YOLOv8 标准输入尺寸
      input_width: 640,
      input_height: 640,
      confidence_threshold,
      nms_threshold,
    })
  }

  /// 预处理：缩放到模型输入尺寸，归一化为 NCHW f32
  fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
      image,
      self.input_width,
      self.input_height,
      image::imageops::FilterType::Triangle,
    );

    let mut input = Array4::<f32>::zeros((
      1,
      3,
      self.input_height as usize,
      self.input_width as usize,
    ));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..3 {
        input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
      }
    }
    input
  }

  /// 后处理：解码 [1, 4 + 类别数, 锚点数] 输出，
  /// 坐标缩放回原图尺寸并保证 x_max >= x_min、y_max >= y_min。
  fn postprocess(
    &self,
    output: &ArrayViewD<'_, f32>,
    original_width: f32,
    original_height: f32,
  ) -> Vec<RawDetection> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] <= 4 {
      debug!("无法识别的输出形状: {:?}", shape);
      return Vec::new();
    }

    let num_classes = shape[1] - 4;
    let num_anchors = shape[2];

    let scale_x = original_width / self.input_width as f32;
    let scale_y = original_height / self.input_height as f32;

    let mut detections = Vec::new();

    for anchor in 0..num_anchors {
      // 找到最高类别分数
      let mut max_class_score = 0.0f32;
      let mut max_class_id = 0usize;

      for class_id in 0..num_classes {
        let score = output[[0, 4 + class_id, anchor]];
        if score > max_class_score {
          max_class_score = score;
          max_class_id = class_id;
        }
      }

      if max_class_score < self.confidence_threshold {
        continue;
      }

      // 中心点加宽高 → 角点坐标
      let cx = output[[0, 0, anchor]];
      let cy = output[[0, 1, anchor]];
      let w = output[[0, 2, anchor]];
      let h = output[[0, 3, anchor]];

      // 缩放到原始图像尺寸并裁剪到图像范围内
      let x_min = ((cx - w / 2.0) * scale_x).clamp(0.0, original_width);
      let y_min = ((cy - h / 2.0) * scale_y).clamp(0.0, original_height);
      let x_max = ((cx + w / 2.0) * scale_x).clamp(x_min, original_width);
      let y_max = ((cy + h / 2.0) * scale_y).clamp(y_min, original_height);

      detections.push(RawDetection {
        bbox: [x_min, y_min, x_max, y_max],
        class_id: max_class_id,
        score: max_class_score,
      });
    }

    self.nms(detections)
  }

  /// 非极大值抑制（逐类别）
  fn nms(&self, mut detections: Vec<RawDetection>) -> Vec<RawDetection> {
    // 按置信度降序排序
    detections.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut result: Vec<RawDetection> = Vec::new();

    while !detections.is_empty() {
      let best = detections.remove(0);

      detections.retain(|det| {
        if det.class_id != best.class_id {
          return true;
        }
        iou(&best.bbox, &det.bbox) < self.nms_threshold
      });

      result.push(best);
    }

    result
  }
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

impl InferenceBackend for Yolov8Model {
  fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
    let original_width = image.width() as f32;
    let original_height = image.height() as f32;

    let input = self.preprocess(image);
    let input_value =
      Value::from_array(input).map_err(|err| InferenceError::Backend(err.to_string()))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| InferenceError::Backend("model session lock poisoned".to_string()))?;

    let outputs = session
      .run(ort::inputs![&self.input_name => input_value])
      .map_err(|err| InferenceError::Backend(err.to_string()))?;

    let output = outputs[0]
      .try_extract_array::<f32>()
      .map_err(|err| InferenceError::Backend(err.to_string()))?;

    let detections = self.postprocess(&output.view(), original_width, original_height);
    debug!("推理完成: {} 个候选框", detections.len());

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::iou;

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let b = [20.0, 20.0, 30.0, 30.0];
    assert_eq!(iou(&a, &b), 0.0);
  }
}
