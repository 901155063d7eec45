// 该文件是 Qianli （千里目） 项目的一部分。
// src/annotate.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use chrono::Local;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::detector::{Detection, DetectionEngine, DetectionError};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;

/// 固定调色板：第 i 个检测取 `PALETTE[i % 10]`，
/// 超过 10 个对象后循环复用。顺序与取值固定，保证输出可复现。
pub const PALETTE: [[u8; 3]; 10] = [
  [255, 0, 0],     // 红
  [0, 255, 0],     // 绿
  [0, 0, 255],     // 蓝
  [255, 255, 0],   // 黄
  [0, 255, 255],   // 青
  [255, 0, 255],   // 品红
  [255, 165, 0],   // 橙
  [128, 0, 128],   // 紫
  [165, 42, 42],   // 棕
  [255, 192, 203], // 粉
];

/// 常见系统字体路径，按顺序尝试
const SYSTEM_FONT_PATHS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// 标注结果
#[derive(Clone, Debug, Serialize)]
pub struct VisualizationResult {
  /// 通过置信度过滤的检测（保持原始顺序）
  pub detections: Vec<Detection>,
  pub output_path: String,
  pub total_objects: usize,
  pub confidence_threshold: f32,
}

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error(transparent)]
  Detection(#[from] DetectionError),
  #[error("Invalid image format: {0}")]
  InvalidFormat(String),
  #[error("Failed to load font: {0}")]
  Font(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to save annotated image: {0}")]
  Save(#[from] image::ImageError),
}

/// 输出文件名: `{输入文件主干}_detected_{YYYYMMDD_HHMMSS}.jpg`。
///
/// 时间戳精确到秒：同一秒内对同一主干的两次调用会得到同名文件，
/// 后一次静默覆盖前一次，与上游行为保持一致。
pub fn output_file_name(image_path: &str) -> String {
  let stem = Path::new(image_path)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or("image");
  format!(
    "{}_detected_{}.jpg",
    stem,
    Local::now().format("%Y%m%d_%H%M%S")
  )
}

/// 尝试加载常见系统字体
pub fn load_system_font() -> Option<FontVec> {
  for path in SYSTEM_FONT_PATHS {
    if let Ok(data) = fs::read(path)
      && let Ok(font) = FontVec::try_from_vec(data)
    {
      return Some(font);
    }
  }
  None
}

/// 标注器：过滤、着色并把检测框与标签画到图像副本上
pub struct Annotator {
  /// 标签文字字体；缺省时只画框与标签底色，不画文字
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Annotator {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Annotator {
  /// 从字体文件加载标签文字字体
  pub fn with_font_path(self, font_path: &Path) -> Result<Self, AnnotateError> {
    let data = fs::read(font_path)?;
    let font = FontVec::try_from_vec(data)
      .map_err(|_| AnnotateError::Font(font_path.display().to_string()))?;
    Ok(self.with_font(font))
  }

  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  /// 检测并把保留的结果画到图像副本上，保存到 `output_dir`（不存在则创建）。
  ///
  /// 只保留 `confidence >= confidence_threshold` 的检测，边界值通过。
  pub fn annotate(
    &self,
    engine: &DetectionEngine,
    image_path: &str,
    output_dir: &Path,
    confidence_threshold: f32,
  ) -> Result<VisualizationResult, AnnotateError> {
    let detections = engine.detect(image_path)?;
    let kept: Vec<Detection> = detections
      .into_iter()
      .filter(|det| det.confidence >= confidence_threshold)
      .collect();

    // annotate 可能收到引擎没有验证过的路径（例如暂存副本），重新确认可解码
    let mut image = image::open(image_path)
      .map_err(|_| AnnotateError::InvalidFormat(image_path.to_string()))?
      .into_rgb8();

    for (index, detection) in kept.iter().enumerate() {
      let color = PALETTE[index % PALETTE.len()];
      self.draw_detection(&mut image, detection, color);
    }

    fs::create_dir_all(output_dir)?;
    let output_path = output_dir.join(output_file_name(image_path));
    image.save(&output_path)?;
    info!("标注图像已保存: {}", output_path.display());

    Ok(VisualizationResult {
      total_objects: kept.len(),
      detections: kept,
      output_path: output_path.to_string_lossy().into_owned(),
      confidence_threshold,
    })
  }

  /// 画一个检测：1 像素宽边框，框上方为标签底色加白色文字
  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection, color: [u8; 3]) {
    let bbox = &detection.bbox;

    if bbox.width > 0 && bbox.height > 0 {
      let rect = Rect::at(bbox.x, bbox.y).of_size(bbox.width as u32, bbox.height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    let label = format!("{} {:.2}", detection.label, detection.confidence);

    // 估算文本大小（粗略估计）
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景位于边框上方，钳到图像范围内
    let label_x = bbox.x.max(0);
    let label_y = (bbox.y - text_height).max(0);

    let max_width = (image.width() as i32 - label_x).max(0);
    let label_width = text_width.min(max_width);

    if label_width > 0 && label_y < image.height() as i32 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, text_height as u32);
      draw_filled_rect_mut(image, rect, Rgb(color));

      if let Some(font) = &self.font {
        draw_text_mut(
          image,
          Rgb([255u8, 255u8, 255u8]),
          label_x,
          label_y + self.label_text_vertical_padding,
          PxScale::from(self.font_size),
          font,
          &label,
        );
      }
    }
  }
}
