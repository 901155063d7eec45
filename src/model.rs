// 该文件是 Qianli （千里目） 项目的一部分。
// src/model.rs - 推理后端接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8Error, Yolov8Model};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 模型原始检测记录
#[derive(Clone, Debug)]
pub struct RawDetection {
  /// 边界框角点坐标 [x_min, y_min, x_max, y_max]（原图像素，允许小数）。
  /// 后端保证 x_max >= x_min 且 y_max >= y_min。
  pub bbox: [f32; 4],
  /// 类别索引
  pub class_id: usize,
  /// 置信度
  pub score: f32,
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("Inference failed: {0}")]
  Backend(String),
}

/// 推理后端。模型在启动时加载一次，之后被所有调用只读共享；
/// 测试可以注入返回脚本化结果的桩实现。
pub trait InferenceBackend {
  fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError>;
}
