// 该文件是 Qianli （千里目） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Qianli 服务器参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// YOLOv8 ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: String,

  /// 暂存根目录（其下创建 input/ 与 output/）
  #[arg(long, default_value = "static", value_name = "DIR")]
  pub root: PathBuf,

  /// 标签文字字体文件路径（缺省时尝试常见系统字体）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 模型内部置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,
}
