// 该文件是 Qianli （千里目） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qianli::annotate::{Annotator, load_system_font};
use qianli::detector::DetectionEngine;
use qianli::model::Yolov8Model;
use qianli::server::ObjectDetectionServer;
use qianli::staging::StagingArea;

fn main() -> Result<()> {
  // 日志只写到标准错误，标准输出留给协议通道
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("暂存根目录: {}", args.root.display());

  let model = Yolov8Model::new(&args.model, args.confidence, args.nms_threshold)
    .with_context(|| format!("无法加载模型: {}", args.model))?;
  let engine = DetectionEngine::new(Box::new(model));

  let annotator = match &args.font {
    Some(path) => Annotator::default()
      .with_font_path(path)
      .with_context(|| format!("无法加载字体: {}", path.display()))?,
    None => match load_system_font() {
      Some(font) => Annotator::default().with_font(font),
      None => {
        warn!("未找到可用字体，标注时将跳过文字图层");
        Annotator::default()
      }
    },
  };

  let server = ObjectDetectionServer::new(engine, annotator, StagingArea::new(&args.root))
    .context("无法准备暂存目录")?;

  server.run_stdio()?;

  Ok(())
}
