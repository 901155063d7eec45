// 该文件是 Qianli （千里目） 项目的一部分。
// src/server.rs - MCP 工具服务器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::{BufRead, Write};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::annotate::{AnnotateError, Annotator, VisualizationResult};
use crate::detector::{DetectionEngine, DetectionError};
use crate::staging::{StagedImage, StagingArea, StagingError};

pub const SERVER_NAME: &str = "object-detection";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// 缺省置信度阈值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug)]
pub enum CallError {
  #[error("Unknown tool: {0}")]
  UnknownTool(String),
  #[error("{0} is required")]
  MissingArgument(&'static str),
  #[error(transparent)]
  Detection(#[from] DetectionError),
  #[error(transparent)]
  Annotate(#[from] AnnotateError),
  #[error(transparent)]
  Staging(#[from] StagingError),
}

/// 工具目录：名称、说明与输入参数的 JSON Schema
pub fn tool_catalog() -> Vec<Value> {
  vec![
    json!({
      "name": "detect_objects",
      "description": "Detect objects in an image and return bounding boxes with labels",
      "inputSchema": {
        "type": "object",
        "properties": {
          "image_path": {
            "type": "string",
            "description": "Path to the image file"
          }
        },
        "required": ["image_path"]
      }
    }),
    json!({
      "name": "detect_and_visualize",
      "description": "Detect objects in an image and save an annotated copy with bounding boxes drawn",
      "inputSchema": {
        "type": "object",
        "properties": {
          "image_path": {
            "type": "string",
            "description": "Path to the image file"
          },
          "confidence_threshold": {
            "type": "number",
            "description": "Minimum confidence for a detection to be drawn",
            "default": DEFAULT_CONFIDENCE_THRESHOLD
          }
        },
        "required": ["image_path"]
      }
    }),
  ]
}

/// MCP 目标检测服务器。
///
/// 每次工具调用都是独立的请求/应答，调用之间不保留状态；
/// 唯一的进程级状态是构造时注入的推理后端和两个暂存目录。
pub struct ObjectDetectionServer {
  engine: DetectionEngine,
  annotator: Annotator,
  staging: StagingArea,
}

impl ObjectDetectionServer {
  /// 创建服务器并准备暂存目录
  pub fn new(
    engine: DetectionEngine,
    annotator: Annotator,
    staging: StagingArea,
  ) -> Result<Self, StagingError> {
    staging.ensure()?;
    Ok(Self {
      engine,
      annotator,
      staging,
    })
  }

  pub fn staging(&self) -> &StagingArea {
    &self.staging
  }

  /// 执行一次工具调用。
  ///
  /// 任何一层抛出的错误都在这里折叠成 `Error: <消息>` 文本，
  /// 每次调用恰好产生一条格式良好的应答，绝不向传输层抛异常。
  pub fn dispatch(&self, name: &str, arguments: &Value) -> String {
    match self.run_tool(name, arguments) {
      Ok(text) => text,
      Err(err) => {
        warn!("工具调用失败: {}: {}", name, err);
        format!("Error: {}", err)
      }
    }
  }

  fn run_tool(&self, name: &str, arguments: &Value) -> Result<String, CallError> {
    match name {
      "detect_objects" => self.run_detect(arguments),
      "detect_and_visualize" => self.run_visualize(arguments),
      _ => Err(CallError::UnknownTool(name.to_string())),
    }
  }

  /// detect_objects: 结构化检测列表，不做渲染
  fn run_detect(&self, arguments: &Value) -> Result<String, CallError> {
    let image_path = required_str(arguments, "image_path")?;
    let detections = self.engine.detect(image_path)?;
    info!("detect_objects: {} 个对象", detections.len());

    Ok(json!({ "detections": detections }).to_string())
  }

  /// detect_and_visualize: 先暂存输入副本，再在副本上标注
  fn run_visualize(&self, arguments: &Value) -> Result<String, CallError> {
    let image_path = required_str(arguments, "image_path")?;
    let confidence_threshold = arguments
      .get("confidence_threshold")
      .and_then(Value::as_f64)
      .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD) as f32;

    let staged = self.staging.stage(image_path)?;
    let result = self.annotate_staged(&staged, confidence_threshold)?;
    info!(
      "detect_and_visualize: {} 个对象 -> {}",
      result.total_objects, result.output_path
    );

    Ok(format_visualization(&result))
  }

  fn annotate_staged(
    &self,
    staged: &StagedImage,
    confidence_threshold: f32,
  ) -> Result<VisualizationResult, CallError> {
    let path = staged.path().to_string_lossy();
    let result = self.annotator.annotate(
      &self.engine,
      &path,
      self.staging.output_dir(),
      confidence_threshold,
    )?;
    Ok(result)
  }

  /// 处理一条 JSON-RPC 请求；通知（无 id）不产生应答。
  pub fn handle_request(&self, request: &Value) -> Option<Value> {
    let id = match request.get("id") {
      Some(id) if !id.is_null() => id.clone(),
      _ => return None,
    };
    let method = request
      .get("method")
      .and_then(Value::as_str)
      .unwrap_or_default();

    let result = match method {
      "initialize" => json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
      }),
      "tools/list" => json!({ "tools": tool_catalog() }),
      "tools/call" => {
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
        let name = params
          .get("name")
          .and_then(Value::as_str)
          .unwrap_or_default();
        let arguments = params
          .get("arguments")
          .cloned()
          .unwrap_or_else(|| json!({}));

        let text = self.dispatch(name, &arguments);
        json!({ "content": [ { "type": "text", "text": text } ] })
      }
      "ping" => json!({}),
      _ => {
        return Some(json!({
          "jsonrpc": "2.0",
          "id": id,
          "error": { "code": -32601, "message": format!("Method not found: {}", method) }
        }));
      }
    };

    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
  }

  /// 处理一行输入：解析失败应答 -32700（id 为 null），其余交给
  /// [`Self::handle_request`]。
  pub fn handle_line(&self, line: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(line) {
      Ok(request) => self.handle_request(&request),
      Err(err) => Some(json!({
        "jsonrpc": "2.0",
        "id": Value::Null,
        "error": { "code": -32700, "message": format!("Parse error: {}", err) }
      })),
    }
  }

  /// 在标准输入/输出上运行服务器：逐行读取请求，逐行写出应答。
  /// 单线程顺序处理，前一条应答写完之后才读取下一条请求。
  pub fn run_stdio(&self) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    info!("MCP 服务器已启动: {} v{}", SERVER_NAME, SERVER_VERSION);

    for line in stdin.lock().lines() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }

      if let Some(response) = self.handle_line(&line) {
        writeln!(stdout, "{}", response)?;
        stdout.flush()?;
      }
    }

    Ok(())
  }
}

fn required_str<'a>(arguments: &'a Value, name: &'static str) -> Result<&'a str, CallError> {
  match arguments.get(name).and_then(Value::as_str) {
    Some(value) if !value.is_empty() => Ok(value),
    _ => Err(CallError::MissingArgument(name)),
  }
}

/// 可读的标注摘要：逐个列出保留的检测，最后给出输出文件引用
fn format_visualization(result: &VisualizationResult) -> String {
  let mut lines = vec![format!(
    "Detected {} objects (confidence >= {:.2})",
    result.total_objects, result.confidence_threshold
  )];

  for (index, detection) in result.detections.iter().enumerate() {
    lines.push(format!(
      "{}. {} (confidence: {:.2})",
      index + 1,
      detection.label,
      detection.confidence
    ));
    lines.push(format!(
      "   Location: x={}, y={}",
      detection.bbox.x, detection.bbox.y
    ));
    lines.push(format!(
      "   Size: {}x{}",
      detection.bbox.width, detection.bbox.height
    ));
  }

  lines.push(format!("Annotated image saved to: {}", result.output_path));
  lines.join("\n")
}
