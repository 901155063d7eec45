// 该文件是 Qianli （千里目） 项目的一部分。
// src/staging.rs - 输入/输出暂存目录
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

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StagingError {
  #[error("Image file not found: {0}")]
  NotFound(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// 已暂存的输入图像。
///
/// 只有 [`StagingArea::stage`] 能构造该类型，
/// “先暂存、后标注”的调用顺序由此成为类型层面的约束。
#[derive(Clone, Debug)]
pub struct StagedImage {
  path: PathBuf,
}

impl StagedImage {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// 静态根目录下的两个暂存目录：input/ 放输入副本，output/ 放标注输出。
/// 启动时创建一次，之后只追加。
pub struct StagingArea {
  input_dir: PathBuf,
  output_dir: PathBuf,
}

impl StagingArea {
  pub fn new(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    Self {
      input_dir: root.join("input"),
      output_dir: root.join("output"),
    }
  }

  /// 创建两个暂存目录（幂等，含父目录）
  pub fn ensure(&self) -> Result<(), StagingError> {
    fs::create_dir_all(&self.input_dir)?;
    fs::create_dir_all(&self.output_dir)?;
    debug!(
      "暂存目录就绪: {} / {}",
      self.input_dir.display(),
      self.output_dir.display()
    );
    Ok(())
  }

  pub fn input_dir(&self) -> &Path {
    &self.input_dir
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  /// 把输入图像复制进输入暂存目录，文件名带秒级时间戳。
  /// 与输出命名一样，同一秒内对同一文件的重复调用会静默覆盖。
  pub fn stage(&self, image_path: &str) -> Result<StagedImage, StagingError> {
    let source = Path::new(image_path);
    if !source.exists() {
      return Err(StagingError::NotFound(image_path.to_string()));
    }

    let stem = source
      .file_stem()
      .and_then(|s| s.to_str())
      .unwrap_or("image");
    let extension = source
      .extension()
      .and_then(|s| s.to_str())
      .unwrap_or("jpg");
    let name = format!(
      "{}_{}.{}",
      stem,
      Local::now().format("%Y%m%d_%H%M%S"),
      extension
    );

    let staged = self.input_dir.join(name);
    fs::copy(source, &staged)?;
    debug!("输入图像已暂存: {}", staged.display());

    Ok(StagedImage { path: staged })
  }
}
