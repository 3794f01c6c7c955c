//! 运行配置 - JSON文件 + 命令行参数

use crate::capture::{BlankSource, CaptureSource, ImageSequenceSource};
use crate::counting::LinePositions;
use crate::detect::{Detector, ScriptedDetector};
use crate::pipeline::SlotPolicy;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 计数器参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    // === 采集 ===
    pub camera_index: usize, // 摄像头索引
    pub frame_width: u32,    // 请求宽度 (实际以采集协商为准)
    pub frame_height: u32,   // 请求高度
    pub fps: f32,            // 非摄像头源的回放帧率

    // === 计数线 (None表示按宽度的1/3, 2/3) ===
    pub entry_line_x: Option<i32>,
    pub exit_line_x: Option<i32>,

    // === 流水线 ===
    pub display_interval_ms: u64,    // 显示节拍
    pub stop_timeout_ms: u64,        // 停止时等待生产者退出的上限
    pub capture_retry_delay_ms: u64, // 读帧失败后的等待
    pub slot_policy: SlotPolicy,

    // === 日志与导出 ===
    pub log_path: PathBuf,
    pub export_file_name: String,
    pub font_path: Option<PathBuf>,

    // === 邮件 ===
    pub smtp_server: String,
    pub smtp_port: u16,
    pub outbox_dir: PathBuf,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            camera_index: 1,
            frame_width: 640,
            frame_height: 480,
            fps: 30.0,

            entry_line_x: None,
            exit_line_x: None,

            display_interval_ms: 30,
            stop_timeout_ms: 1000,
            capture_retry_delay_ms: 10,
            slot_policy: SlotPolicy::KeepNewest,

            log_path: PathBuf::from("entry_exit_log.csv"),
            export_file_name: "people_counter_log.csv".to_string(),
            font_path: Some(PathBuf::from("assets/font/DejaVuSans.ttf")),

            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            outbox_dir: PathBuf::from("outbox"),
        }
    }
}

impl CounterConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置, 解析失败时使用默认值
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    log::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("📝 配置文件不存在, 创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    log::error!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        log::info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 按画面宽度得到初始计数线位置
    pub fn initial_lines(&self, width: u32) -> LinePositions {
        let defaults = LinePositions::for_width(width);
        LinePositions {
            entry_x: self.entry_line_x.unwrap_or(defaults.entry_x),
            exit_x: self.exit_line_x.unwrap_or(defaults.exit_x),
        }
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_millis(self.display_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn capture_retry_delay(&self) -> Duration {
        Duration::from_millis(self.capture_retry_delay_ms)
    }

    pub fn print_summary(&self) {
        log::info!("🎛️ 当前计数器配置:");
        log::info!("  画面: {}x{} @ {}fps", self.frame_width, self.frame_height, self.fps);
        log::info!("  日志文件: {}", self.log_path.display());
        log::info!("  显示节拍: {}ms | 槽位策略: {:?}", self.display_interval_ms, self.slot_policy);
    }
}

/// 采集源类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// 本地摄像头 (需 `camera` 特性)
    Camera,
    /// 纯黑画面
    Blank,
    /// 图片目录回放
    Images,
}

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "双线人流计数器", long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "people_counter.json")]
    pub config: PathBuf,

    /// 采集源 (默认: 启用camera特性时为摄像头, 否则为纯黑画面)
    #[arg(short, long, value_enum)]
    pub source: Option<SourceKind>,

    /// 图片目录 (source=images)
    #[arg(long)]
    pub images: Option<PathBuf>,

    /// 检测结果脚本 (JSON Lines), 不提供时检测结果为空
    #[arg(short, long)]
    pub detections: Option<PathBuf>,

    /// 覆盖配置中的日志文件路径
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// 运行秒数 (无界面模式)
    #[arg(long, default_value_t = 10)]
    pub seconds: u64,

    /// 最新标注帧的PNG快照路径 (无界面模式)
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

impl Args {
    /// 读取配置文件并应用命令行覆盖
    pub fn load_config(&self) -> CounterConfig {
        let mut config = CounterConfig::load(&self.config);
        if let Some(log) = &self.log {
            config.log_path = log.clone();
        }
        config
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.unwrap_or(if cfg!(feature = "camera") {
            SourceKind::Camera
        } else {
            SourceKind::Blank
        })
    }

    pub fn capture_source(&self, config: &CounterConfig) -> anyhow::Result<Box<dyn CaptureSource>> {
        match self.source_kind() {
            SourceKind::Blank => Ok(Box::new(
                BlankSource::new(config.frame_width, config.frame_height).with_fps(config.fps),
            )),
            SourceKind::Images => {
                let dir = self
                    .images
                    .clone()
                    .context("source=images 需要 --images <DIR>")?;
                Ok(Box::new(
                    ImageSequenceSource::new(dir)
                        .with_fps(config.fps)
                        .looping(true),
                ))
            }
            #[cfg(feature = "camera")]
            SourceKind::Camera => Ok(Box::new(crate::capture::CameraSource::new(
                config.camera_index,
            ))),
            #[cfg(not(feature = "camera"))]
            SourceKind::Camera => anyhow::bail!("未启用 camera 特性, 无法打开摄像头"),
        }
    }

    pub fn detector(&self) -> anyhow::Result<Box<dyn Detector>> {
        match &self.detections {
            Some(path) => Ok(Box::new(ScriptedDetector::from_path(path)?.looping(true))),
            None => {
                log::warn!("⚠️ 未提供检测脚本, 检测结果为空");
                Ok(Box::new(ScriptedDetector::empty()))
            }
        }
    }
}
