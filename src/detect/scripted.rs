//! 脚本检测器 - 按帧序号回放预先记录的追踪结果
//!
//! 文件格式为 JSON Lines, 第N行对应第N帧:
//! `[{"id": 7, "box": [40, 100, 60, 300]}, ...]`, 空数组表示该帧无人.

use super::{Detector, TrackedBox};
use crate::pipeline::Frame;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    frames: Vec<Vec<TrackedBox>>,
    looping: bool,
    failures: HashSet<u64>,
}

impl ScriptedDetector {
    pub fn new(frames: Vec<Vec<TrackedBox>>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// 不产生任何检测结果
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("读取检测脚本失败: {}", path.display()))?;
        let mut frames = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let boxes: Vec<TrackedBox> = serde_json::from_str(line)
                .with_context(|| format!("{}:{} 解析失败", path.display(), line_no + 1))?;
            frames.push(boxes);
        }
        log::info!("📜 检测脚本已加载: {} 帧", frames.len());
        Ok(Self::new(frames))
    }

    /// 脚本结束后从头循环
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// 指定帧上模拟检测失败
    pub fn fail_on(mut self, frame_ids: impl IntoIterator<Item = u64>) -> Self {
        self.failures.extend(frame_ids);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ScriptedDetector {
    fn detect_and_track(&mut self, frame: &Frame) -> Result<Vec<TrackedBox>> {
        if self.failures.contains(&frame.frame_id) {
            bail!("scripted failure on frame {}", frame.frame_id);
        }
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }

        let idx = if self.looping {
            (frame.frame_id % self.frames.len() as u64) as usize
        } else {
            frame.frame_id as usize
        };
        Ok(self.frames.get(idx).cloned().unwrap_or_default())
    }
}
