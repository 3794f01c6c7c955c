/// 消费者 - 按显示节拍从槽位取出标注帧
use super::{AnnotatedFrame, FrameSlot, RunToken};
use anyhow::{Context, Result};
use crossbeam_channel::tick;
use std::path::PathBuf;
use std::time::Duration;

/// 显示端 (GUI纹理 / 快照文件 / ...)
pub trait FrameSink {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<()>;
}

pub struct Consumer {
    slot: FrameSlot,
    period: Duration,
}

impl Consumer {
    pub fn new(slot: FrameSlot, period: Duration) -> Self {
        Self { slot, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 取一帧显示; 槽位为空时保持上一帧, 返回false
    pub fn step(&self, sink: &mut dyn FrameSink) -> bool {
        let Some(frame) = self.slot.take() else {
            return false;
        };
        if let Err(e) = sink.show(&frame) {
            log::warn!("⚠️ 显示失败 (帧 {}): {:#}", frame.frame_id, e);
        }
        true
    }

    /// 按固定周期取帧, 直到令牌失效
    pub fn run(&self, token: &RunToken, sink: &mut dyn FrameSink) {
        let ticker = tick(self.period);
        while token.is_active() {
            if ticker.recv().is_err() {
                break;
            }
            self.step(sink);
        }
        log::info!("🛑 显示线程退出");
    }
}

/// 把最新一帧写成PNG快照 (无界面运行时使用)
pub struct PngSnapshotSink {
    path: PathBuf,
    every: u64,
    shown: u64,
}

impl PngSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            every: 1,
            shown: 0,
        }
    }

    /// 每n帧写一次
    pub fn every(mut self, n: u64) -> Self {
        self.every = n.max(1);
        self
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl FrameSink for PngSnapshotSink {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        self.shown += 1;
        if (self.shown - 1) % self.every != 0 {
            return Ok(());
        }
        frame
            .image
            .save(&self.path)
            .with_context(|| format!("写入快照失败: {}", self.path.display()))
    }
}
