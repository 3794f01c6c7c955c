//! 纯黑画面采集源 (空闲预览与测试用)

use super::{CaptureSource, FramePacer, FrameStream, REQUEST_HEIGHT, REQUEST_WIDTH};
use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 打开/读取/关闭次数统计, 可在源被移走后继续观察
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    opened: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl SourceStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct BlankSource {
    width: u32,
    height: u32,
    fps: Option<f32>,
    available: bool,
    fail_every: Option<usize>,
    stats: SourceStats,
}

impl BlankSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: None,
            available: true,
            fail_every: None,
            stats: SourceStats::default(),
        }
    }

    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = Some(fps);
        self
    }

    /// 模拟设备不可用, open 失败
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// 每第n次读取失败一次
    pub fn fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

impl Default for BlankSource {
    fn default() -> Self {
        Self::new(REQUEST_WIDTH, REQUEST_HEIGHT)
    }
}

impl CaptureSource for BlankSource {
    fn open(&mut self) -> Result<Box<dyn FrameStream>> {
        if !self.available {
            bail!("blank source marked unavailable");
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BlankStream {
            width: self.width,
            height: self.height,
            pacer: FramePacer::new(self.fps),
            fail_every: self.fail_every,
            stats: self.stats.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("blank {}x{}", self.width, self.height)
    }
}

struct BlankStream {
    width: u32,
    height: u32,
    pacer: FramePacer,
    fail_every: Option<usize>,
    stats: SourceStats,
}

impl FrameStream for BlankStream {
    fn read(&mut self) -> Result<RgbaImage> {
        self.pacer.wait();
        let n = self.stats.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(every) = self.fail_every {
            if n % every == 0 {
                bail!("simulated read failure #{}", n);
            }
        }
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba([0, 0, 0, 255]),
        ))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_read_close() {
        let mut source = BlankSource::new(32, 24).fail_every(3);
        let stats = source.stats();
        let mut stream = source.open().unwrap();
        assert_eq!(stream.resolution(), (32, 24));
        assert!(stream.read().is_ok());
        assert!(stream.read().is_ok());
        assert!(stream.read().is_err());
        stream.close();
        assert_eq!((stats.opened(), stats.reads(), stats.closed()), (1, 3, 1));
    }

    #[test]
    fn test_unavailable() {
        let mut source = BlankSource::default().unavailable();
        assert!(source.open().is_err());
        assert_eq!(source.stats().opened(), 0);
    }
}
