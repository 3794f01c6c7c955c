/// 视频采集系统 (Capture System)
///
/// 外部采集源接口: open → read* → close, 打开后可读取协商出的分辨率.
/// - BlankSource:          纯黑画面 (预览/测试)
/// - ImageSequenceSource:  按文件名顺序回放图片目录
/// - CameraSource:         本地摄像头 (FFmpeg, 需开启 `camera` 特性)
#[cfg(feature = "camera")]
pub mod camera;
pub mod image_sequence;
pub mod synthetic;

#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use image_sequence::ImageSequenceSource;
pub use synthetic::{BlankSource, SourceStats};

use image::RgbaImage;
use std::time::{Duration, Instant};

/// 请求的采集分辨率与帧率
pub const REQUEST_WIDTH: u32 = 640;
pub const REQUEST_HEIGHT: u32 = 480;
pub const REQUEST_FPS: u32 = 30;

/// 采集源 (可重复打开)
pub trait CaptureSource: Send {
    fn open(&mut self) -> anyhow::Result<Box<dyn FrameStream>>;

    /// 日志中显示的名称
    fn describe(&self) -> String;
}

/// 已打开的采集流
pub trait FrameStream: Send {
    fn read(&mut self) -> anyhow::Result<RgbaImage>;

    /// 协商后的实际分辨率 (宽, 高)
    fn resolution(&self) -> (u32, u32);

    fn close(&mut self);
}

/// 按固定帧率节流读取
#[derive(Debug)]
pub struct FramePacer {
    interval: Option<Duration>,
    next: Instant,
}

impl FramePacer {
    pub fn new(fps: Option<f32>) -> Self {
        let interval = fps
            .filter(|f| *f > 0.0)
            .map(|f| Duration::from_secs_f32(1.0 / f));
        Self {
            interval,
            next: Instant::now(),
        }
    }

    pub fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
            self.next += interval;
        } else {
            // 落后时不追帧
            self.next = now + interval;
        }
    }
}
