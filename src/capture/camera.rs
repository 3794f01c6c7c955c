//! 摄像头采集 - FFmpeg 解码线程 + 有界通道
//!
//! 支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux).
//! 请求 640x480@30fps, 实际分辨率以第一帧为准.

use super::{CaptureSource, FrameStream, REQUEST_FPS, REQUEST_HEIGHT, REQUEST_WIDTH};
use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
// 设备卡住时解码线程可能一直收不到帧, 关闭时最多等这么久
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(target_os = "windows")]
const FORMAT: &str = "dshow";
#[cfg(target_os = "macos")]
const FORMAT: &str = "avfoundation";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const FORMAT: &str = "v4l2";

pub struct CameraSource {
    device_index: usize,
}

impl CameraSource {
    pub fn new(device_index: usize) -> Self {
        Self { device_index }
    }

    /// 根据平台拼接设备地址 (Windows需要设备名)
    fn device_url(&self) -> Result<String> {
        #[cfg(target_os = "windows")]
        {
            let devices = ez_ffmpeg::device::get_input_video_devices()
                .map_err(|e| anyhow!("获取摄像头列表失败: {}", e))?;
            let name = devices
                .get(self.device_index)
                .ok_or_else(|| anyhow!("摄像头索引 {} 不存在 (共{}个)", self.device_index, devices.len()))?;
            Ok(format!("video={}", name))
        }
        #[cfg(target_os = "macos")]
        {
            Ok(format!("{}", self.device_index))
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            Ok(format!("/dev/video{}", self.device_index))
        }
    }
}

impl CaptureSource for CameraSource {
    fn open(&mut self) -> Result<Box<dyn FrameStream>> {
        let url = self.device_url()?;
        log::info!("🎥 打开摄像头: {} ({})", url, FORMAT);

        let (frame_tx, frame_rx) = bounded::<RgbaImage>(2);
        let (status_tx, status_rx) = bounded::<String>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let filter = CaptureFilter {
            tx: frame_tx,
            stop: stop.clone(),
        };
        let mut worker = DecodeWorker::spawn(stop, move || run_decoder(url, filter, status_tx))?;

        // 等第一帧确定实际分辨率
        let first = crossbeam_channel::select! {
            recv(frame_rx) -> frame => frame.ok(),
            recv(status_rx) -> msg => {
                worker.shutdown(&frame_rx);
                bail!("摄像头打开失败: {}", msg.unwrap_or_default());
            }
            default(OPEN_TIMEOUT) => None,
        };
        let Some(first) = first else {
            worker.shutdown(&frame_rx);
            if let Ok(msg) = status_rx.try_recv() {
                bail!("摄像头打开失败: {}", msg);
            }
            bail!("摄像头 {} 秒内没有画面", OPEN_TIMEOUT.as_secs());
        };

        let (width, height) = first.dimensions();
        log::info!("✅ 摄像头已连接: {}x{}", width, height);

        Ok(Box::new(CameraStream {
            rx: frame_rx,
            pending: Some(first),
            width,
            height,
            worker,
        }))
    }

    fn describe(&self) -> String {
        format!("camera #{}", self.device_index)
    }
}

/// 解码线程句柄: 停止标志 + 退出通知, 关闭时有限等待
struct DecodeWorker {
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    fn spawn(stop: Arc<AtomicBool>, decode: impl FnOnce() + Send + 'static) -> Result<Self> {
        let (done_tx, done_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("camera-decode".into())
            .spawn(move || {
                decode();
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            stop,
            done: done_rx,
            handle: Some(handle),
        })
    }

    /// 置停止标志并等待解码线程退出, 超时则不再等待 (线程在下一帧到达时自行退出)
    fn shutdown(&mut self, frames: &Receiver<RgbaImage>) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // 排空通道, 让解码线程进入下一帧检查停止标志
        while frames.try_recv().is_ok() {}
        match self.done.recv_timeout(CLOSE_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "⚠️ 摄像头解码线程 {}ms 内未退出, 不再等待",
                    CLOSE_TIMEOUT.as_millis()
                );
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn run_decoder(url: String, filter: CaptureFilter, status: Sender<String>) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("capture", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let size = format!("{}x{}", REQUEST_WIDTH, REQUEST_HEIGHT);
    let fps = REQUEST_FPS.to_string();
    let input = Input::new(url)
        .set_format(FORMAT)
        .set_input_opts([("framerate", fps.as_str()), ("video_size", size.as_str())].into());

    let ctx = match FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            let _ = status.try_send(format!("构建失败: {}", e));
            return;
        }
    };

    let sch = match ctx.start() {
        Ok(s) => s,
        Err(e) => {
            let _ = status.try_send(format!("启动失败: {}", e));
            return;
        }
    };

    let _ = sch.wait();
    log::info!("📹 摄像头解码结束");
}

struct CameraStream {
    rx: Receiver<RgbaImage>,
    pending: Option<RgbaImage>,
    width: u32,
    height: u32,
    worker: DecodeWorker,
}

impl FrameStream for CameraStream {
    fn read(&mut self) -> Result<RgbaImage> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        match self.rx.recv_timeout(READ_TIMEOUT) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!("摄像头读取超时")),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("摄像头解码线程已退出")),
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        self.worker.shutdown(&self.rx);
        log::info!("🔒 摄像头已释放");
    }
}

/// FFmpeg帧过滤器: YUV420P → RGBA, 通道满时丢帧
struct CaptureFilter {
    tx: Sender<RgbaImage>,
    stop: Arc<AtomicBool>,
}

impl FrameFilter for CaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<Frame>, String> {
        if self.stop.load(Ordering::SeqCst) {
            return Err("capture stopped".to_string());
        }

        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let w = raw.width as usize;
            let h = raw.height as usize;
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if w == 0 || h == 0 || y_stride < w || uv_stride < w / 2 {
                return Ok(None);
            }
            if raw.data[0].is_null() || raw.data[1].is_null() || raw.data[2].is_null() {
                return Ok(None);
            }

            let mut rgba = vec![255u8; w * h * 4];
            yuv420p_to_rgba(
                raw.data[0],
                raw.data[1],
                raw.data[2],
                y_stride,
                uv_stride,
                &mut rgba,
                w,
                h,
            );

            if let Some(img) = RgbaImage::from_raw(w as u32, h as u32, rgba) {
                // 消费端跟不上时丢弃
                let _ = self.tx.try_send(img);
            }
        }
        Ok(Some(frame))
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgba(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;
        for x in 0..width {
            let luma = *y_plane.add(y_row + x) as i32;
            let u = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out] = (luma + ((v * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out + 1] = (luma - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out + 2] = (luma + ((u * 227) >> 7)).clamp(0, 255) as u8;
            out += 4;
        }
    }
}
