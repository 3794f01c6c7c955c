/// 会话控制器 (Session Controller)
///
/// 状态: Idle → Running → Stopping → Idle. start/stop 均可重复调用.
/// Stopping 只存在于 stop() 执行期间 (独占 &mut self), 外部只能观察到 Idle/Running.
/// - start: 打开采集 (失败则保持Idle并返回错误) → 启动生产者线程 (+可选显示线程)
/// - stop:  使本次运行令牌失效 → 有限时间等待生产者交还资源 → 关闭采集 → Idle
///
/// 生产者超时未退出时不强行终止, 记为"滞留", 下次 start/stop 时回收;
/// 回收前 start 返回 ProducerBusy.
use crate::capture::CaptureSource;
use crate::config::CounterConfig;
use crate::counting::{
    CounterSnapshot, Counters, CrossingEvaluator, LineConfig, LinePositions, TrackState,
};
use crate::detect::Detector;
use crate::error::{CounterError, Result};
use crate::event_log::{CsvEventLog, EventSink, LogRecord};
use crate::pipeline::{
    Annotator, Consumer, FrameSink, FrameSlot, Producer, ProducerParts, RunToken,
};
use crate::transmit::{MailRequest, MailTransport, OutgoingMail};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use image::RgbaImage;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

type DisplaySink = Box<dyn FrameSink + Send>;

/// 一次运行的句柄
struct ActiveRun {
    token: RunToken,
    done: Receiver<ProducerParts>,
    producer: JoinHandle<()>,
    display: Option<JoinHandle<DisplaySink>>,
}

pub struct SessionController {
    config: CounterConfig,
    source: Box<dyn CaptureSource>,
    detector: Option<Box<dyn Detector>>,
    evaluator: Option<CrossingEvaluator>,
    log: CsvEventLog,
    sink: Arc<dyn EventSink>,
    counters: Arc<Counters>,
    lines: Arc<LineConfig>,
    slot: FrameSlot,
    annotator: Annotator,
    display_sink: Option<DisplaySink>,
    frame_size: (u32, u32),
    run: Option<ActiveRun>,
    lingering: Option<Receiver<ProducerParts>>,
}

impl SessionController {
    /// 创建会话, 日志文件不存在时写入表头
    pub fn new(
        config: CounterConfig,
        source: Box<dyn CaptureSource>,
        detector: Box<dyn Detector>,
    ) -> Self {
        let log = CsvEventLog::new(&config.log_path);
        if let Err(e) = log.ensure_header() {
            warn!("⚠️ 无法创建日志文件 {}: {}", log.path().display(), e);
        }
        let sink: Arc<dyn EventSink> = Arc::new(log.clone());

        let counters = Arc::new(Counters::default());
        let frame_size = (config.frame_width, config.frame_height);
        let lines = Arc::new(LineConfig::new(
            config.initial_lines(config.frame_width),
            config.frame_width,
        ));
        let annotator = Annotator::from_font_path(config.font_path.as_deref());

        Self {
            slot: FrameSlot::new(config.slot_policy),
            evaluator: Some(CrossingEvaluator::new(counters.clone())),
            detector: Some(detector),
            config,
            source,
            log,
            sink,
            counters,
            lines,
            annotator,
            display_sink: None,
            frame_size,
            run: None,
            lingering: None,
        }
    }

    /// 每次运行时由独立显示线程按节拍取帧
    pub fn set_display_sink(&mut self, sink: DisplaySink) {
        self.display_sink = Some(sink);
    }

    pub fn take_display_sink(&mut self) -> Option<DisplaySink> {
        self.display_sink.take()
    }

    pub fn state(&self) -> SessionState {
        if self.run.is_some() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    // ========== 运行控制 ==========

    pub fn start(&mut self) -> Result<()> {
        if self.run.is_some() {
            return Ok(());
        }
        if !self.reclaim_lingering() {
            return Err(CounterError::ProducerBusy);
        }
        let (Some(detector), Some(evaluator)) = (self.detector.take(), self.evaluator.take())
        else {
            return Err(CounterError::detector("detector was lost with a crashed producer"));
        };

        let stream = match self.source.open() {
            Ok(stream) => stream,
            Err(e) => {
                self.detector = Some(detector);
                self.evaluator = Some(evaluator);
                error!("❌ 采集源打开失败 ({}): {:#}", self.source.describe(), e);
                return Err(CounterError::capture_open(format!("{:#}", e)));
            }
        };

        let (width, height) = stream.resolution();
        self.frame_size = (width, height);
        self.lines.set_frame_width(width);
        self.slot.clear();
        info!(
            "🎥 采集已打开: {} ({}x{})",
            self.source.describe(),
            width,
            height
        );

        let token = RunToken::new();
        let parts = ProducerParts {
            stream,
            detector,
            evaluator,
            sink: self.sink.clone(),
        };
        let producer = Producer::new(
            parts,
            self.lines.clone(),
            self.slot.clone(),
            self.annotator.clone(),
            token.clone(),
        )
        .with_retry_delay(self.config.capture_retry_delay());

        let (done_tx, done_rx) = bounded(1);
        let producer = std::thread::Builder::new()
            .name("producer".into())
            .spawn(move || {
                let parts = producer.run();
                let _ = done_tx.send(parts);
            })?;

        let display = match self.display_sink.take() {
            Some(mut sink) => {
                let consumer = self.consumer();
                let token = token.clone();
                Some(
                    std::thread::Builder::new()
                        .name("display".into())
                        .spawn(move || {
                            consumer.run(&token, sink.as_mut());
                            sink
                        })?,
                )
            }
            None => None,
        };

        self.run = Some(ActiveRun {
            token,
            done: done_rx,
            producer,
            display,
        });
        info!("▶️ 计数开始");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        let Some(run) = self.run.take() else {
            self.reclaim_lingering();
            return Ok(());
        };
        run.token.cancel();

        if let Some(display) = run.display {
            match display.join() {
                Ok(sink) => self.display_sink = Some(sink),
                Err(_) => error!("❌ 显示线程异常退出"),
            }
        }

        match run.done.recv_timeout(self.config.stop_timeout()) {
            Ok(parts) => {
                if run.producer.join().is_err() {
                    error!("❌ 生产者线程异常退出");
                }
                self.restore(parts);
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "⚠️ 生产者 {}ms 内未退出, 采集将在其退出后释放",
                    self.config.stop_timeout_ms
                );
                self.lingering = Some(run.done);
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("❌ 生产者线程异常退出, 检测器与计数状态已丢失");
                let _ = run.producer.join();
            }
        }

        info!("⏹️ 计数停止");
        Ok(())
    }

    /// 回收滞留的生产者, 没有滞留或已回收返回true
    fn reclaim_lingering(&mut self) -> bool {
        let Some(done) = self.lingering.take() else {
            return true;
        };
        match done.try_recv() {
            Ok(parts) => {
                self.restore(parts);
                true
            }
            Err(TryRecvError::Empty) => {
                self.lingering = Some(done);
                false
            }
            Err(TryRecvError::Disconnected) => {
                error!("❌ 滞留的生产者异常退出");
                true
            }
        }
    }

    fn restore(&mut self, parts: ProducerParts) {
        let ProducerParts {
            mut stream,
            detector,
            evaluator,
            ..
        } = parts;
        stream.close();
        self.detector = Some(detector);
        self.evaluator = Some(evaluator);
        info!("🔒 采集已释放");
    }

    // ========== 计数线 ==========

    pub fn set_entry_line(&self, x: i32) {
        self.lines.set_entry_line(x);
    }

    pub fn set_exit_line(&self, x: i32) {
        self.lines.set_exit_line(x);
    }

    pub fn lines(&self) -> LinePositions {
        self.lines.load()
    }

    /// 协商后的画面尺寸 (未打开过采集时为请求尺寸)
    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    // ========== 读取状态 ==========

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// 目标状态快照, 运行中 (状态归生产者线程所有) 返回None
    pub fn tracks_snapshot(&self) -> Option<Vec<TrackState>> {
        self.evaluator.as_ref().map(|e| e.store().snapshot())
    }

    /// 与当前运行共用槽位的消费者
    pub fn consumer(&self) -> Consumer {
        Consumer::new(self.slot.clone(), self.config.display_interval())
    }

    /// 未运行时的预览画面
    pub fn idle_preview(&self) -> RgbaImage {
        let (w, h) = self.frame_size;
        self.annotator.idle_preview(w, h, self.lines.load())
    }

    // ========== 日志 ==========

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn read_log(&self) -> Result<Vec<LogRecord>> {
        self.log.read_records()
    }

    pub fn export(&self, destination: &Path) -> Result<u64> {
        self.log.export_to(destination)
    }

    pub fn transmit(&self, request: &MailRequest, transport: &dyn MailTransport) -> Result<()> {
        let mail = OutgoingMail::compose(
            request,
            &self.log,
            &self.config.export_file_name,
            &self.config.smtp_server,
            self.config.smtp_port,
        )?;
        transport
            .send(&mail)
            .map_err(|e| CounterError::Transport(format!("{:#}", e)))?;
        info!("📧 日志已发送给 {}", mail.to);
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let _ = self.stop();
        if let Some(done) = self.lingering.take() {
            if let Ok(parts) = done.recv_timeout(self.config.stop_timeout()) {
                self.restore(parts);
            }
        }
    }
}
