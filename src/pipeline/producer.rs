/// 生产者线程 - 采集 → 检测 → 越线判定 → 写日志 → 标注 → 投递
use super::annotate::Annotator;
use super::{AnnotatedFrame, DepositOutcome, Frame, FrameSlot, RunToken};
use crate::capture::FrameStream;
use crate::counting::{CrossingEvaluator, CrossingEvent, LineConfig};
use crate::detect::Detector;
use crate::error::{CounterError, Result};
use crate::event_log::EventSink;
use chrono::Local;
use log::{info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 生产者独占的资源, 退出时整体交还给会话控制器
pub struct ProducerParts {
    pub stream: Box<dyn FrameStream>,
    pub detector: Box<dyn Detector>,
    pub evaluator: CrossingEvaluator,
    pub sink: Arc<dyn EventSink>,
}

/// 单帧处理结果
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    pub detections: usize,
    pub events: Vec<CrossingEvent>,
    pub persist_failures: usize,
    pub deposit: Option<DepositOutcome>,
}

pub struct Producer {
    parts: ProducerParts,
    lines: Arc<LineConfig>,
    slot: FrameSlot,
    annotator: Annotator,
    token: RunToken,
    retry_delay: Duration,
    next_frame_id: u64,
}

impl Producer {
    pub fn new(
        parts: ProducerParts,
        lines: Arc<LineConfig>,
        slot: FrameSlot,
        annotator: Annotator,
        token: RunToken,
    ) -> Self {
        Self {
            parts,
            lines,
            slot,
            annotator,
            token,
            retry_delay: Duration::from_millis(10),
            next_frame_id: 0,
        }
    }

    /// 读帧失败后的等待时间 (避免设备异常时空转)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn evaluator(&self) -> &CrossingEvaluator {
        &self.parts.evaluator
    }

    /// 处理一帧
    ///
    /// 读帧或检测失败时返回错误, 本帧不产生任何状态变化.
    /// 日志写入失败不算错误: 计数与状态照常更新, 失败次数记在报告里.
    pub fn cycle(&mut self) -> Result<CycleReport> {
        let image = self
            .parts
            .stream
            .read()
            .map_err(|e| CounterError::capture_read(format!("{:#}", e)))?;
        let frame = Frame::new(image, self.next_frame_id);
        self.next_frame_id += 1;

        // 每帧只读一次计数线位置
        let lines = self.lines.load();

        let boxes = self
            .parts
            .detector
            .detect_and_track(&frame)
            .map_err(|e| CounterError::detector(format!("{:#}", e)))?;

        let Frame {
            mut image,
            frame_id,
        } = frame;
        self.annotator.draw_lines(&mut image, lines);

        let mut report = CycleReport {
            detections: boxes.len(),
            ..Default::default()
        };

        for tracked in &boxes {
            let now = Local::now();
            let events =
                self.parts
                    .evaluator
                    .evaluate(tracked.identity, tracked.bbox.center_x(), lines, now);

            for event in &events {
                match self.parts.sink.append(event) {
                    Ok(()) => info!("🚶 ID {} {}", event.identity, event.kind),
                    Err(e) => {
                        report.persist_failures += 1;
                        warn!(
                            "⚠️ 事件写入失败 (ID {} {}): {}",
                            event.identity, event.kind, e
                        );
                    }
                }
            }

            let duration = self
                .parts
                .evaluator
                .store()
                .get(tracked.identity)
                .and_then(|state| state.display_duration(now));
            self.annotator
                .draw_track(&mut image, &tracked.bbox, tracked.identity, duration);

            report.events.extend(events);
        }

        let counters = self.parts.evaluator.counters().snapshot();
        report.deposit = Some(self.slot.deposit(AnnotatedFrame {
            image,
            frame_id,
            counters,
        }));
        Ok(report)
    }

    /// 运行直到令牌失效, 返回独占资源 (采集流由调用方关闭)
    pub fn run(mut self) -> ProducerParts {
        info!("✅ 生产者线程启动");

        let mut frames = 0u64;
        let mut replaced = 0u64;
        let mut last = Instant::now();

        while self.token.is_active() {
            // 外部检测器panic同样只跳过本帧, 资源必须交还
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.cycle()))
                .unwrap_or_else(|payload| {
                    Err(CounterError::detector(format!(
                        "处理帧时panic: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match outcome {
                Ok(report) => {
                    frames += 1;
                    if report.deposit == Some(DepositOutcome::Replaced)
                        || report.deposit == Some(DepositOutcome::Dropped)
                    {
                        replaced += 1;
                    }
                }
                Err(e @ CounterError::CaptureRead(_)) => {
                    warn!("⚠️ {}", e);
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => warn!("⚠️ {}", e),
            }

            if last.elapsed() >= Duration::from_secs(1) {
                let fps = frames as f64 / last.elapsed().as_secs_f64();
                let counters = self.parts.evaluator.counters().snapshot();
                info!(
                    "📊 处理 {:.1}fps | 显示跳帧 {} | 进入 {} | 离开 {}",
                    fps, replaced, counters.entries, counters.exits
                );
                frames = 0;
                replaced = 0;
                last = Instant::now();
            }
        }

        info!("🛑 生产者线程退出");
        self.parts
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BlankSource, CaptureSource};
    use crate::counting::{Counters, EventKind, LinePositions};
    use crate::detect::{BBox, ScriptedDetector, TrackedBox};
    use crate::event_log::CsvEventLog;
    use crate::pipeline::SlotPolicy;

    /// 第一次调用时panic, 之后按脚本返回
    struct PanicOnce {
        panicked: bool,
        inner: ScriptedDetector,
    }

    impl Detector for PanicOnce {
        fn detect_and_track(&mut self, frame: &Frame) -> anyhow::Result<Vec<TrackedBox>> {
            if !self.panicked {
                self.panicked = true;
                panic!("detector blew up");
            }
            self.inner.detect_and_track(frame)
        }
    }

    fn person(id: u32, center_x: f32) -> Vec<TrackedBox> {
        vec![TrackedBox {
            identity: id,
            bbox: BBox::new(center_x - 10.0, 100.0, center_x + 10.0, 300.0),
        }]
    }

    fn producer(script: Vec<Vec<TrackedBox>>, sink: Arc<dyn EventSink>) -> (Producer, FrameSlot) {
        let stream = BlankSource::new(640, 480).open().unwrap();
        let parts = ProducerParts {
            stream,
            detector: Box::new(ScriptedDetector::new(script)),
            evaluator: CrossingEvaluator::new(Arc::new(Counters::default())),
            sink,
        };
        let lines = Arc::new(LineConfig::new(
            LinePositions {
                entry_x: 100,
                exit_x: 200,
            },
            640,
        ));
        let slot = FrameSlot::new(SlotPolicy::KeepNewest);
        let p = Producer::new(parts, lines, slot.clone(), Annotator::default(), RunToken::new());
        (p, slot)
    }

    #[test]
    fn test_cycle_counts_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(CsvEventLog::new(dir.path().join("log.csv")));
        let (mut p, slot) = producer(
            vec![person(7, 50.0), person(7, 150.0), person(7, 250.0)],
            log.clone(),
        );

        assert!(p.cycle().unwrap().events.is_empty());
        let entry = p.cycle().unwrap();
        assert_eq!(entry.events.len(), 1);
        assert_eq!(entry.events[0].kind, EventKind::Entry);
        let exit = p.cycle().unwrap();
        assert_eq!(exit.events[0].kind, EventKind::Exit);
        assert_eq!(exit.deposit, Some(DepositOutcome::Replaced));

        let shown = slot.take().unwrap();
        assert_eq!(shown.frame_id, 2);
        assert_eq!((shown.counters.entries, shown.counters.exits), (1, 1));
        assert_eq!(log.read_records().unwrap().len(), 2);
    }

    #[test]
    fn test_persist_failure_keeps_counting() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvEventLog::new(dir.path().join("missing").join("log.csv")));
        let (mut p, _slot) = producer(
            vec![
                person(1, 50.0),
                person(1, 150.0),
                person(1, 250.0),
                person(2, 50.0),
                person(2, 150.0),
            ],
            sink,
        );

        let mut failures = 0;
        for _ in 0..5 {
            failures += p.cycle().unwrap().persist_failures;
        }
        // Entry/Exit of 1 and Entry of 2 were all attempted
        assert_eq!(failures, 3);
        let counters = p.evaluator().counters().snapshot();
        assert_eq!((counters.entries, counters.exits), (2, 1));
        let state = p.evaluator().store().get(1).unwrap();
        assert!(state.exited && !state.entered);
        assert!(state.duration.is_some());
    }

    #[test]
    fn test_detector_failure_skips_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvEventLog::new(dir.path().join("log.csv")));
        let stream = BlankSource::new(64, 48).open().unwrap();
        let parts = ProducerParts {
            stream,
            detector: Box::new(ScriptedDetector::new(vec![person(1, 5.0)]).fail_on([0])),
            evaluator: CrossingEvaluator::new(Arc::new(Counters::default())),
            sink,
        };
        let lines = Arc::new(LineConfig::new(LinePositions::for_width(64), 64));
        let slot = FrameSlot::default();
        let mut p = Producer::new(parts, lines, slot.clone(), Annotator::default(), RunToken::new());

        assert!(matches!(p.cycle(), Err(CounterError::Detector(_))));
        assert!(slot.is_empty());
        assert!(p.evaluator().store().is_empty());
    }

    #[test]
    fn test_run_returns_parts_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvEventLog::new(dir.path().join("log.csv")));
        let (p, _slot) = producer(Vec::new(), sink);
        let token = p.token.clone();
        let handle = std::thread::spawn(move || p.run());
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let mut parts = handle.join().unwrap();
        parts.stream.close();
        assert_eq!(parts.evaluator.counters().entries(), 0);
    }

    #[test]
    fn test_run_survives_detector_panic() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvEventLog::new(dir.path().join("log.csv")));
        let (mut p, _slot) = producer(Vec::new(), sink);
        // 帧0 panic, 之后 1/2/3 走完一次进入与离开
        p.parts.detector = Box::new(PanicOnce {
            panicked: false,
            inner: ScriptedDetector::new(vec![
                Vec::new(),
                person(4, 50.0),
                person(4, 150.0),
                person(4, 250.0),
            ]),
        });
        let counters = p.evaluator().counters().clone();
        let token = p.token.clone();
        let handle = std::thread::spawn(move || p.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && counters.exits() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        token.cancel();
        let mut parts = handle.join().unwrap();
        parts.stream.close();
        assert_eq!(counters.entries(), 1);
        assert_eq!(counters.exits(), 1);
        assert!(parts.evaluator.store().get(4).unwrap().exited);
    }

    #[test]
    fn test_run_keeps_going_after_read_and_detect_failures() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvEventLog::new(dir.path().join("log.csv")));
        let (mut p, _slot) = producer(Vec::new(), sink);
        p.parts.stream = BlankSource::new(640, 480).fail_every(2).open().unwrap();
        p.parts.detector = Box::new(
            ScriptedDetector::new(vec![
                person(6, 50.0),
                Vec::new(),
                person(6, 150.0),
                Vec::new(),
                person(6, 250.0),
            ])
            .fail_on([1, 3]),
        );
        let p = p.with_retry_delay(Duration::from_millis(1));
        let counters = p.evaluator().counters().clone();
        let token = p.token.clone();
        let handle = std::thread::spawn(move || p.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && counters.exits() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        token.cancel();
        let parts = handle.join().unwrap();
        assert_eq!((counters.entries(), counters.exits()), (1, 1));
        assert!(parts.evaluator.store().get(6).unwrap().exited);
    }
}
