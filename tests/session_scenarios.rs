use people_counter_rs::capture::{BlankSource, SourceStats};
use people_counter_rs::detect::{BBox, ScriptedDetector, TrackedBox};
use people_counter_rs::event_log::LogRecord;
use people_counter_rs::pipeline::PngSnapshotSink;
use people_counter_rs::transmit::{MailRequest, OutboxTransport};
use people_counter_rs::{CounterConfig, CounterError, EventKind, SessionController};
use std::path::Path;
use std::time::{Duration, Instant};

fn walk(id: u32, xs: &[f32]) -> Vec<Vec<TrackedBox>> {
    xs.iter()
        .map(|&x| {
            vec![TrackedBox {
                identity: id,
                bbox: BBox::new(x - 10.0, 100.0, x + 10.0, 300.0),
            }]
        })
        .collect()
}

fn config(dir: &Path, log_name: &str) -> CounterConfig {
    CounterConfig {
        log_path: dir.join(log_name),
        outbox_dir: dir.join("outbox"),
        font_path: None,
        entry_line_x: Some(100),
        exit_line_x: Some(200),
        ..Default::default()
    }
}

fn session(cfg: CounterConfig, script: Vec<Vec<TrackedBox>>) -> (SessionController, SourceStats) {
    let source = BlankSource::new(640, 480).with_fps(500.0);
    let stats = source.stats();
    let s = SessionController::new(
        cfg,
        Box::new(source),
        Box::new(ScriptedDetector::new(script)),
    );
    (s, stats)
}

/// 运行到脚本中的帧全部处理完毕
fn run_script(s: &mut SessionController, stats: &SourceStats, frames: usize) {
    let baseline = stats.reads();
    s.start().unwrap();
    // 读到第 frames+1 帧时, 前 frames 帧已处理完
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && stats.reads() < baseline + frames + 1 {
        std::thread::sleep(Duration::from_millis(5));
    }
    // 给显示线程至少一个节拍
    std::thread::sleep(Duration::from_millis(100));
    s.stop().unwrap();
}

#[test]
fn walk_across_both_lines_logs_entry_then_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (mut s, stats) = session(config(dir.path(), "log.csv"), walk(7, &[50.0, 150.0, 250.0]));
    run_script(&mut s, &stats, 3);

    let counters = s.counters();
    assert_eq!((counters.entries, counters.exits), (1, 1));

    let records: Vec<LogRecord> = s.read_log().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].identity(), Some(7));
    assert_eq!(records[0].kind(), Some(EventKind::Entry));
    assert!(records[0].duration.is_empty());
    assert_eq!(records[1].kind(), Some(EventKind::Exit));
    assert!(!records[1].duration.is_empty());
    assert!(records[0].timestamp().unwrap() <= records[1].timestamp().unwrap());

    let state = s
        .tracks_snapshot()
        .unwrap()
        .into_iter()
        .find(|t| t.identity == 7)
        .unwrap();
    assert!(state.exited && !state.entered);
    assert_eq!(state.last_x, Some(250));
}

#[test]
fn read_and_detector_failures_only_skip_frames() {
    let dir = tempfile::tempdir().unwrap();
    // 每隔一次读帧失败, 帧1/帧3检测失败; 剩下的帧仍是 50 → 150 → 250
    let source = BlankSource::new(640, 480).with_fps(500.0).fail_every(2);
    let stats = source.stats();
    let mut script = walk(8, &[50.0, 100.0, 150.0, 200.0, 250.0]);
    script[1].clear();
    script[3].clear();
    let mut s = SessionController::new(
        config(dir.path(), "flaky.csv"),
        Box::new(source),
        Box::new(ScriptedDetector::new(script).fail_on([1, 3])),
    );
    // 5 帧成功读取需要约 10 次读
    run_script(&mut s, &stats, 12);

    let counters = s.counters();
    assert_eq!((counters.entries, counters.exits), (1, 1));
    let kinds: Vec<Option<EventKind>> = s.read_log().unwrap().iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![Some(EventKind::Entry), Some(EventKind::Exit)]);
    assert_eq!(stats.closed(), 1);
}

#[test]
fn leftward_walk_and_inverted_lines_never_count() {
    let dir = tempfile::tempdir().unwrap();
    let (mut s, stats) = session(
        config(dir.path(), "left.csv"),
        walk(3, &[300.0, 250.0, 150.0, 50.0]),
    );
    run_script(&mut s, &stats, 4);
    assert_eq!(s.counters().entries, 0);
    assert!(s.read_log().unwrap().is_empty());

    let mut inverted = config(dir.path(), "inverted.csv");
    inverted.entry_line_x = Some(200);
    inverted.exit_line_x = Some(100);
    let (mut s, stats) = session(inverted, walk(4, &[50.0, 150.0, 250.0, 350.0]));
    run_script(&mut s, &stats, 4);
    assert_eq!(s.counters().entries, 0);
    assert_eq!(s.counters().exits, 0);
}

#[test]
fn unwritable_log_does_not_lose_counts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir.path().join("no-such-dir"), "log.csv");
    let mut script = walk(1, &[50.0, 150.0, 250.0]);
    script.extend(walk(2, &[50.0, 150.0]));
    let (mut s, stats) = session(cfg, script);
    run_script(&mut s, &stats, 5);

    let counters = s.counters();
    assert_eq!((counters.entries, counters.exits), (2, 1));
    let tracks = s.tracks_snapshot().unwrap();
    assert!(tracks.iter().any(|t| t.identity == 1 && t.exited));
    assert!(tracks.iter().any(|t| t.identity == 2 && t.entered));
    assert!(s.read_log().is_err());
}

#[test]
fn counts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (mut s, stats) = session(config(dir.path(), "log.csv"), walk(9, &[50.0, 150.0]));
    run_script(&mut s, &stats, 2);
    assert_eq!(s.counters().entries, 1);
    // 第二次运行帧序号从0开始, 同一目标已进入, 不重复计数
    run_script(&mut s, &stats, 2);
    assert_eq!(s.counters().entries, 1);
}

#[test]
fn headless_snapshot_export_and_outbox() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("latest.png");
    let cfg = config(dir.path(), "log.csv");
    let outbox_dir = cfg.outbox_dir.clone();
    let (mut s, stats) = session(cfg, walk(5, &[50.0, 150.0, 250.0]));
    s.set_display_sink(Box::new(PngSnapshotSink::new(&snapshot)));
    run_script(&mut s, &stats, 3);
    assert!(s.take_display_sink().is_some());
    assert_eq!(image::image_dimensions(&snapshot).unwrap(), (640, 480));

    let exported = dir.path().join("people_counter_log.csv");
    let bytes = s.export(&exported).unwrap();
    assert_eq!(bytes, std::fs::metadata(s.log_path()).unwrap().len());
    assert_eq!(
        std::fs::read(&exported).unwrap(),
        std::fs::read(s.log_path()).unwrap()
    );

    let outbox = OutboxTransport::new(&outbox_dir);
    let missing = MailRequest::new("me@example.com", "", "you@example.com");
    assert!(matches!(
        s.transmit(&missing, &outbox),
        Err(CounterError::MissingField("password"))
    ));
    s.transmit(&MailRequest::new("me@example.com", "pw", "you@example.com"), &outbox)
        .unwrap();
    assert_eq!(std::fs::read_dir(&outbox_dir).unwrap().count(), 1);
}
