/// 双线人流计数器 - 无界面运行
///
/// 运行指定秒数后停止, 期间按显示节拍把最新标注帧写入PNG快照.
///
/// 示例:
///   counter-headless --source images --images frames/ --detections tracks.jsonl --seconds 30 --snapshot latest.png
use anyhow::Result;
use clap::Parser;
use people_counter_rs::pipeline::PngSnapshotSink;
use people_counter_rs::{Args, SessionController};
use std::time::Duration;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.load_config();
    config.print_summary();

    let source = args.capture_source(&config)?;
    let detector = args.detector()?;

    log::info!("🚀 人流计数启动 ({} 秒)", args.seconds);
    let mut session = SessionController::new(config, source, detector);
    if let Some(path) = &args.snapshot {
        log::info!("🖼️ 快照输出: {}", path.display());
        session.set_display_sink(Box::new(PngSnapshotSink::new(path)));
    }

    session.start()?;
    std::thread::sleep(Duration::from_secs(args.seconds));
    session.stop()?;

    let counters = session.counters();
    log::info!(
        "📊 运行结束: 进入 {} | 离开 {} | 日志 {}",
        counters.entries,
        counters.exits,
        session.log_path().display()
    );
    Ok(())
}
