pub mod capture; // 视频采集接口与实现
pub mod config; // 运行配置参数
pub mod counting; // 越线计数状态机
pub mod detect; // 检测/追踪接口
pub mod error; // 错误类型
pub mod event_log; // CSV事件日志
pub mod pipeline; // 生产者/消费者帧流水线
pub mod session; // 会话控制器
pub mod transmit; // 日志邮件发送

pub use crate::config::{Args, CounterConfig, SourceKind};
pub use crate::counting::{
    Counters, CrossingEvaluator, CrossingEvent, EventKind, LinePositions, TrackId, TrackState,
    TrackStateStore,
};
pub use crate::error::{CounterError, Result};
pub use crate::event_log::{CsvEventLog, EventSink, LogRecord};
pub use crate::pipeline::{AnnotatedFrame, Frame, FrameSlot, SlotPolicy};
pub use crate::session::{SessionController, SessionState};

use chrono::{DateTime, Local, NaiveDateTime};

/// 日志时间戳格式 (微秒精度, 本地时间)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn format_timestamp(t: &DateTime<Local>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Local>> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .ok()?
        .and_local_timezone(Local)
        .earliest()
}

/// 时长文本: `H:MM:SS[.ffffff]`, 超过一天加 `N day(s), ` 前缀.
/// 负时长 (时钟回拨) 按0处理.
pub fn format_timedelta(d: chrono::Duration) -> String {
    let total_us = d.num_microseconds().unwrap_or(i64::MAX).max(0);
    let micros = total_us % 1_000_000;
    let secs = total_us / 1_000_000;
    let days = secs / 86_400;
    let rem = secs % 86_400;

    let mut text = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    if days != 0 {
        let plural = if days != 1 { "s" } else { "" };
        text = format!("{} day{}, {}", days, plural, text);
    }
    if micros != 0 {
        text.push_str(&format!(".{:06}", micros));
    }
    text
}

/// 画面标注用时长: `1h 2m 3s`
pub fn format_hms(d: chrono::Duration) -> String {
    let total = d.num_seconds().max(0);
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timedelta_text() {
        assert_eq!(format_timedelta(chrono::Duration::seconds(5)), "0:00:05");
        assert_eq!(
            format_timedelta(chrono::Duration::microseconds(3_723_000_250)),
            "1:02:03.000250"
        );
        assert_eq!(
            format_timedelta(chrono::Duration::hours(49)),
            "2 days, 1:00:00"
        );
        assert_eq!(format_timedelta(chrono::Duration::hours(24)), "1 day, 0:00:00");
        assert_eq!(format_timedelta(chrono::Duration::seconds(-3)), "0:00:00");
    }

    #[test]
    fn test_hms_label() {
        assert_eq!(format_hms(chrono::Duration::seconds(3725)), "1h 2m 5s");
        assert_eq!(format_hms(chrono::Duration::milliseconds(900)), "0h 0m 0s");
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let t = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .unwrap()
            + chrono::Duration::microseconds(42);
        let text = format_timestamp(&t);
        assert_eq!(text, "2024-03-09 14:05:07.000042");
        assert_eq!(parse_timestamp(&text), Some(t));
    }
}
