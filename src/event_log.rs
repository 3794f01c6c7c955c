//! CSV事件日志
//!
//! 每个事件一行, 列为 `ID,Event,Timestamp,Duration`, 行尾 CRLF.
//! 每次追加都重新打开文件并在返回前 fsync, 只追加不改写,
//! 查看器可以在计数过程中同时读取.

use crate::counting::{CrossingEvent, EventKind, TrackId};
use crate::error::{CounterError, Result};
use crate::{format_timedelta, format_timestamp, parse_timestamp};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOG_HEADER: [&str; 4] = ["ID", "Event", "Timestamp", "Duration"];

static DURATION_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+):(\d{2}):(\d{2})(?:\.\d+)?$").expect("duration pattern is valid")
});

/// 事件持久化接口
///
/// 写入失败只上报, 不回滚已经生效的计数与目标状态.
pub trait EventSink: Send + Sync {
    fn append(&self, event: &CrossingEvent) -> Result<()>;
}

/// 追加写入的CSV事件日志
#[derive(Clone, Debug)]
pub struct CsvEventLog {
    path: PathBuf,
}

impl CsvEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时创建并写入表头
    pub fn ensure_header(&self) -> Result<()> {
        let file = self.open_for_append()?;
        file.sync_all()?;
        Ok(())
    }

    fn open_for_append(&self) -> Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() == 0 {
            let mut writer = Self::writer(&mut file);
            writer.write_record(LOG_HEADER)?;
            writer.flush()?;
        }
        Ok(file)
    }

    fn writer<W: std::io::Write>(inner: W) -> csv::Writer<W> {
        csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::CRLF)
            .from_writer(inner)
    }

    /// 读取全部记录 (跳过表头, 忽略少于3列的行)
    pub fn read_records(&self) -> Result<Vec<LogRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.len() < 3 {
                continue;
            }
            records.push(LogRecord {
                id: row[0].to_string(),
                event: row[1].to_string(),
                timestamp: row[2].to_string(),
                duration: row.get(3).unwrap_or("").to_string(),
            });
        }
        Ok(records)
    }

    /// 整个日志按字节复制到目标路径
    pub fn export_to(&self, destination: &Path) -> Result<u64> {
        let bytes = fs::copy(&self.path, destination)?;
        log::info!("💾 日志已导出到 {} ({} 字节)", destination.display(), bytes);
        Ok(bytes)
    }
}

impl EventSink for CsvEventLog {
    fn append(&self, event: &CrossingEvent) -> Result<()> {
        let mut file = self.open_for_append()?;
        let duration = match event.kind {
            EventKind::Entry => String::new(),
            EventKind::Exit => event
                .duration_since_entry
                .map(format_timedelta)
                .unwrap_or_default(),
        };

        {
            let mut writer = Self::writer(&mut file);
            writer.write_record([
                event.identity.to_string(),
                event.kind.as_str().to_string(),
                format_timestamp(&event.timestamp),
                duration,
            ])?;
            writer.flush()?;
        }

        file.sync_data()
            .map_err(|e| CounterError::persist(format!("{}: {}", self.path.display(), e)))
    }
}

/// 日志中的一行 (保留原文)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub id: String,
    pub event: String,
    pub timestamp: String,
    pub duration: String,
}

impl LogRecord {
    pub fn identity(&self) -> Option<TrackId> {
        self.id.trim().parse().ok()
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event)
    }

    pub fn timestamp(&self) -> Option<DateTime<Local>> {
        parse_timestamp(&self.timestamp)
    }

    /// 查看器显示格式: `0:01:05.250000` → `0h 01m 05s`, 无法识别时原样返回
    pub fn display_duration(&self) -> String {
        match DURATION_TEXT.captures(self.duration.trim()) {
            Some(caps) => format!("{}h {}m {}s", &caps[1], &caps[2], &caps[3]),
            None => self.duration.clone(),
        }
    }
}
