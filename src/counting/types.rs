/// 越线计数数据结构定义
/// Data structures for line-crossing counting
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// 追踪器分配的目标ID
pub type TrackId = u32;

// ========== 单目标状态 ==========

/// 单个目标的越线状态
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackState {
    pub identity: TrackId,
    /// 上一次观测的中心点x坐标 (首次观测前为None)
    pub last_x: Option<i32>,
    /// 已进入 (Entry 之后, Exit 之前)
    pub entered: bool,
    /// 已离开 (Exit 之后, 下一次 Entry 之前)
    pub exited: bool,
    pub entry_time: Option<DateTime<Local>>,
    pub exit_time: Option<DateTime<Local>>,
    /// 最近一次完整 Entry→Exit 周期的停留时长
    pub duration: Option<chrono::Duration>,
}

impl TrackState {
    pub fn new(identity: TrackId) -> Self {
        Self {
            identity,
            ..Default::default()
        }
    }

    /// 标注显示的时长: 已完成周期的时长优先, 否则为进入后的实时时长
    pub fn display_duration(&self, now: DateTime<Local>) -> Option<chrono::Duration> {
        match (self.duration, self.entered, self.entry_time) {
            (Some(d), _, _) => Some(d),
            (None, true, Some(entry)) => Some(now - entry),
            _ => None,
        }
    }
}

// ========== 越线事件 ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Entry,
    Exit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entry => "Entry",
            EventKind::Exit => "Exit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Entry" => Some(EventKind::Entry),
            "Exit" => Some(EventKind::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 越线事件 (只追加, 不可变)
#[derive(Clone, Debug, PartialEq)]
pub struct CrossingEvent {
    pub identity: TrackId,
    pub kind: EventKind,
    pub timestamp: DateTime<Local>,
    /// 仅 Exit 事件携带
    pub duration_since_entry: Option<chrono::Duration>,
}

// ========== 计数器 ==========

/// 进出计数 (只增不减, 生产者线程写, 其他线程读)
#[derive(Debug, Default)]
pub struct Counters {
    entries: AtomicU64,
    exits: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub entries: u64,
    pub exits: u64,
}

impl Counters {
    pub fn record(&self, kind: EventKind) {
        match kind {
            EventKind::Entry => self.entries.fetch_add(1, Ordering::Relaxed),
            EventKind::Exit => self.exits.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn exits(&self) -> u64 {
        self.exits.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            entries: self.entries(),
            exits: self.exits(),
        }
    }
}

// ========== 计数线配置 ==========

/// 两条竖直计数线的位置 (像素x坐标)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinePositions {
    pub entry_x: i32,
    pub exit_x: i32,
}

impl LinePositions {
    /// 默认: 进入线在 1/3 宽度, 离开线在 2/3 宽度
    pub fn for_width(width: u32) -> Self {
        let w = width as i32;
        Self {
            entry_x: w / 3,
            exit_x: 2 * w / 3,
        }
    }
}

/// 控制面板写, 生产者每帧读一次. 单值原子读写, 允许一帧的延迟.
#[derive(Debug)]
pub struct LineConfig {
    entry_x: AtomicI32,
    exit_x: AtomicI32,
    frame_width: AtomicI32,
}

impl LineConfig {
    pub fn new(lines: LinePositions, frame_width: u32) -> Self {
        let config = Self {
            entry_x: AtomicI32::new(0),
            exit_x: AtomicI32::new(0),
            frame_width: AtomicI32::new(frame_width as i32),
        };
        config.set_entry_line(lines.entry_x);
        config.set_exit_line(lines.exit_x);
        config
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width.load(Ordering::Relaxed).max(0) as u32
    }

    /// 协商后的画面宽度变化时, 重新把两条线限制在 [0, width] 内
    pub fn set_frame_width(&self, width: u32) {
        self.frame_width.store(width as i32, Ordering::Relaxed);
        let current = self.load();
        self.set_entry_line(current.entry_x);
        self.set_exit_line(current.exit_x);
    }

    pub fn set_entry_line(&self, x: i32) {
        let x = x.clamp(0, self.frame_width() as i32);
        self.entry_x.store(x, Ordering::Relaxed);
    }

    pub fn set_exit_line(&self, x: i32) {
        let x = x.clamp(0, self.frame_width() as i32);
        self.exit_x.store(x, Ordering::Relaxed);
    }

    pub fn load(&self) -> LinePositions {
        LinePositions {
            entry_x: self.entry_x.load(Ordering::Relaxed),
            exit_x: self.exit_x.load(Ordering::Relaxed),
        }
    }
}
