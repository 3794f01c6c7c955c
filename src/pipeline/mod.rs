/// 帧处理流水线 (Frame Pipeline)
///
/// 双线程架构, 通过单槽位交接:
/// - Producer: 采集 → 检测 → 越线判定 → 写日志 → 标注 (独立线程)
/// - Consumer: 按显示节拍取出最新标注帧 (GUI主线程或独立线程)
///
/// 槽位最多保存一帧, 生产者永不阻塞, 显示可能跳帧但不会积压.
pub mod annotate;
pub mod consumer;
pub mod producer;

pub use annotate::Annotator;
pub use consumer::{Consumer, FrameSink, PngSnapshotSink};
pub use producer::{CycleReport, Producer, ProducerParts};

use crate::counting::CounterSnapshot;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ========== 帧类型 ==========

/// 采集帧 (采集 → 检测)
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbaImage,
    pub frame_id: u64, // 本次运行内的帧序号, 从0开始
}

impl Frame {
    pub fn new(image: RgbaImage, frame_id: u64) -> Self {
        Self { image, frame_id }
    }
}

/// 标注帧 (生产者 → 显示)
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub image: RgbaImage,
    pub frame_id: u64,
    pub counters: CounterSnapshot,
}

// ========== 运行令牌 ==========

/// 单次运行的运行标志. 每次 start 创建新令牌, 旧线程看到的是自己那份,
/// stop 之后即使还没退出也不会被下一次 start 重新激活.
#[derive(Clone, Debug)]
pub struct RunToken(Arc<AtomicBool>);

impl RunToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

// ========== 单槽位交接 ==========

/// 槽位已满时的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// 替换未取走的旧帧, 显示总是最新画面
    #[default]
    KeepNewest,
    /// 保留未取走的旧帧, 丢弃新帧
    KeepPending,
}

/// 一次投递的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepositOutcome {
    /// 槽位为空, 直接放入
    Stored,
    /// 替换了未被取走的旧帧
    Replaced,
    /// 槽位已满, 新帧被丢弃
    Dropped,
}

/// 容量为1的非阻塞交接槽位, 可克隆后分别交给生产者与消费者
#[derive(Clone, Debug)]
pub struct FrameSlot {
    tx: Sender<AnnotatedFrame>,
    rx: Receiver<AnnotatedFrame>,
    policy: SlotPolicy,
}

impl FrameSlot {
    pub fn new(policy: SlotPolicy) -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx, policy }
    }

    /// 放入一帧, 从不阻塞
    pub fn deposit(&self, frame: AnnotatedFrame) -> DepositOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => DepositOutcome::Stored,
            Err(TrySendError::Full(frame)) => match self.policy {
                SlotPolicy::KeepPending => DepositOutcome::Dropped,
                SlotPolicy::KeepNewest => {
                    let replaced = self.rx.try_recv().is_ok();
                    match self.tx.try_send(frame) {
                        Ok(()) if replaced => DepositOutcome::Replaced,
                        Ok(()) => DepositOutcome::Stored,
                        // 只有一个生产者, 不会再次满; 以防万一按丢弃处理
                        Err(_) => DepositOutcome::Dropped,
                    }
                }
            },
            Err(TrySendError::Disconnected(_)) => DepositOutcome::Dropped,
        }
    }

    /// 取出当前帧 (没有则返回None), 从不阻塞
    pub fn take(&self) -> Option<AnnotatedFrame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// 丢弃残留帧 (新一次运行开始前)
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new(SlotPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotated(id: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            image: RgbaImage::new(2, 2),
            frame_id: id,
            counters: CounterSnapshot::default(),
        }
    }

    #[test]
    fn test_keep_newest_replaces_unread_frame() {
        let slot = FrameSlot::new(SlotPolicy::KeepNewest);
        assert_eq!(slot.deposit(annotated(1)), DepositOutcome::Stored);
        assert_eq!(slot.deposit(annotated(2)), DepositOutcome::Replaced);
        assert_eq!(slot.take().map(|f| f.frame_id), Some(2));
        // 没有第三帧时显示保持不变
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_keep_pending_drops_new_frame() {
        let slot = FrameSlot::new(SlotPolicy::KeepPending);
        assert_eq!(slot.deposit(annotated(1)), DepositOutcome::Stored);
        assert_eq!(slot.deposit(annotated(2)), DepositOutcome::Dropped);
        assert_eq!(slot.take().map(|f| f.frame_id), Some(1));
        assert_eq!(slot.deposit(annotated(3)), DepositOutcome::Stored);
    }

    #[test]
    fn test_clones_share_one_slot() {
        let producer_side = FrameSlot::default();
        let consumer_side = producer_side.clone();
        producer_side.deposit(annotated(7));
        assert!(!consumer_side.is_empty());
        consumer_side.clear();
        assert!(producer_side.take().is_none());
    }

    #[test]
    fn test_run_token_is_per_run() {
        let old = RunToken::new();
        let old_clone = old.clone();
        old.cancel();
        let new = RunToken::new();
        assert!(!old_clone.is_active());
        assert!(new.is_active());
    }

    #[test]
    fn test_policy_json_names() {
        assert_eq!(
            serde_json::to_string(&SlotPolicy::KeepPending).unwrap(),
            "\"keep_pending\""
        );
    }
}
