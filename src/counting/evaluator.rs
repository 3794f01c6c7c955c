/// 越线判定
/// Crossing evaluator: per-identity Entry/Exit state machine
use super::store::TrackStateStore;
use super::types::{Counters, CrossingEvent, EventKind, LinePositions, TrackId};
use chrono::{DateTime, Local};
use std::sync::Arc;

/// 越线判定器
///
/// 只统计向右移动: 中心点从进入线左侧越过进入线 (且仍在离开线左侧) 记 Entry,
/// 已进入的目标越过离开线记 Exit. 两个判定都使用本次更新前的位置,
/// 同一次调用可以先后触发 Entry 和 Exit.
pub struct CrossingEvaluator {
    store: TrackStateStore,
    counters: Arc<Counters>,
}

impl CrossingEvaluator {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            store: TrackStateStore::new(),
            counters,
        }
    }

    pub fn store(&self) -> &TrackStateStore {
        &self.store
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// 处理一次观测, 返回本次触发的事件 (0~2个, Entry在前)
    pub fn evaluate(
        &mut self,
        identity: TrackId,
        center_x: i32,
        lines: LinePositions,
        now: DateTime<Local>,
    ) -> Vec<CrossingEvent> {
        let state = self.store.get_or_create(identity);
        let mut fired = Vec::new();

        if let Some(last_x) = state.last_x {
            // 进入: last < entry <= center < exit (进入线在离开线右侧时永远不成立)
            if !state.entered
                && last_x < lines.entry_x
                && lines.entry_x <= center_x
                && center_x < lines.exit_x
            {
                state.entered = true;
                state.exited = false;
                state.entry_time = Some(now);
                self.counters.record(EventKind::Entry);
                fired.push(CrossingEvent {
                    identity,
                    kind: EventKind::Entry,
                    timestamp: now,
                    duration_since_entry: None,
                });
            }

            // 离开: last < exit <= center
            if state.entered && !state.exited && last_x < lines.exit_x && lines.exit_x <= center_x {
                state.exited = true;
                state.entered = false;
                state.exit_time = Some(now);
                let duration = state.entry_time.map(|entry| now - entry);
                if duration.is_some() {
                    state.duration = duration;
                }
                self.counters.record(EventKind::Exit);
                fired.push(CrossingEvent {
                    identity,
                    kind: EventKind::Exit,
                    timestamp: now,
                    duration_since_entry: duration,
                });
            }
        }

        state.last_x = Some(center_x);
        fired
    }
}
