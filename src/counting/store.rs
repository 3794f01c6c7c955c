use super::types::{TrackId, TrackState};
use std::collections::HashMap;

/// 目标状态表
///
/// 每个追踪ID一条记录, 首次观测时惰性创建, 会话期间不删除
/// (目标离开画面后依然保留). 内存随会话内出现过的ID数量增长.
#[derive(Debug, Default)]
pub struct TrackStateStore {
    tracks: HashMap<TrackId, TrackState>,
}

impl TrackStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, identity: TrackId) -> &mut TrackState {
        self.tracks
            .entry(identity)
            .or_insert_with(|| TrackState::new(identity))
    }

    pub fn get(&self, identity: TrackId) -> Option<&TrackState> {
        self.tracks.get(&identity)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 按ID排序的状态副本
    pub fn snapshot(&self) -> Vec<TrackState> {
        let mut states: Vec<TrackState> = self.tracks.values().cloned().collect();
        states.sort_by_key(|s| s.identity);
        states
    }
}
