/// 越线计数系统 (Crossing Counting System)
///
/// 运行在生产者线程内:
/// - Store:     目标状态表 (每个ID一条记录)
/// - Evaluator: 越线判定 (Entry/Exit 状态机)
pub mod evaluator;
pub mod store;
pub mod types;

pub use evaluator::CrossingEvaluator;
pub use store::TrackStateStore;
pub use types::{
    CounterSnapshot, Counters, CrossingEvent, EventKind, LineConfig, LinePositions, TrackId,
    TrackState,
};
