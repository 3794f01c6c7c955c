/// 检测系统接口 (Detection System)
///
/// 外部检测+追踪器: 输入一帧, 输出当前帧的 (追踪ID, 检测框) 列表.
/// 追踪ID需在同一目标可见期间保持稳定, 本系统不做重识别.
pub mod scripted;

pub use scripted::ScriptedDetector;

use crate::counting::TrackId;
use crate::pipeline::Frame;
use serde::{Deserialize, Serialize};

/// 检测框 (Detection bounding box), JSON中为 `[x1, y1, x2, y2]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 中心点x坐标, 截断为整数像素
    pub fn center_x(&self) -> i32 {
        ((self.x1 + self.x2) / 2.0) as i32
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 带追踪ID的检测结果
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedBox {
    #[serde(rename = "id")]
    pub identity: TrackId,
    #[serde(rename = "box")]
    pub bbox: BBox,
}

/// 检测+追踪器
pub trait Detector: Send {
    fn detect_and_track(&mut self, frame: &Frame) -> anyhow::Result<Vec<TrackedBox>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect_and_track(&mut self, frame: &Frame) -> anyhow::Result<Vec<TrackedBox>> {
        (**self).detect_and_track(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_truncates() {
        assert_eq!(BBox::new(10.0, 0.0, 21.0, 5.0).center_x(), 15);
        assert_eq!(BBox::new(99.4, 0.0, 100.4, 5.0).center_x(), 99);
    }
}
