//! 画面标注: 计数线 + 检测框 + ID/时长标签
//!
//! 进入线绿色, 离开线红色, 检测框黄色, 标签白色. 没有加载字体时只画线和框.

use crate::counting::{LinePositions, TrackId};
use crate::detect::BBox;
use crate::format_hms;
use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

pub const ENTRY_LINE_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const EXIT_LINE_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const BOX_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

const THICKNESS: i32 = 2;
const LABEL_OFFSET_Y: i32 = 40;
const TEXT_SCALE: f32 = 16.0;

#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// 从字体文件创建, 加载失败时退化为不画文字
    pub fn from_font_path(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => {
                log::info!("🔤 标注字体已加载: {}", path.display());
                Self::new(Some(font))
            }
            Err(e) => {
                log::warn!("⚠️ 字体加载失败 {}: {}, 标签将不显示", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 两条竖直计数线, 贯穿整个画面高度
    pub fn draw_lines(&self, img: &mut RgbaImage, lines: LinePositions) {
        let h = img.height() as f32;
        for (x, color) in [
            (lines.entry_x, ENTRY_LINE_COLOR),
            (lines.exit_x, EXIT_LINE_COLOR),
        ] {
            for dx in 0..THICKNESS {
                let x = (x + dx) as f32;
                draw_line_segment_mut(img, (x, 0.0), (x, h), color);
            }
        }
    }

    /// 检测框与标签: 第一行 `ID: n`, 有时长时第二行 `Hh Mm Ss`
    pub fn draw_track(
        &self,
        img: &mut RgbaImage,
        bbox: &BBox,
        identity: TrackId,
        duration: Option<chrono::Duration>,
    ) {
        let x = bbox.x1 as i32;
        let y = bbox.y1 as i32;
        let w = bbox.width().max(1.0) as u32;
        let h = bbox.height().max(1.0) as u32;
        for offset in 0..THICKNESS {
            let rect = Rect::at(x - offset, y - offset)
                .of_size(w + (offset * 2) as u32, h + (offset * 2) as u32);
            draw_hollow_rect_mut(img, rect, BOX_COLOR);
        }

        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(TEXT_SCALE);
        let top = y - LABEL_OFFSET_Y;
        draw_text_mut(img, TEXT_COLOR, x, top, scale, font, &format!("ID: {}", identity));
        if let Some(d) = duration {
            let line_height = TEXT_SCALE as i32 + 2;
            draw_text_mut(img, TEXT_COLOR, x, top + line_height, scale, font, &format_hms(d));
        }
    }

    /// 未运行时的预览: 黑底 + 计数线
    pub fn idle_preview(&self, width: u32, height: u32, lines: LinePositions) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
        self.draw_lines(&mut img, lines);
        img
    }
}
