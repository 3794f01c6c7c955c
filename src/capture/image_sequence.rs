//! 图片目录回放 - 按文件名排序逐帧读取, 用于离线复现

use super::{CaptureSource, FramePacer, FrameStream};
use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    fps: Option<f32>,
    looping: bool,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fps: None,
            looping: false,
        }
    }

    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("无法读取目录 {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl CaptureSource for ImageSequenceSource {
    fn open(&mut self) -> Result<Box<dyn FrameStream>> {
        let files = Self::list_frames(&self.dir)?;
        let Some(first) = files.first() else {
            bail!("目录中没有图片: {}", self.dir.display());
        };
        let (width, height) = image::image_dimensions(first)
            .with_context(|| format!("无法读取图片尺寸 {}", first.display()))?;

        log::info!(
            "🖼️ 图片序列: {} 帧, {}x{}",
            files.len(),
            width,
            height
        );

        Ok(Box::new(ImageSequenceStream {
            files,
            cursor: 0,
            looping: self.looping,
            width,
            height,
            pacer: FramePacer::new(self.fps),
        }))
    }

    fn describe(&self) -> String {
        format!("images {}", self.dir.display())
    }
}

struct ImageSequenceStream {
    files: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    width: u32,
    height: u32,
    pacer: FramePacer,
}

impl FrameStream for ImageSequenceStream {
    fn read(&mut self) -> Result<RgbaImage> {
        if self.cursor >= self.files.len() {
            if !self.looping {
                bail!("图片序列已结束");
            }
            self.cursor = 0;
        }
        self.pacer.wait();

        let path = &self.files[self.cursor];
        self.cursor += 1;
        let img = image::open(path)
            .with_context(|| format!("解码失败 {}", path.display()))?
            .to_rgba8();

        // 尺寸不一致时缩放到协商分辨率
        if img.dimensions() != (self.width, self.height) {
            return Ok(image::imageops::resize(
                &img,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            ));
        }
        Ok(img)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        self.cursor = self.files.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(8, 6, image::Rgba([10, 0, 0, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbaImage::from_pixel(8, 6, image::Rgba([20, 0, 0, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let mut source = ImageSequenceSource::new(dir.path());
        let mut stream = source.open().unwrap();
        assert_eq!(stream.resolution(), (8, 6));
        assert_eq!(stream.read().unwrap().get_pixel(0, 0)[0], 20);
        assert_eq!(stream.read().unwrap().get_pixel(0, 0)[0], 10);
        assert!(stream.read().is_err());
    }

    #[test]
    fn test_empty_dir_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::new(dir.path()).open().is_err());
    }
}
