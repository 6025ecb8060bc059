use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ImageError, ImageResult};
use crate::reader::{ImageReader, PixelFormat, TextureInfo};

/// 程序化棋盘格来源。
///
/// 不碰磁盘，尺寸、通道数和内容哈希都由调用方指定，demo 和引擎的
/// 去重/加载测试都用它当可控的纹理来源。
pub struct CheckerImageReader {
    width: u32,
    height: u32,
    channels: u32,
    cell_size: u32,
    color_a: [u8; 4],
    color_b: [u8; 4],
    hash: u64,
    open: AtomicBool,
    bytes_read: AtomicU64,
    read_time_ns: AtomicU64,
}

impl CheckerImageReader {
    /// `channels` 取 1/3/4；`hash` 传 0 表示该来源不参与内容去重。
    pub fn new(width: u32, height: u32, channels: u32, cell_size: u32, hash: u64) -> Self {
        assert!(matches!(channels, 1 | 3 | 4), "checker reader supports 1/3/4 channels");
        Self {
            width,
            height,
            channels,
            cell_size: cell_size.max(1),
            color_a: [230, 230, 230, 255],
            color_b: [40, 40, 40, 255],
            hash,
            open: AtomicBool::new(false),
            bytes_read: AtomicU64::new(0),
            read_time_ns: AtomicU64::new(0),
        }
    }

    pub fn with_colors(mut self, color_a: [u8; 4], color_b: [u8; 4]) -> Self {
        self.color_a = color_a;
        self.color_b = color_b;
        self
    }

    fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        if ((x / self.cell_size) + (y / self.cell_size)) % 2 == 0 {
            self.color_a
        } else {
            self.color_b
        }
    }

    fn make_info(&self) -> TextureInfo {
        TextureInfo {
            width: self.width,
            height: self.height,
            format: PixelFormat::UInt8,
            num_channels: self.channels,
            num_mip_levels: 1,
            is_valid: true,
            is_tiled: false,
        }
    }
}

impl ImageReader for CheckerImageReader {
    fn open(&self) -> ImageResult<TextureInfo> {
        self.open.store(true, Ordering::Relaxed);
        Ok(self.make_info())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn info(&self) -> TextureInfo {
        if self.is_open() {
            self.make_info()
        } else {
            TextureInfo::default()
        }
    }

    fn read_mip_level(&self, dest: &mut [u8], mip_level: u32, expected_width: u32, expected_height: u32) -> ImageResult<()> {
        if mip_level != 0 {
            return Err(ImageError::BadMipLevel(mip_level));
        }
        if !self.is_open() {
            return Err(ImageError::NotOpen);
        }
        if expected_width != self.width || expected_height != self.height {
            return Err(ImageError::BadDimensions);
        }
        let needed = (self.width * self.height * self.channels) as usize;
        if dest.len() < needed {
            return Err(ImageError::BadDimensions);
        }

        let start = Instant::now();
        let mut offset = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                let texel = self.texel(x, y);
                match self.channels {
                    1 => {
                        dest[offset] = texel[0];
                    }
                    3 => {
                        dest[offset..offset + 3].copy_from_slice(&texel[..3]);
                    }
                    _ => {
                        dest[offset..offset + 4].copy_from_slice(&texel);
                    }
                }
                offset += self.channels as usize;
            }
        }
        self.bytes_read.fetch_add(needed as u64, Ordering::Relaxed);
        self.read_time_ns.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn read_base_color(&self) -> Option<[f32; 4]> {
        // 两种格子各占一半
        let mut color = [0.0f32; 4];
        for c in 0..4 {
            color[c] = (self.color_a[c] as f32 + self.color_b[c] as f32) / 2.0 / 255.0;
        }
        Some(color)
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    fn total_read_time(&self) -> Duration {
        Duration::from_nanos(self.read_time_ns.load(Ordering::Relaxed))
    }

    fn content_hash(&self) -> u64 {
        self.hash
    }
}
