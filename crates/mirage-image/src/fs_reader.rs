use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ImageError, ImageResult};
use crate::reader::{ImageReader, PixelFormat, TextureInfo};

#[derive(Default)]
struct FsState {
    open: bool,
    info: TextureInfo,
    /// 解码结果缓存。close 时丢弃，驱逐后重新加载会再解码一次。
    decoded: Option<image::RgbaImage>,
}

/// 文件系统图像来源，解码交给 `image` crate。
///
/// 所有格式统一转成 RGBA8，因此对外报告 4 通道；只提供 level 0，
/// 其余 mip 由引擎下采样合成。
pub struct FsImageReader {
    path: PathBuf,
    state: Mutex<FsState>,
    bytes_read: AtomicU64,
    read_time_ns: AtomicU64,
}

impl FsImageReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FsState::default()),
            bytes_read: AtomicU64::new(0),
            read_time_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 只读头信息拿尺寸，不解码像素。纹理创建时用它填充元数据。
    pub fn probe(path: &Path) -> ImageResult<(u32, u32, u32)> {
        let reader = image::ImageReader::open(path).map_err(|e| Self::map_io_error(path, e))?;
        let reader = reader.with_guessed_format().map_err(|e| Self::map_io_error(path, e))?;
        let (w, h) = reader.into_dimensions().map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
        Ok((w, h, 4))
    }

    fn map_io_error(path: &Path, err: std::io::Error) -> ImageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ImageError::FileNotFound(path.to_path_buf())
        } else {
            ImageError::DecodeFailed(err.to_string())
        }
    }

    fn decode_locked(&self, state: &mut FsState) -> ImageResult<()> {
        if state.decoded.is_some() {
            return Ok(());
        }
        let start = Instant::now();
        let img = image::open(&self.path).map_err(|e| match e {
            image::ImageError::IoError(io) => Self::map_io_error(&self.path, io),
            other => ImageError::DecodeFailed(other.to_string()),
        })?;
        let rgba = img.into_rgba8();

        let file_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(rgba.len() as u64);
        self.bytes_read.fetch_add(file_bytes, Ordering::Relaxed);
        self.read_time_ns.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

        state.decoded = Some(rgba);
        Ok(())
    }
}

impl ImageReader for FsImageReader {
    fn open(&self) -> ImageResult<TextureInfo> {
        let mut state = self.state.lock();
        if state.open {
            return Ok(state.info);
        }
        let (width, height, channels) = Self::probe(&self.path)?;
        state.info = TextureInfo {
            width,
            height,
            format: PixelFormat::UInt8,
            num_channels: channels,
            num_mip_levels: 1,
            is_valid: true,
            is_tiled: false,
        };
        state.open = true;
        Ok(state.info)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.decoded = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn info(&self) -> TextureInfo {
        self.state.lock().info
    }

    fn read_mip_level(&self, dest: &mut [u8], mip_level: u32, expected_width: u32, expected_height: u32) -> ImageResult<()> {
        if mip_level != 0 {
            return Err(ImageError::BadMipLevel(mip_level));
        }
        let mut state = self.state.lock();
        if !state.open {
            return Err(ImageError::NotOpen);
        }
        self.decode_locked(&mut state)?;

        let rgba = state.decoded.as_ref().unwrap();
        if rgba.width() != expected_width || rgba.height() != expected_height {
            return Err(ImageError::BadDimensions);
        }
        let src = rgba.as_raw();
        if dest.len() < src.len() {
            return Err(ImageError::BadDimensions);
        }
        dest[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn read_base_color(&self) -> Option<[f32; 4]> {
        let state = self.state.lock();
        let rgba = state.decoded.as_ref()?;
        let texels = (rgba.width() * rgba.height()) as f64;
        if texels == 0.0 {
            return None;
        }
        let mut sum = [0.0f64; 4];
        for px in rgba.pixels() {
            for c in 0..4 {
                sum[c] += px.0[c] as f64;
            }
        }
        Some([
            (sum[0] / texels / 255.0) as f32,
            (sum[1] / texels / 255.0) as f32,
            (sum[2] / texels / 255.0) as f32,
            (sum[3] / texels / 255.0) as f32,
        ])
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    fn total_read_time(&self) -> Duration {
        Duration::from_nanos(self.read_time_ns.load(Ordering::Relaxed))
    }

    fn content_hash(&self) -> u64 {
        // FNV-1a over the path string；同一路径的两个 reader 会命中引擎的
        // 内容去重。0 保留给“未知”，冲突到 0 时挪到 1。
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.path.to_string_lossy().as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        if hash == 0 {
            1
        } else {
            hash
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ImageReader as _;

    fn temp_png(name: &str, width: u32, height: u32) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mirage-fs-reader-{}-{}", std::process::id(), name));
        let mut img = image::RgbaImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = image::Rgba([x as u8, y as u8, 7, 255]);
        }
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();
        path
    }

    #[test]
    fn open_and_read_roundtrip() {
        let path = temp_png("roundtrip.png", 8, 4);
        let reader = FsImageReader::new(&path);

        let info = reader.open().unwrap();
        assert!(info.is_valid);
        assert_eq!((info.width, info.height, info.num_channels), (8, 4, 4));

        let mut pixels = vec![0u8; 8 * 4 * 4];
        reader.read_mip_level(&mut pixels, 0, 8, 4).unwrap();
        // (3, 2) 这个像素
        let idx = (2 * 8 + 3) * 4;
        assert_eq!(&pixels[idx..idx + 4], &[3, 2, 7, 255]);
        assert!(reader.bytes_read() > 0);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let reader = FsImageReader::new("/definitely/not/here.png");
        match reader.open() {
            Err(ImageError::FileNotFound(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn wrong_level_and_closed_reader_fail() {
        let path = temp_png("levels.png", 2, 2);
        let reader = FsImageReader::new(&path);
        reader.open().unwrap();

        let mut buf = vec![0u8; 2 * 2 * 4];
        assert_eq!(reader.read_mip_level(&mut buf, 1, 1, 1), Err(ImageError::BadMipLevel(1)));

        reader.close();
        assert_eq!(reader.read_mip_level(&mut buf, 0, 2, 2), Err(ImageError::NotOpen));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn content_hash_tracks_path() {
        let a = FsImageReader::new("a.png");
        let a2 = FsImageReader::new("a.png");
        let b = FsImageReader::new("b.png");
        assert_eq!(a.content_hash(), a2.content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), 0);
    }
}
