use std::time::Duration;

use crate::error::ImageResult;

/// 像素通道的存储格式。HDR 格式由 reader 自己降转到 8-bit，引擎只
/// 上传 RGBA8。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PixelFormat {
    #[default]
    UInt8,
    UInt16,
    Float16,
    Float32,
}

/// 图像元信息，`open` 成功后有效。
#[derive(Clone, Copy, Debug, Default)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub num_channels: u32,
    pub num_mip_levels: u32,
    pub is_valid: bool,
    pub is_tiled: bool,
}

/// mipmapped 图像来源。
///
/// 实现必须线程安全：引擎以 `Arc<dyn ImageReader>` 持有 reader，打开和
/// 读取可能发生在任意 loader worker 上。
pub trait ImageReader: Send + Sync {
    /// 打开并读取头信息。重复调用应当是幂等的。
    fn open(&self) -> ImageResult<TextureInfo>;

    fn close(&self);

    fn is_open(&self) -> bool;

    /// 最近一次 `open` 得到的信息；未打开时 `is_valid == false`。
    fn info(&self) -> TextureInfo;

    /// 把指定 mip level 读进 `dest`。
    ///
    /// 数据按该 reader 的原生通道数紧密排布，`dest` 长度必须至少是
    /// `expected_width * expected_height * num_channels`。
    fn read_mip_level(&self, dest: &mut [u8], mip_level: u32, expected_width: u32, expected_height: u32) -> ImageResult<()>;

    /// 1×1 的 base color；不支持时返回 None。
    fn read_base_color(&self) -> Option<[f32; 4]> {
        None
    }

    /// 累计从来源读取的字节数。
    fn bytes_read(&self) -> u64;

    /// 累计花在读取上的时间。
    fn total_read_time(&self) -> Duration;

    /// 标识内容的哈希；两个哈希相同（且非 0）的 reader 被认为产出相同的
    /// 像素，引擎据此去重。0 表示“未知内容”，永远不参与去重。
    fn content_hash(&self) -> u64 {
        0
    }
}
