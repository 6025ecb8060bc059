use crate::backend::GfxDevice;
use crate::error::GfxResult;

/// flat 2D RGBA8 数组（无 mip）。
pub struct GfxTexArray2D {
    device: GfxDevice,
    raw: u64,
    width: u32,
    height: u32,
}

impl GfxTexArray2D {
    pub fn new(device: &GfxDevice, width: u32, height: u32) -> GfxResult<Self> {
        let raw = device.backend().alloc_tex2d(width, height)?;
        Ok(Self {
            device: device.clone(),
            raw,
            width,
            height,
        })
    }

    pub fn upload(&self, pixels: &[u8]) -> GfxResult<()> {
        self.device.backend().upload_tex2d_level(self.raw, 0, pixels, self.width, self.height)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        self.raw
    }
}

impl Drop for GfxTexArray2D {
    fn drop(&mut self) {
        self.device.backend().free_tex2d(self.raw);
    }
}

/// mipmapped 2D RGBA8 数组。每个 level 是独立的 sub-array，按 level
/// 逐层上传。
pub struct GfxMipArray2D {
    device: GfxDevice,
    raw: u64,
    width: u32,
    height: u32,
    levels: u32,
}

impl GfxMipArray2D {
    pub fn new(device: &GfxDevice, width: u32, height: u32, levels: u32) -> GfxResult<Self> {
        let raw = device.backend().alloc_mip_tex2d(width, height, levels)?;
        Ok(Self {
            device: device.clone(),
            raw,
            width,
            height,
            levels,
        })
    }

    /// `width`/`height` 必须是该 level 的实际尺寸（base >> level，最小 1）。
    pub fn upload_level(&self, level: u32, pixels: &[u8], width: u32, height: u32) -> GfxResult<()> {
        self.device.backend().upload_tex2d_level(self.raw, level, pixels, width, height)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn levels(&self) -> u32 {
        self.levels
    }

    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        self.raw
    }
}

impl Drop for GfxMipArray2D {
    fn drop(&mut self) {
        self.device.backend().free_tex2d(self.raw);
    }
}
