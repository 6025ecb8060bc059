use crate::backend::{GfxDevice, GfxSamplerHandle};
use crate::error::GfxResult;
use crate::tex_array::{GfxMipArray2D, GfxTexArray2D};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum GfxAddressMode {
    #[default]
    Wrap,
    Clamp,
    Mirror,
    Border,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum GfxFilterMode {
    Point,
    #[default]
    Linear,
}

/// sampler 配置。8-bit 输入固定以 normalized-float 读出。
#[derive(Clone, Copy, Debug)]
pub struct GfxSamplerDesc {
    pub address_mode: [GfxAddressMode; 2],
    pub filter_mode: GfxFilterMode,
    pub mip_filter_mode: GfxFilterMode,
    pub normalized_coords: bool,
    pub srgb: bool,
    /// 采样时允许的最大 mip level（含）。flat 纹理为 0。
    pub max_mip_clamp: u32,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            address_mode: [GfxAddressMode::Wrap; 2],
            filter_mode: GfxFilterMode::Linear,
            mip_filter_mode: GfxFilterMode::Linear,
            normalized_coords: true,
            srgb: false,
            max_mip_clamp: 0,
        }
    }
}

/// 纹理数组 + sampler 配置得到的采样句柄，drop 时销毁。
///
/// handle 本身只是 u64，可以放进 device 端的 handle table；wrapper 负责
/// 生命周期。sampler 引用底层数组，必须先于数组销毁。
pub struct GfxTexSampler {
    device: GfxDevice,
    handle: GfxSamplerHandle,
}

impl GfxTexSampler {
    pub fn new_flat(device: &GfxDevice, array: &GfxTexArray2D, desc: &GfxSamplerDesc) -> GfxResult<Self> {
        let handle = device.backend().create_sampler(array.raw(), desc)?;
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    pub fn new_mipmapped(device: &GfxDevice, array: &GfxMipArray2D, desc: &GfxSamplerDesc) -> GfxResult<Self> {
        let handle = device.backend().create_sampler(array.raw(), desc)?;
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> GfxSamplerHandle {
        self.handle
    }
}

impl Drop for GfxTexSampler {
    fn drop(&mut self) {
        self.device.backend().destroy_sampler(self.handle);
    }
}
