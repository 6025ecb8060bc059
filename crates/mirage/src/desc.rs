use mirage_gfx::{GfxAddressMode, GfxFilterMode};

/// 驱逐优先级。分层 LRU：Low 先走，High 在所有 Normal 之后，
/// KeepResident 永不被驱逐（显式 unload 除外）。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum EvictionPriority {
    Low,
    #[default]
    Normal,
    High,
    KeepResident,
}

/// 纹理的采样与加载配置，创建时给定。
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc {
    pub address_mode: [GfxAddressMode; 2],
    pub filter_mode: GfxFilterMode,
    pub mip_filter_mode: GfxFilterMode,
    pub normalized_coords: bool,
    pub srgb: bool,
    pub generate_mipmaps: bool,
    /// mip level 数上限，0 = 生成完整链。
    pub max_mip_level: u32,
    pub eviction_priority: EvictionPriority,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            address_mode: [GfxAddressMode::Wrap; 2],
            filter_mode: GfxFilterMode::Linear,
            mip_filter_mode: GfxFilterMode::Linear,
            normalized_coords: true,
            srgb: false,
            generate_mipmaps: true,
            max_mip_level: 0,
            eviction_priority: EvictionPriority::Normal,
        }
    }
}
