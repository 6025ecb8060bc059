use bytemuck::{Pod, Zeroable};

/// 传给 kernel 的 device 端上下文。
///
/// 布局是 host/device 的 ABI：七个字段按此顺序排列，五个 64 位 device
/// 指针加两个 32 位容量，handle 是 64 位不透明整数。指针在引擎生命期内
/// 稳定，应用可以只取一次。
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DeviceContext {
    /// residency bitmap，每纹理一个 bit，u32 word 排布。
    pub resident_flags: u64,
    /// handle table，按 id 索引的 sampler handle，0 = 未驻留。
    pub tex_handles: u64,
    /// request ring 的 id 数组。
    pub request_ids: u64,
    /// ring 的原子计数。
    pub request_count: u64,
    /// overflow 标记（u32，非 0 即溢出）。
    pub request_overflow: u64,
    pub max_textures: u32,
    pub max_requests: u32,
}

/// ring 统计的回读布局：count 在偏移 0，overflow 在偏移 4，二者共享
/// 一个 8 字节的 device 分配。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RequestStats {
    pub count: u32,
    pub overflow: u32,
}
