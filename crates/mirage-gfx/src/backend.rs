use std::sync::Arc;

use crate::error::GfxResult;
use crate::sampler::GfxSamplerDesc;

/// 不透明的 sampler handle，device 端按 id 查表后直接用它采样。
///
/// 0 保留为 null（未驻留）。
pub type GfxSamplerHandle = u64;

pub const NULL_SAMPLER_HANDLE: GfxSamplerHandle = 0;

/// GPU 后端接口。
///
/// stream / event / 纹理数组使用后端分配的 u64 原始 id；device 内存用
/// device 地址表示（对 [`crate::HostBackend`] 来说就是 host 地址，因此
/// 引擎的 device-contract 模拟可以直接对它做原子操作）。
///
/// 所有方法都必须线程安全；异步拷贝遵循 stream 顺序语义：同一 stream 上
/// 先入队的操作先完成，`sync_stream` 返回后该 stream 上所有已入队操作
/// 都已完成。
pub trait GfxBackend: Send + Sync {
    // ---- device 内存 ----

    /// 分配 device 内存，返回稳定的 device 地址。内容清零。
    fn alloc_device(&self, bytes: usize) -> GfxResult<u64>;
    fn free_device(&self, ptr: u64);

    fn memset_async(&self, dst: u64, value: u8, bytes: usize, stream: u64) -> GfxResult<()>;
    fn memcpy_h2d_async(&self, dst: u64, src: *const u8, bytes: usize, stream: u64) -> GfxResult<()>;
    fn memcpy_d2h_async(&self, dst: *mut u8, src: u64, bytes: usize, stream: u64) -> GfxResult<()>;

    // ---- pinned host 内存 ----

    /// 分配 page-locked host 内存，至少 16 字节对齐（mirror 要按 u64 访问）。
    fn alloc_pinned(&self, bytes: usize) -> GfxResult<*mut u8>;
    fn free_pinned(&self, ptr: *mut u8);

    // ---- stream / event ----

    fn create_stream(&self) -> GfxResult<u64>;
    fn destroy_stream(&self, stream: u64);
    fn sync_stream(&self, stream: u64) -> GfxResult<()>;

    /// 创建不带 timing 的 event。
    fn create_event(&self) -> GfxResult<u64>;
    fn destroy_event(&self, event: u64);
    fn record_event(&self, event: u64, stream: u64) -> GfxResult<()>;
    fn stream_wait_event(&self, stream: u64, event: u64) -> GfxResult<()>;
    fn sync_event(&self, event: u64) -> GfxResult<()>;

    // ---- 纹理数组（RGBA8）----

    /// flat 2D 数组，等价于 level 数为 1 的 mip 数组。
    fn alloc_tex2d(&self, width: u32, height: u32) -> GfxResult<u64>;
    fn alloc_mip_tex2d(&self, width: u32, height: u32, levels: u32) -> GfxResult<u64>;
    fn free_tex2d(&self, array: u64);

    /// 上传一个 mip level。`pixels` 是紧密排布的 RGBA8，长度必须是
    /// `width * height * 4`，尺寸必须与该 level 的实际尺寸一致。
    fn upload_tex2d_level(&self, array: u64, level: u32, pixels: &[u8], width: u32, height: u32) -> GfxResult<()>;

    // ---- sampler ----

    fn create_sampler(&self, array: u64, desc: &GfxSamplerDesc) -> GfxResult<GfxSamplerHandle>;
    fn destroy_sampler(&self, handle: GfxSamplerHandle);
}

/// 后端入口的轻量共享句柄。
///
/// 所有资源 wrapper 都持有一份 clone，相当于共享一套设备函数指针；
/// loader worker 会跨线程使用，所以用 `Arc` 而不是 `Rc`。
#[derive(Clone)]
pub struct GfxDevice {
    backend: Arc<dyn GfxBackend>,
}

impl GfxDevice {
    pub fn new(backend: Arc<dyn GfxBackend>) -> Self {
        Self { backend }
    }

    #[inline]
    pub fn backend(&self) -> &dyn GfxBackend {
        self.backend.as_ref()
    }

    /// 从裸 device 地址异步下载。引擎处理 request ring 回读时直接用
    /// caller 提供的 device context 指针，因此需要绕过 buffer wrapper。
    #[inline]
    pub fn copy_from_device_async(&self, src: u64, dst: *mut u8, bytes: usize, stream: &crate::GfxStream) -> GfxResult<()> {
        self.backend.memcpy_d2h_async(dst, src, bytes, stream.raw())
    }
}
