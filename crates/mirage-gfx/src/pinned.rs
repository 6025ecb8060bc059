use crate::backend::GfxDevice;
use crate::error::GfxResult;

/// page-locked host 内存，DMA 引擎可以直接访问，不需要 staging。
///
/// 引擎用它存放 host mirror 和 request ring 的回读缓冲。
pub struct GfxPinnedBuffer {
    device: GfxDevice,
    ptr: *mut u8,
    bytes: usize,
}

// 分配由后端完成且独占所有权，裸指针只是访问方式。
unsafe impl Send for GfxPinnedBuffer {}
unsafe impl Sync for GfxPinnedBuffer {}

impl GfxPinnedBuffer {
    /// 分配并清零。
    pub fn new(device: &GfxDevice, bytes: usize) -> GfxResult<Self> {
        let ptr = device.backend().alloc_pinned(bytes)?;
        Ok(Self {
            device: device.clone(),
            ptr,
            bytes,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.bytes) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.bytes) }
    }

    /// 按 Pod 类型查看。后端保证 16 字节对齐，u32/u64 mirror 都满足。
    #[inline]
    pub fn as_slice_of<T: bytemuck::Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.as_slice())
    }

    #[inline]
    pub fn as_mut_slice_of<T: bytemuck::Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(self.as_mut_slice())
    }
}

impl Drop for GfxPinnedBuffer {
    fn drop(&mut self) {
        self.device.backend().free_pinned(self.ptr);
    }
}
