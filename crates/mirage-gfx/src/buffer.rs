use crate::backend::GfxDevice;
use crate::error::GfxResult;
use crate::stream::GfxStream;

/// device 线性内存，drop 时释放。
pub struct GfxDeviceBuffer {
    device: GfxDevice,
    ptr: u64,
    bytes: usize,
}

impl GfxDeviceBuffer {
    /// 分配并清零。
    pub fn new(device: &GfxDevice, bytes: usize) -> GfxResult<Self> {
        let ptr = device.backend().alloc_device(bytes)?;
        Ok(Self {
            device: device.clone(),
            ptr,
            bytes,
        })
    }

    /// device 地址，在 buffer 存活期间保持稳定。
    #[inline]
    pub fn device_ptr(&self) -> u64 {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// host → device 异步拷贝，按字节偏移。
    pub fn upload_async(&self, byte_offset: usize, src: &[u8], stream: &GfxStream) -> GfxResult<()> {
        debug_assert!(byte_offset + src.len() <= self.bytes);
        self.device
            .backend()
            .memcpy_h2d_async(self.ptr + byte_offset as u64, src.as_ptr(), src.len(), stream.raw())
    }

    /// device → host 异步拷贝。`dst` 必须在拷贝完成前保持有效，调用方
    /// 通过 stream sync 或 event 保证。
    pub fn download_async(&self, byte_offset: usize, dst: *mut u8, bytes: usize, stream: &GfxStream) -> GfxResult<()> {
        debug_assert!(byte_offset + bytes <= self.bytes);
        self.device
            .backend()
            .memcpy_d2h_async(dst, self.ptr + byte_offset as u64, bytes, stream.raw())
    }

    pub fn fill_async(&self, value: u8, stream: &GfxStream) -> GfxResult<()> {
        self.device.backend().memset_async(self.ptr, value, self.bytes, stream.raw())
    }
}

impl Drop for GfxDeviceBuffer {
    fn drop(&mut self) {
        self.device.backend().free_device(self.ptr);
    }
}
