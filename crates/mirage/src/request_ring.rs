use mirage_gfx::{GfxDevice, GfxDeviceBuffer, GfxResult, GfxStream};

use crate::device_context::RequestStats;

/// device 侧的请求 append buffer：id 数组加一对原子 count/overflow。
///
/// 写入端的约定见 [`crate::sampling`]。引擎在 launch_prepare 时清零
/// 统计，在 process_requests 时回读。
pub(crate) struct RequestRing {
    d_ids: GfxDeviceBuffer,
    d_stats: GfxDeviceBuffer,
    capacity: u32,
}

impl RequestRing {
    pub fn new(device: &GfxDevice, capacity: usize) -> GfxResult<Self> {
        // 容量 0 依旧分配一个槽位，保证指针有效；append 契约会在容量
        // 判断处直接走 overflow。
        let d_ids = GfxDeviceBuffer::new(device, capacity.max(1) * std::mem::size_of::<u32>())?;
        let d_stats = GfxDeviceBuffer::new(device, std::mem::size_of::<RequestStats>())?;
        Ok(Self {
            d_ids,
            d_stats,
            capacity: capacity as u32,
        })
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn ids_ptr(&self) -> u64 {
        self.d_ids.device_ptr()
    }

    /// count 在 stats 分配的偏移 0。
    #[inline]
    pub fn count_ptr(&self) -> u64 {
        self.d_stats.device_ptr()
    }

    /// overflow 紧跟 count，偏移 4。
    #[inline]
    pub fn overflow_ptr(&self) -> u64 {
        self.d_stats.device_ptr() + 4
    }

    /// 异步清零 count 与 overflow。ids 本体不用清，count 之外的内容
    /// 视为垃圾。
    pub fn reset_async(&self, stream: &GfxStream) -> GfxResult<()> {
        self.d_stats.fill_async(0, stream)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device_context::DeviceContext;
    use crate::sampling;
    use mirage_gfx::HostBackend;

    fn ring_ctx(ring: &RequestRing, max_textures: u32) -> DeviceContext {
        DeviceContext {
            resident_flags: 0,
            tex_handles: 0,
            request_ids: ring.ids_ptr(),
            request_count: ring.count_ptr(),
            request_overflow: ring.overflow_ptr(),
            max_textures,
            max_requests: ring.capacity(),
        }
    }

    #[test]
    fn reset_clears_count_and_overflow() {
        let device = GfxDevice::new(Arc::new(HostBackend::new()));
        let stream = GfxStream::new(&device).unwrap();
        let ring = RequestRing::new(&device, 2).unwrap();
        let ctx = ring_ctx(&ring, 8);

        sampling::record_texture_request(&ctx, 1);
        sampling::record_texture_request(&ctx, 2);
        sampling::record_texture_request(&ctx, 3);

        ring.reset_async(&stream).unwrap();
        stream.synchronize().unwrap();

        // 清零后重新可 append
        sampling::record_texture_request(&ctx, 5);
        let mut stats = RequestStats::default();
        device
            .copy_from_device_async(ring.count_ptr(), &mut stats as *mut RequestStats as *mut u8, 8, &stream)
            .unwrap();
        stream.synchronize().unwrap();
        assert_eq!(stats, RequestStats { count: 1, overflow: 0 });
    }
}
