use std::sync::Arc;

use parking_lot::Mutex;

use mirage_gfx::{GfxDevice, GfxPinnedBuffer, GfxResult};

/// pinned host buffer 的有界复用池。
///
/// pinned 分配是昂贵的系统调用，异步请求处理每帧都要两块回读缓冲，
/// 池化把它摊平。`acquire` 返回能装下请求的最小池内 buffer，没有就
/// 现分配；归还时池满则直接释放。
pub struct PinnedBufferPool {
    device: GfxDevice,
    buffers: Mutex<Vec<GfxPinnedBuffer>>,
    max_pooled: usize,
}

impl PinnedBufferPool {
    pub fn new(device: &GfxDevice, max_pooled: usize) -> Self {
        Self {
            device: device.clone(),
            buffers: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// 拿一块至少 `bytes` 大的 pinned buffer。
    pub fn acquire(self: &Arc<Self>, bytes: usize) -> GfxResult<PinnedBufferLease> {
        let pooled = {
            let mut buffers = self.buffers.lock();
            // 最小可用者优先，避免小请求占走大 buffer
            let best = buffers
                .iter()
                .enumerate()
                .filter(|(_, b)| b.len() >= bytes)
                .min_by_key(|(_, b)| b.len())
                .map(|(i, _)| i);
            best.map(|i| buffers.swap_remove(i))
        };

        let buffer = match pooled {
            Some(buffer) => buffer,
            None => GfxPinnedBuffer::new(&self.device, bytes)?,
        };
        Ok(PinnedBufferLease {
            pool: self.clone(),
            buffer: Some(buffer),
        })
    }

    pub fn pooled_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// 释放所有池内 buffer（abort 的收尾）。在外的 lease 归还时会被
    /// 正常收回或释放。
    pub fn clear(&self) {
        self.buffers.lock().clear();
    }

    fn release(&self, buffer: GfxPinnedBuffer) {
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
        // 池满：离开作用域直接释放
    }
}

/// 池化 buffer 的 move-only 句柄，drop 时归还。
pub struct PinnedBufferLease {
    pool: Arc<PinnedBufferPool>,
    buffer: Option<GfxPinnedBuffer>,
}

impl PinnedBufferLease {
    #[inline]
    pub fn buffer(&self) -> &GfxPinnedBuffer {
        self.buffer.as_ref().expect("lease already released")
    }
}

impl std::ops::Deref for PinnedBufferLease {
    type Target = GfxPinnedBuffer;

    fn deref(&self) -> &GfxPinnedBuffer {
        self.buffer()
    }
}

impl Drop for PinnedBufferLease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
