use std::sync::Arc;

use crate::backend::GfxDevice;
use crate::error::GfxResult;
use crate::event::GfxEvent;

struct StreamInner {
    device: GfxDevice,
    raw: u64,
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        self.device.backend().destroy_stream(self.raw);
    }
}

/// 有序命令队列。
///
/// 内部 `Arc` 共享：异步 ticket 需要在 wait 时把 event 录在原始的
/// render stream 上，所以 stream 必须可以被廉价 clone 并活得比单次
/// 调用长。
#[derive(Clone)]
pub struct GfxStream {
    inner: Arc<StreamInner>,
}

impl GfxStream {
    pub fn new(device: &GfxDevice) -> GfxResult<Self> {
        let raw = device.backend().create_stream()?;
        Ok(Self {
            inner: Arc::new(StreamInner {
                device: device.clone(),
                raw,
            }),
        })
    }

    /// 阻塞直到该 stream 上所有已入队操作完成。
    pub fn synchronize(&self) -> GfxResult<()> {
        self.inner.device.backend().sync_stream(self.inner.raw)
    }

    /// 让该 stream 后续的操作等待 `event` 已录制的位置。
    pub fn wait_event(&self, event: &GfxEvent) -> GfxResult<()> {
        self.inner.device.backend().stream_wait_event(self.inner.raw, event.raw())
    }

    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        self.inner.raw
    }
}
