use crate::backend::GfxDevice;
use crate::error::GfxResult;
use crate::stream::GfxStream;

/// stream 标记，不带 timing。
///
/// event 创建有固定开销，跨帧复用交给引擎侧的 event pool。
pub struct GfxEvent {
    device: GfxDevice,
    raw: u64,
}

impl GfxEvent {
    pub fn new(device: &GfxDevice) -> GfxResult<Self> {
        let raw = device.backend().create_event()?;
        Ok(Self {
            device: device.clone(),
            raw,
        })
    }

    /// 在 `stream` 的当前位置录制该 event。
    pub fn record(&self, stream: &GfxStream) -> GfxResult<()> {
        self.device.backend().record_event(self.raw, stream.raw())
    }

    /// 阻塞直到最近一次录制的位置已经执行完。
    pub fn synchronize(&self) -> GfxResult<()> {
        self.device.backend().sync_event(self.raw)
    }

    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        self.raw
    }
}

impl Drop for GfxEvent {
    fn drop(&mut self) {
        self.device.backend().destroy_event(self.raw);
    }
}
