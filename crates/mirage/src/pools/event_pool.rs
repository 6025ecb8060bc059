use std::sync::Arc;

use parking_lot::Mutex;

use mirage_gfx::{GfxDevice, GfxEvent, GfxResult};

/// GPU event 的有界复用池。
///
/// event 创建是昂贵操作，异步路径每次要两个（依赖就绪 + 拷贝完成），
/// 跨帧复用省掉 per-launch 的创建开销。event 不带 timing。
pub struct EventPool {
    device: GfxDevice,
    events: Mutex<Vec<GfxEvent>>,
    max_pooled: usize,
}

impl EventPool {
    /// 预热 `initial` 个 event。预热失败不致命，后续 acquire 再报错。
    pub fn new(device: &GfxDevice, initial: usize, max_pooled: usize) -> Self {
        let mut events = Vec::with_capacity(initial);
        for _ in 0..initial {
            if let Ok(event) = GfxEvent::new(device) {
                events.push(event);
            }
        }
        Self {
            device: device.clone(),
            events: Mutex::new(events),
            max_pooled,
        }
    }

    pub fn acquire(self: &Arc<Self>) -> GfxResult<PooledEvent> {
        let pooled = self.events.lock().pop();
        let event = match pooled {
            Some(event) => event,
            None => GfxEvent::new(&self.device)?,
        };
        Ok(PooledEvent {
            pool: self.clone(),
            event: Some(event),
        })
    }

    pub fn pooled_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn release(&self, event: GfxEvent) {
        let mut events = self.events.lock();
        if events.len() < self.max_pooled {
            events.push(event);
        }
    }
}

/// 池化 event 的 move-only 句柄，drop 时归还。
pub struct PooledEvent {
    pool: Arc<EventPool>,
    event: Option<GfxEvent>,
}

impl std::ops::Deref for PooledEvent {
    type Target = GfxEvent;

    fn deref(&self) -> &GfxEvent {
        self.event.as_ref().expect("pooled event already released")
    }
}

impl Drop for PooledEvent {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.pool.release(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirage_gfx::{GfxStream, HostBackend};

    #[test]
    fn events_cycle_through_the_pool() {
        let device = GfxDevice::new(Arc::new(HostBackend::new()));
        let pool = Arc::new(EventPool::new(&device, 2, 4));
        assert_eq!(pool.pooled_count(), 2);

        let stream = GfxStream::new(&device).unwrap();
        {
            let event = pool.acquire().unwrap();
            assert_eq!(pool.pooled_count(), 1);
            event.record(&stream).unwrap();
            event.synchronize().unwrap();
        }
        assert_eq!(pool.pooled_count(), 2);

        // 池空时现创建
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        drop((a, b, c));
        assert_eq!(pool.pooled_count(), 3);
    }
}
