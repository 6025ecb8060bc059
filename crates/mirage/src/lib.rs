//! 按需加载的 GPU 纹理缓存。
//!
//! 工作集远大于显存的渲染负载（path tracer、tile renderer、大型虚拟
//! 纹理浏览）通过一张 bindless 风格的 handle table 采样：shader 碰到
//! 未驻留的纹理 id 时把请求写进 request ring，用占位色继续渲染；host
//! 在下一次 [`MirageEngine::process_requests`] 里分页加载缺失的纹理，
//! 并在内存预算内按优先级 + LRU 驱逐。
//!
//! 每帧的流程：
//!
//! 1. [`MirageEngine::launch_prepare`] 把 residency bitmap / handle
//!    table 的脏区间刷到 device，清零 request ring，推进帧号；
//! 2. 应用在同一 stream 上跑自己的 kernel，kernel 按 [`sampling`] 里的
//!    device contract 采样与记录请求；
//! 3. [`MirageEngine::process_requests`]（或异步变体）回读请求、去重、
//!    驱逐腾预算、并行加载并发布新的 handle。

mod desc;
mod device_context;
mod dirty_tracker;
mod engine;
mod error;
mod evictor;
mod handle;
mod loader;
mod mipmap;
mod options;
mod pools;
mod registry;
mod request_ring;
pub mod sampling;
mod ticket;

pub use desc::{EvictionPriority, TextureDesc};
pub use device_context::{DeviceContext, RequestStats};
pub use engine::MirageEngine;
pub use error::LoaderError;
pub use handle::TextureHandle;
pub use options::EngineOptions;
pub use pools::event_pool::{EventPool, PooledEvent};
pub use pools::pinned_buffer_pool::{PinnedBufferLease, PinnedBufferPool};
pub use pools::thread_pool::ThreadPool;
pub use ticket::Ticket;
