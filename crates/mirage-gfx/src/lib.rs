//! GPU 抽象层。
//!
//! 引擎只依赖这里定义的原语：stream（有序命令队列）、event（stream 标记）、
//! device buffer、pinned host buffer、RGBA8 的 flat/mipmapped 纹理数组，
//! 以及 64 位不透明的 sampler handle。具体的 GPU API 由 [`GfxBackend`] 的
//! 实现提供；[`HostBackend`] 是纯 host 内存的参考实现，测试与 demo 都跑在
//! 它上面。

mod backend;
mod buffer;
mod error;
mod event;
mod host_backend;
mod pinned;
mod sampler;
mod stream;
mod tex_array;

pub use backend::{GfxBackend, GfxDevice, GfxSamplerHandle, NULL_SAMPLER_HANDLE};
pub use buffer::GfxDeviceBuffer;
pub use error::{GfxError, GfxResult};
pub use event::GfxEvent;
pub use host_backend::HostBackend;
pub use pinned::GfxPinnedBuffer;
pub use sampler::{GfxAddressMode, GfxFilterMode, GfxSamplerDesc, GfxTexSampler};
pub use stream::GfxStream;
pub use tex_array::{GfxMipArray2D, GfxTexArray2D};
