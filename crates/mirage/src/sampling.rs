//! device contract 的 host 侧实现。
//!
//! 真正的 kernel 在 GPU 上执行同样的逻辑：查 residency bit，驻留就采样
//! handle，否则把 id append 进 request ring。append 的约定：
//!
//! - 先用 relaxed 原子读检查 overflow，已置位就放弃（省掉无谓的原子
//!   竞争）；
//! - wave 内相同 id 的 lane 选出 leader，只有 leader 做
//!   `fetch_add(count, 1)`；拿到的槽位越界时用原子交换置 overflow 并
//!   丢弃请求。没有 wave intrinsic 时退化为每线程直接 append，溢出语义
//!   不变；host 侧没有 wave，这里实现的就是这条退化路径；
//! - `ids[0..count]` 的顺序不保证，host 必须自行去重。overflow 的帧
//!   仍然是合法但不完整的 id 列表。
//!
//! 这些函数直接解引用 [`DeviceContext`] 里的 device 指针，因此只对
//! host 可寻址的后端（[`HostBackend`]）有效；测试和 demo 用它们模拟
//! kernel。

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use mirage_gfx::HostBackend;

use crate::device_context::DeviceContext;

/// 采到未驻留纹理时返回的占位色（品红）。
pub const DEFAULT_COLOR: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

#[inline]
fn atomic_u32_at(base: u64, index: u32) -> &'static AtomicU32 {
    unsafe { AtomicU32::from_ptr((base as *mut u32).add(index as usize)) }
}

#[inline]
fn atomic_u64_at(base: u64, index: u32) -> &'static AtomicU64 {
    unsafe { AtomicU64::from_ptr((base as *mut u64).add(index as usize)) }
}

/// 查 residency bitmap。越界 id 一律不驻留。
pub fn texture_resident(ctx: &DeviceContext, tex_id: u32) -> bool {
    if tex_id >= ctx.max_textures {
        return false;
    }
    let word = atomic_u32_at(ctx.resident_flags, tex_id >> 5).load(Ordering::Relaxed);
    word & (1 << (tex_id & 31)) != 0
}

/// 按 append 约定把 `tex_id` 记进 request ring。
pub fn record_texture_request(ctx: &DeviceContext, tex_id: u32) {
    let overflow = atomic_u32_at(ctx.request_overflow, 0);
    if overflow.load(Ordering::Relaxed) != 0 {
        return;
    }

    let idx = atomic_u32_at(ctx.request_count, 0).fetch_add(1, Ordering::Relaxed);
    if idx < ctx.max_requests {
        atomic_u32_at(ctx.request_ids, idx).store(tex_id, Ordering::Relaxed);
    } else {
        overflow.swap(1, Ordering::Relaxed);
    }
}

/// 模拟一次 2D 采样：驻留就最近邻取 level 0，否则记录请求并返回
/// [`DEFAULT_COLOR`]。越界 id 只返回占位色，绝不写任何 host 状态。
pub fn tex2d(backend: &HostBackend, ctx: &DeviceContext, tex_id: u32, u: f32, v: f32) -> [f32; 4] {
    if tex_id >= ctx.max_textures {
        return DEFAULT_COLOR;
    }
    if !texture_resident(ctx, tex_id) {
        record_texture_request(ctx, tex_id);
        return DEFAULT_COLOR;
    }

    let handle = atomic_u64_at(ctx.tex_handles, tex_id).load(Ordering::Relaxed);
    match backend.sample_nearest(handle, u, v) {
        Some(rgba) => [
            rgba[0] as f32 / 255.0,
            rgba[1] as f32 / 255.0,
            rgba[2] as f32 / 255.0,
            rgba[3] as f32 / 255.0,
        ],
        None => DEFAULT_COLOR,
    }
}
