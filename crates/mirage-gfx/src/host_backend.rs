use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{GfxBackend, GfxSamplerHandle};
use crate::error::{GfxError, GfxResult};
use crate::sampler::{GfxAddressMode, GfxSamplerDesc};

const HOST_ALLOC_ALIGN: usize = 16;

struct TexStorage {
    width: u32,
    height: u32,
    /// 每个 mip level 一份紧密排布的 RGBA8。分配时为空，上传后填充。
    levels: Vec<Vec<u8>>,
    bytes: usize,
}

impl TexStorage {
    fn level_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

#[derive(Clone, Copy)]
struct SamplerEntry {
    array: u64,
    desc: GfxSamplerDesc,
}

#[derive(Default)]
struct HostState {
    /// base 地址 → 分配长度。BTreeMap 方便做“包含这个区间的分配”查询。
    device_allocs: BTreeMap<u64, usize>,
    pinned_allocs: BTreeMap<usize, usize>,
    streams: HashSet<u64>,
    events: HashSet<u64>,
    arrays: HashMap<u64, TexStorage>,
    samplers: HashMap<u64, SamplerEntry>,
    next_stream: u64,
    next_event: u64,
    next_array: u64,
    next_sampler: u64,
    device_bytes_in_use: usize,
}

/// 纯 host 内存的后端实现。
///
/// “device 内存”就是 host 堆内存，地址稳定，因此引擎对 request ring 的
/// 原子 append 模拟可以直接跑在它上面。所有入队操作立即执行，stream
/// 顺序自然满足，event 在录制时即完成。
///
/// `with_memory_limit` 可以给 device 内存设上限（统计 buffer + 纹理
/// 数组），用来复现加载阶段的 OutOfMemory 路径。
pub struct HostBackend {
    state: Mutex<HostState>,
    memory_limit: usize,
    h2d_bytes: AtomicUsize,
    d2h_bytes: AtomicUsize,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_memory_limit(0)
    }

    /// `limit_bytes == 0` 表示不限制。
    pub fn with_memory_limit(limit_bytes: usize) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            memory_limit: limit_bytes,
            h2d_bytes: AtomicUsize::new(0),
            d2h_bytes: AtomicUsize::new(0),
        }
    }

    /// 已经通过 host → device 拷贝搬运的总字节数。
    pub fn h2d_bytes(&self) -> usize {
        self.h2d_bytes.load(Ordering::Relaxed)
    }

    pub fn d2h_bytes(&self) -> usize {
        self.d2h_bytes.load(Ordering::Relaxed)
    }

    pub fn device_bytes_in_use(&self) -> usize {
        self.state.lock().device_bytes_in_use
    }

    /// 读回某个 sampler 对应纹理的一个 texel，用于测试与 demo 观察上传
    /// 结果。数组已释放或 level 未上传时返回 None。
    pub fn fetch_texel(&self, handle: GfxSamplerHandle, level: u32, x: u32, y: u32) -> Option<[u8; 4]> {
        let state = self.state.lock();
        let entry = state.samplers.get(&handle)?;
        let tex = state.arrays.get(&entry.array)?;
        let (w, h) = tex.level_extent(level);
        if x >= w || y >= h {
            return None;
        }
        let data = tex.levels.get(level as usize)?;
        if data.is_empty() {
            return None;
        }
        let idx = ((y * w + x) * 4) as usize;
        Some([data[idx], data[idx + 1], data[idx + 2], data[idx + 3]])
    }

    /// level 0 的最近邻采样，按 sampler desc 的 address mode 处理出界坐标。
    /// Border 模式出界返回透明黑。
    pub fn sample_nearest(&self, handle: GfxSamplerHandle, u: f32, v: f32) -> Option<[u8; 4]> {
        let (array, desc, w, h) = {
            let state = self.state.lock();
            let entry = state.samplers.get(&handle)?;
            let tex = state.arrays.get(&entry.array)?;
            (entry.array, entry.desc, tex.width, tex.height)
        };

        let (mut u, mut v) = if desc.normalized_coords {
            (u, v)
        } else {
            (u / w as f32, v / h as f32)
        };

        for (coord, mode) in [(&mut u, desc.address_mode[0]), (&mut v, desc.address_mode[1])] {
            match mode {
                GfxAddressMode::Wrap => *coord -= coord.floor(),
                GfxAddressMode::Clamp => *coord = coord.clamp(0.0, 1.0),
                GfxAddressMode::Mirror => {
                    let t = (*coord * 0.5 - (*coord * 0.5).floor()) * 2.0;
                    *coord = if t > 1.0 { 2.0 - t } else { t };
                }
                GfxAddressMode::Border => {
                    if *coord < 0.0 || *coord > 1.0 {
                        return Some([0, 0, 0, 0]);
                    }
                }
            }
        }

        let x = ((u * w as f32) as u32).min(w - 1);
        let y = ((v * h as f32) as u32).min(h - 1);

        let state = self.state.lock();
        let entry = state.samplers.get(&handle)?;
        if entry.array != array {
            return None;
        }
        drop(state);
        self.fetch_texel(handle, 0, x, y)
    }

    fn host_layout(bytes: usize) -> Layout {
        // 大小为 0 的分配不合法，钳到 1。
        Layout::from_size_align(bytes.max(1), HOST_ALLOC_ALIGN).expect("bad host alloc layout")
    }

    /// 校验 [addr, addr + bytes) 完整落在某个 device 分配内。
    fn check_device_range(state: &HostState, addr: u64, bytes: usize) -> GfxResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        match state.device_allocs.range(..=addr).next_back() {
            Some((&base, &len)) if addr + bytes as u64 <= base + len as u64 => Ok(()),
            _ => Err(GfxError::InvalidResource),
        }
    }

    fn charge_device_memory(&self, state: &mut HostState, bytes: usize) -> GfxResult<()> {
        if self.memory_limit != 0 && state.device_bytes_in_use + bytes > self.memory_limit {
            return Err(GfxError::OutOfMemory);
        }
        state.device_bytes_in_use += bytes;
        Ok(())
    }

    fn mip_storage_bytes(width: u32, height: u32, levels: u32) -> usize {
        (0..levels)
            .map(|k| ((width >> k).max(1) as usize) * ((height >> k).max(1) as usize) * 4)
            .sum()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostBackend {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (&base, &len) in &state.device_allocs {
            unsafe { dealloc(base as *mut u8, Self::host_layout(len)) };
        }
        for (&base, &len) in &state.pinned_allocs {
            unsafe { dealloc(base as *mut u8, Self::host_layout(len)) };
        }
    }
}

impl GfxBackend for HostBackend {
    fn alloc_device(&self, bytes: usize) -> GfxResult<u64> {
        let mut state = self.state.lock();
        self.charge_device_memory(&mut state, bytes)?;
        let ptr = unsafe { alloc_zeroed(Self::host_layout(bytes)) };
        if ptr.is_null() {
            state.device_bytes_in_use -= bytes;
            return Err(GfxError::OutOfMemory);
        }
        state.device_allocs.insert(ptr as u64, bytes);
        Ok(ptr as u64)
    }

    fn free_device(&self, ptr: u64) {
        let mut state = self.state.lock();
        if let Some(len) = state.device_allocs.remove(&ptr) {
            state.device_bytes_in_use -= len;
            unsafe { dealloc(ptr as *mut u8, Self::host_layout(len)) };
        }
    }

    fn memset_async(&self, dst: u64, value: u8, bytes: usize, stream: u64) -> GfxResult<()> {
        let state = self.state.lock();
        if !state.streams.contains(&stream) {
            return Err(GfxError::InvalidResource);
        }
        Self::check_device_range(&state, dst, bytes)?;
        unsafe { std::ptr::write_bytes(dst as *mut u8, value, bytes) };
        Ok(())
    }

    fn memcpy_h2d_async(&self, dst: u64, src: *const u8, bytes: usize, stream: u64) -> GfxResult<()> {
        let state = self.state.lock();
        if !state.streams.contains(&stream) {
            return Err(GfxError::InvalidResource);
        }
        Self::check_device_range(&state, dst, bytes)?;
        unsafe { std::ptr::copy_nonoverlapping(src, dst as *mut u8, bytes) };
        self.h2d_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn memcpy_d2h_async(&self, dst: *mut u8, src: u64, bytes: usize, stream: u64) -> GfxResult<()> {
        let state = self.state.lock();
        if !state.streams.contains(&stream) {
            return Err(GfxError::InvalidResource);
        }
        Self::check_device_range(&state, src, bytes)?;
        unsafe { std::ptr::copy_nonoverlapping(src as *const u8, dst, bytes) };
        self.d2h_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn alloc_pinned(&self, bytes: usize) -> GfxResult<*mut u8> {
        let ptr = unsafe { alloc_zeroed(Self::host_layout(bytes)) };
        if ptr.is_null() {
            return Err(GfxError::OutOfMemory);
        }
        self.state.lock().pinned_allocs.insert(ptr as usize, bytes);
        Ok(ptr)
    }

    fn free_pinned(&self, ptr: *mut u8) {
        let mut state = self.state.lock();
        if let Some(len) = state.pinned_allocs.remove(&(ptr as usize)) {
            unsafe { dealloc(ptr, Self::host_layout(len)) };
        }
    }

    fn create_stream(&self) -> GfxResult<u64> {
        let mut state = self.state.lock();
        state.next_stream += 1;
        let id = state.next_stream;
        state.streams.insert(id);
        Ok(id)
    }

    fn destroy_stream(&self, stream: u64) {
        self.state.lock().streams.remove(&stream);
    }

    fn sync_stream(&self, stream: u64) -> GfxResult<()> {
        // 立即执行模型下入队即完成。
        if self.state.lock().streams.contains(&stream) {
            Ok(())
        } else {
            Err(GfxError::InvalidResource)
        }
    }

    fn create_event(&self) -> GfxResult<u64> {
        let mut state = self.state.lock();
        state.next_event += 1;
        let id = state.next_event;
        state.events.insert(id);
        Ok(id)
    }

    fn destroy_event(&self, event: u64) {
        self.state.lock().events.remove(&event);
    }

    fn record_event(&self, event: u64, stream: u64) -> GfxResult<()> {
        let state = self.state.lock();
        if state.events.contains(&event) && state.streams.contains(&stream) {
            Ok(())
        } else {
            Err(GfxError::InvalidResource)
        }
    }

    fn stream_wait_event(&self, stream: u64, event: u64) -> GfxResult<()> {
        let state = self.state.lock();
        if state.events.contains(&event) && state.streams.contains(&stream) {
            Ok(())
        } else {
            Err(GfxError::InvalidResource)
        }
    }

    fn sync_event(&self, event: u64) -> GfxResult<()> {
        if self.state.lock().events.contains(&event) {
            Ok(())
        } else {
            Err(GfxError::InvalidResource)
        }
    }

    fn alloc_tex2d(&self, width: u32, height: u32) -> GfxResult<u64> {
        self.alloc_mip_tex2d(width, height, 1)
    }

    fn alloc_mip_tex2d(&self, width: u32, height: u32, levels: u32) -> GfxResult<u64> {
        if width == 0 || height == 0 || levels == 0 {
            return Err(GfxError::InvalidResource);
        }
        let bytes = Self::mip_storage_bytes(width, height, levels);
        let mut state = self.state.lock();
        self.charge_device_memory(&mut state, bytes)?;
        state.next_array += 1;
        let id = state.next_array;
        state.arrays.insert(
            id,
            TexStorage {
                width,
                height,
                levels: vec![Vec::new(); levels as usize],
                bytes,
            },
        );
        Ok(id)
    }

    fn free_tex2d(&self, array: u64) {
        let mut state = self.state.lock();
        if let Some(tex) = state.arrays.remove(&array) {
            state.device_bytes_in_use -= tex.bytes;
        }
    }

    fn upload_tex2d_level(&self, array: u64, level: u32, pixels: &[u8], width: u32, height: u32) -> GfxResult<()> {
        let mut state = self.state.lock();
        let tex = state.arrays.get_mut(&array).ok_or(GfxError::InvalidResource)?;
        if level as usize >= tex.levels.len() {
            return Err(GfxError::InvalidResource);
        }
        let (lw, lh) = tex.level_extent(level);
        if (width, height) != (lw, lh) || pixels.len() != (lw * lh * 4) as usize {
            return Err(GfxError::InvalidResource);
        }
        tex.levels[level as usize] = pixels.to_vec();
        self.h2d_bytes.fetch_add(pixels.len(), Ordering::Relaxed);
        Ok(())
    }

    fn create_sampler(&self, array: u64, desc: &GfxSamplerDesc) -> GfxResult<GfxSamplerHandle> {
        let mut state = self.state.lock();
        if !state.arrays.contains_key(&array) {
            return Err(GfxError::InvalidResource);
        }
        state.next_sampler += 1;
        let handle = state.next_sampler;
        state.samplers.insert(handle, SamplerEntry { array, desc: *desc });
        Ok(handle)
    }

    fn destroy_sampler(&self, handle: GfxSamplerHandle) {
        self.state.lock().samplers.remove(&handle);
    }
}
