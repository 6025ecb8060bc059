use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use mirage_gfx::{GfxDevice, GfxDeviceBuffer, GfxError, GfxPinnedBuffer, GfxStream};
use mirage_image::{FsImageReader, ImageReader};

use crate::desc::{EvictionPriority, TextureDesc};
use crate::device_context::{DeviceContext, RequestStats};
use crate::dirty_tracker::DirtyTracker;
use crate::error::LoaderError;
use crate::evictor::{self, EvictionCandidate};
use crate::handle::TextureHandle;
use crate::mipmap;
use crate::options::EngineOptions;
use crate::pools::event_pool::EventPool;
use crate::pools::pinned_buffer_pool::PinnedBufferPool;
use crate::pools::thread_pool::ThreadPool;
use crate::registry::{TextureFlags, TextureMeta, TextureRegistry, TextureSource};
use crate::request_ring::RequestRing;
use crate::ticket::{Ticket, TicketWorker};

/// engine lock 保护的全部 host 状态。
///
/// 注册表、host mirror、脏区间、内存总量、帧号必须作为一个整体变化，
/// 不然驻留三元组（handle 表 / residency bit / 纹理状态）会裂开。
pub(crate) struct EngineState {
    pub registry: TextureRegistry,
    /// residency bitmap 的 host mirror（pinned，u32 word）。
    h_resident: GfxPinnedBuffer,
    /// handle table 的 host mirror（pinned，u64）。
    h_handles: GfxPinnedBuffer,
    dirty: DirtyTracker,
    total_memory: usize,
    current_frame: u32,
    max_texture_memory: usize,
    enable_eviction: bool,
    min_resident_frames: u32,
    last_error: Option<LoaderError>,
}

/// 同步 process_requests 的常驻回读缓冲。
///
/// 独立的小锁：回读要跨 stream sync 持有缓冲，不能占着 engine lock。
struct SyncScratch {
    h_stats: GfxPinnedBuffer,
    h_requests: GfxPinnedBuffer,
}

pub(crate) struct EngineInner {
    device: GfxDevice,
    max_textures: usize,
    max_requests: usize,
    flag_words: usize,

    state: Mutex<EngineState>,
    /// 每 id 的 resident/loading 原子，在 engine lock 之外。
    texture_flags: Box<[TextureFlags]>,

    ring: RequestRing,
    d_resident: GfxDeviceBuffer,
    d_handles: GfxDeviceBuffer,
    /// 异步回读专用 stream，把 render stream 立刻还给调用方。
    copy_stream: GfxStream,

    pinned_pool: Arc<PinnedBufferPool>,
    event_pool: Arc<EventPool>,
    thread_pool: Mutex<Option<ThreadPool>>,
    ticket_worker: Mutex<Option<TicketWorker>>,
    sync_scratch: Mutex<SyncScratch>,

    // 异步生命周期状态，独立于 engine lock，只做短暂持有
    in_flight: AtomicUsize,
    destroying: AtomicBool,
    aborted: AtomicBool,
    async_mutex: Mutex<()>,
    async_cv: Condvar,

    last_request_count: AtomicUsize,
    last_overflow: AtomicBool,
}

/// 未提交的异步操作在任何早退路径上都要归还 in-flight 计数。
struct AsyncGuard<'a> {
    inner: &'a EngineInner,
    committed: bool,
}

impl Drop for AsyncGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.finish_in_flight();
        }
    }
}

/// 随 worker 任务走的 in-flight 计数票据；任务被执行或被丢弃都会归还。
struct DrainGuard {
    inner: Arc<EngineInner>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.inner.finish_in_flight();
    }
}

impl EngineInner {
    fn new(device: &GfxDevice, options: EngineOptions) -> Result<Self, LoaderError> {
        let max_textures = options.max_textures;
        let max_requests = options.max_requests_per_launch;
        let flag_words = max_textures.div_ceil(32);

        let d_resident =
            GfxDeviceBuffer::new(device, flag_words.max(1) * 4).map_err(LoaderError::from_gfx)?;
        let d_handles =
            GfxDeviceBuffer::new(device, max_textures.max(1) * 8).map_err(LoaderError::from_gfx)?;
        let ring = RequestRing::new(device, max_requests).map_err(LoaderError::from_gfx)?;
        let copy_stream = GfxStream::new(device).map_err(LoaderError::from_gfx)?;

        let h_resident =
            GfxPinnedBuffer::new(device, flag_words.max(1) * 4).map_err(LoaderError::from_gfx)?;
        let h_handles =
            GfxPinnedBuffer::new(device, max_textures.max(1) * 8).map_err(LoaderError::from_gfx)?;
        let h_stats =
            GfxPinnedBuffer::new(device, std::mem::size_of::<RequestStats>()).map_err(LoaderError::from_gfx)?;
        let h_requests =
            GfxPinnedBuffer::new(device, max_requests.max(1) * 4).map_err(LoaderError::from_gfx)?;

        let thread_pool = ThreadPool::new(options.resolved_worker_count());
        log::debug!("engine: created loader pool with {} threads", thread_pool.size());

        let texture_flags = (0..max_textures).map(|_| TextureFlags::default()).collect::<Vec<_>>();

        Ok(Self {
            device: device.clone(),
            max_textures,
            max_requests,
            flag_words,
            state: Mutex::new(EngineState {
                registry: TextureRegistry::new(max_textures),
                h_resident,
                h_handles,
                // 首次 launch_prepare 必须整体上传一次
                dirty: DirtyTracker::new_all_dirty(flag_words, max_textures),
                total_memory: 0,
                current_frame: 0,
                max_texture_memory: options.max_texture_memory,
                enable_eviction: options.enable_eviction,
                min_resident_frames: options.min_resident_frames,
                last_error: None,
            }),
            texture_flags: texture_flags.into_boxed_slice(),
            ring,
            d_resident,
            d_handles,
            copy_stream,
            pinned_pool: Arc::new(PinnedBufferPool::new(device, 4)),
            event_pool: Arc::new(EventPool::new(device, 4, 16)),
            thread_pool: Mutex::new(Some(thread_pool)),
            ticket_worker: Mutex::new(Some(TicketWorker::spawn())),
            sync_scratch: Mutex::new(SyncScratch { h_stats, h_requests }),
            in_flight: AtomicUsize::new(0),
            destroying: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            async_mutex: Mutex::new(()),
            async_cv: Condvar::new(),
            last_request_count: AtomicUsize::new(0),
            last_overflow: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn device(&self) -> &GfxDevice {
        &self.device
    }

    #[inline]
    pub(crate) fn flags(&self, tex_id: u32) -> &TextureFlags {
        &self.texture_flags[tex_id as usize]
    }

    #[inline]
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    #[inline]
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn record_gfx_error(&self, err: GfxError) {
        self.state.lock().last_error = Some(LoaderError::from_gfx(err));
    }

    // ---- 纹理创建 ----

    fn handle_for(meta: &TextureMeta, tex_id: u32) -> TextureHandle {
        TextureHandle {
            id: tex_id,
            valid: true,
            width: meta.width,
            height: meta.height,
            channels: meta.channels,
            error: meta.last_error,
        }
    }

    fn create_texture_from_path(&self, path: PathBuf, desc: TextureDesc) -> TextureHandle {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(tex_id) = state.registry.lookup_path(&path) {
            let meta = state.registry.get(tex_id).unwrap();
            log::debug!("create_texture: reusing id={} for {:?}", tex_id, path);
            state.last_error = None;
            return Self::handle_for(meta, tex_id);
        }

        let mut meta = TextureMeta::new(TextureSource::Path(path.clone()), desc);
        // 只探测尺寸，不解码像素；失败记录在纹理上，首次请求时重试
        match FsImageReader::probe(&path) {
            Ok((width, height, channels)) => {
                meta.width = width;
                meta.height = height;
                meta.channels = channels;
            }
            Err(err) => {
                log::warn!("create_texture: probe failed for {:?}: {}", path, err);
                meta.last_error = Some(LoaderError::from_image(&err));
            }
        }

        let tex_id = match state.registry.allocate(meta) {
            Ok(tex_id) => tex_id,
            Err(err) => {
                log::error!("create_texture: {} ({:?})", err, path);
                state.last_error = Some(err);
                return TextureHandle::invalid(err);
            }
        };
        state.registry.register_path(path.clone(), tex_id);
        state.last_error = None;

        let meta = state.registry.get(tex_id).unwrap();
        log::debug!(
            "create_texture: queued {:?} as id={} ({}x{} ch={})",
            path,
            tex_id,
            meta.width,
            meta.height,
            meta.channels
        );
        Self::handle_for(meta, tex_id)
    }

    fn create_texture_with_reader(&self, reader: Arc<dyn ImageReader>, desc: TextureDesc) -> TextureHandle {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // 第一层：同一个 reader 对象
        if let Some(tex_id) = state.registry.lookup_reader(&reader) {
            let meta = state.registry.get(tex_id).unwrap();
            log::debug!("create_texture: reusing id={} for reader object", tex_id);
            state.last_error = None;
            return Self::handle_for(meta, tex_id);
        }

        // 第二层：内容哈希，抓住指向同一图像的不同 reader 对象
        let content_hash = reader.content_hash();
        if let Some(tex_id) = state.registry.lookup_hash(content_hash) {
            // 顺手登记指针映射，后续查找走快路径
            state.registry.register_reader(&reader, tex_id);
            let meta = state.registry.get(tex_id).unwrap();
            log::debug!("create_texture: reusing id={} via content hash", tex_id);
            state.last_error = None;
            return Self::handle_for(meta, tex_id);
        }

        let mut meta = TextureMeta::new(TextureSource::Reader(reader.clone()), desc);
        match reader.open() {
            Ok(info) if info.is_valid => {
                meta.width = info.width;
                meta.height = info.height;
                meta.channels = info.num_channels;
            }
            Ok(_) => {
                log::warn!("create_texture: reader opened with invalid info");
                meta.last_error = Some(LoaderError::ImageLoadFailed);
            }
            Err(err) => {
                log::warn!("create_texture: reader open failed: {}", err);
                meta.last_error = Some(LoaderError::from_image(&err));
            }
        }

        let tex_id = match state.registry.allocate(meta) {
            Ok(tex_id) => tex_id,
            Err(err) => {
                log::error!("create_texture: {}", err);
                state.last_error = Some(err);
                return TextureHandle::invalid(err);
            }
        };
        state.registry.register_reader(&reader, tex_id);
        state.registry.register_hash(content_hash, tex_id);
        state.last_error = None;

        let meta = state.registry.get(tex_id).unwrap();
        log::debug!(
            "create_texture: queued reader as id={} ({}x{} ch={})",
            tex_id,
            meta.width,
            meta.height,
            meta.channels
        );
        Self::handle_for(meta, tex_id)
    }

    fn create_texture_from_memory(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        desc: TextureDesc,
    ) -> TextureHandle {
        let needed = width as usize * height as usize * channels as usize;
        if width == 0 || height == 0 || !matches!(channels, 1 | 3 | 4) || pixels.len() < needed {
            log::error!(
                "create_texture_from_memory: invalid parameters (w={} h={} ch={} len={})",
                width,
                height,
                channels,
                pixels.len()
            );
            self.state.lock().last_error = Some(LoaderError::InvalidParameter);
            return TextureHandle::invalid(LoaderError::InvalidParameter);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // 保留一份像素，驱逐后可以重载
        let meta = TextureMeta::new(
            TextureSource::Memory {
                pixels: Arc::from(pixels[..needed].to_vec().into_boxed_slice()),
                width,
                height,
                channels,
            },
            desc,
        );
        let tex_id = match state.registry.allocate(meta) {
            Ok(tex_id) => tex_id,
            Err(err) => {
                log::error!("create_texture_from_memory: {}", err);
                state.last_error = Some(err);
                return TextureHandle::invalid(err);
            }
        };
        state.last_error = None;
        log::debug!(
            "create_texture_from_memory: created id={} ({}x{} ch={})",
            tex_id,
            width,
            height,
            channels
        );
        Self::handle_for(state.registry.get(tex_id).unwrap(), tex_id)
    }

    // ---- launch prepare ----

    fn launch_prepare(&self, stream: &GfxStream) -> Result<(), LoaderError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some((begin, count)) = state.dirty.resident_words.bounds(self.flag_words) {
            log::debug!("launch_prepare: dirty resident words [{}, +{})", begin, count);
            let bytes = &state.h_resident.as_slice()[begin * 4..(begin + count) * 4];
            if let Err(err) = self.d_resident.upload_async(begin * 4, bytes, stream) {
                log::error!("launch_prepare: resident flag upload failed: {}", err);
                state.last_error = Some(LoaderError::from_gfx(err));
                return Err(LoaderError::from_gfx(err));
            }
        }

        if let Some((begin, count)) = state.dirty.handles.bounds(self.max_textures) {
            log::debug!("launch_prepare: dirty handles [{}, +{})", begin, count);
            let bytes = &state.h_handles.as_slice()[begin * 8..(begin + count) * 8];
            if let Err(err) = self.d_handles.upload_async(begin * 8, bytes, stream) {
                log::error!("launch_prepare: handle table upload failed: {}", err);
                state.last_error = Some(LoaderError::from_gfx(err));
                return Err(LoaderError::from_gfx(err));
            }
        }

        state.dirty.clear();

        if let Err(err) = self.ring.reset_async(stream) {
            log::error!("launch_prepare: ring reset failed: {}", err);
            state.last_error = Some(LoaderError::from_gfx(err));
            return Err(LoaderError::from_gfx(err));
        }

        state.current_frame += 1;
        log::debug!("launch_prepare: frame={}", state.current_frame);
        Ok(())
    }

    fn device_context(&self) -> DeviceContext {
        DeviceContext {
            resident_flags: self.d_resident.device_ptr(),
            tex_handles: self.d_handles.device_ptr(),
            request_ids: self.ring.ids_ptr(),
            request_count: self.ring.count_ptr(),
            request_overflow: self.ring.overflow_ptr(),
            max_textures: self.max_textures as u32,
            max_requests: self.ring.capacity(),
        }
    }

    // ---- 请求处理 ----

    fn process_requests(self: &Arc<Self>, stream: &GfxStream, ctx: &DeviceContext) -> usize {
        if self.is_aborted() {
            return 0;
        }

        let copy_count = (self.max_requests as u32).min(ctx.max_requests);
        let request_ids = {
            let scratch = self.sync_scratch.lock();

            // 一次性入队三个回读，只同步一次 stream
            let stats_ptr = scratch.h_stats.as_ptr();
            if let Err(err) = self.device.copy_from_device_async(ctx.request_count, stats_ptr, 4, stream) {
                self.record_gfx_error(err);
                return 0;
            }
            if let Err(err) =
                self.device
                    .copy_from_device_async(ctx.request_overflow, stats_ptr.wrapping_add(4), 4, stream)
            {
                self.record_gfx_error(err);
                return 0;
            }
            if copy_count > 0 {
                if let Err(err) = self.device.copy_from_device_async(
                    ctx.request_ids,
                    scratch.h_requests.as_ptr(),
                    copy_count as usize * 4,
                    stream,
                ) {
                    self.record_gfx_error(err);
                    return 0;
                }
            }
            if let Err(err) = stream.synchronize() {
                self.record_gfx_error(err);
                return 0;
            }

            let stats = scratch.h_stats.as_slice_of::<RequestStats>()[0];
            self.publish_request_stats(&stats);
            if stats.count == 0 {
                return 0;
            }
            let count = stats.count.min(copy_count) as usize;
            scratch.h_requests.as_slice_of::<u32>()[..count].to_vec()
        };

        self.process_request_list(&request_ids)
    }

    fn publish_request_stats(&self, stats: &RequestStats) {
        self.last_overflow.store(stats.overflow != 0, Ordering::Release);
        self.last_request_count.store(stats.count as usize, Ordering::Release);
        if stats.overflow != 0 {
            log::warn!(
                "process_requests: request ring overflow (count={}, capacity={})",
                stats.count,
                self.max_requests
            );
        }
        log::debug!("process_requests: count={}", stats.count);
    }

    /// 去重、驱逐、并行加载。返回成功加载的数量。
    fn process_request_list(self: &Arc<Self>, request_ids: &[u32]) -> usize {
        let to_load = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let mut seen = HashSet::new();
            let mut to_load = Vec::new();
            let mut required = 0usize;
            for &tex_id in request_ids {
                // 未分配 id 的请求直接丢弃
                if tex_id >= state.registry.allocated() {
                    continue;
                }
                if self.texture_flags[tex_id as usize].resident.load(Ordering::Relaxed) {
                    continue;
                }
                if seen.insert(tex_id) {
                    let meta = state.registry.get(tex_id).unwrap();
                    required += mipmap::projected_texture_bytes(meta.width, meta.height, &meta.desc);
                    to_load.push(tex_id);
                }
            }
            log::debug!(
                "process_requests: unique-to-load={} estimated={} bytes",
                to_load.len(),
                required
            );

            if state.enable_eviction && state.max_texture_memory > 0 && required > 0 {
                self.evict_if_needed(state, required);
            }
            to_load
        };

        if to_load.is_empty() {
            return 0;
        }

        let loaded = Arc::new(AtomicUsize::new(0));
        let pool_guard = self.thread_pool.lock();
        match pool_guard.as_ref() {
            Some(pool) if to_load.len() > 1 => {
                // 任务只带 id 快照，绝不借纹理引用
                for tex_id in to_load {
                    let engine = self.clone();
                    let loaded = loaded.clone();
                    pool.submit(move || {
                        if engine.load_texture(tex_id) {
                            loaded.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
                pool.wait_all();
            }
            _ => {
                // 单个纹理或池已收走：就地加载
                for tex_id in to_load {
                    if self.load_texture(tex_id) {
                        loaded.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        loaded.load(Ordering::Relaxed)
    }

    fn process_requests_async(self: &Arc<Self>, stream: &GfxStream, ctx: &DeviceContext) -> Ticket {
        // 先占 in-flight，再查 destroying，和析构侧的顺序配对
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut async_guard = AsyncGuard {
            inner: self,
            committed: false,
        };

        if self.destroying.load(Ordering::SeqCst) || self.is_aborted() {
            return Ticket::completed();
        }

        let copy_count = (self.max_requests as u32).min(ctx.max_requests);

        let stats_lease = match self.pinned_pool.acquire(std::mem::size_of::<RequestStats>()) {
            Ok(lease) => lease,
            Err(err) => {
                self.record_gfx_error(err);
                return Ticket::completed();
            }
        };
        let requests_lease = match self.pinned_pool.acquire(copy_count.max(1) as usize * 4) {
            Ok(lease) => lease,
            Err(err) => {
                self.record_gfx_error(err);
                return Ticket::completed();
            }
        };

        // render stream 上录 "依赖就绪"，copy stream 等它之后再回读：
        // 这样 ring 的读取一定观察到 kernel 的写入，而 render stream
        // 本身立刻空出来给下一帧
        let deps_ready = match self.event_pool.acquire() {
            Ok(event) => event,
            Err(err) => {
                self.record_gfx_error(err);
                return Ticket::completed();
            }
        };
        if let Err(err) = deps_ready.record(stream) {
            self.record_gfx_error(err);
            return Ticket::completed();
        }
        if let Err(err) = self.copy_stream.wait_event(&deps_ready) {
            self.record_gfx_error(err);
            return Ticket::completed();
        }

        let stats_ptr = stats_lease.as_ptr();
        if let Err(err) = self
            .device
            .copy_from_device_async(ctx.request_count, stats_ptr, 4, &self.copy_stream)
        {
            self.record_gfx_error(err);
            return Ticket::completed();
        }
        if let Err(err) =
            self.device
                .copy_from_device_async(ctx.request_overflow, stats_ptr.wrapping_add(4), 4, &self.copy_stream)
        {
            self.record_gfx_error(err);
            return Ticket::completed();
        }
        if copy_count > 0 {
            if let Err(err) = self.device.copy_from_device_async(
                ctx.request_ids,
                requests_lease.as_ptr(),
                copy_count as usize * 4,
                &self.copy_stream,
            ) {
                self.record_gfx_error(err);
                return Ticket::completed();
            }
        }

        let copy_done = match self.event_pool.acquire() {
            Ok(event) => event,
            Err(err) => {
                self.record_gfx_error(err);
                return Ticket::completed();
            }
        };
        if let Err(err) = copy_done.record(&self.copy_stream) {
            self.record_gfx_error(err);
            return Ticket::completed();
        }

        let (ticket, ticket_inner) = Ticket::new(stream.clone());
        let engine = self.clone();
        let drain = DrainGuard { inner: self.clone() };
        let worker_ticket = ticket_inner.clone();

        let job = Box::new(move || {
            let _drain = drain;

            // event 先同步再随 lease 一起归还池
            if copy_done.synchronize().is_err() {
                engine.record_gfx_error(GfxError::Failed);
            }
            drop(copy_done);
            drop(deps_ready);

            if engine.destroying.load(Ordering::Acquire) {
                worker_ticket.mark_done();
                return;
            }

            let stats = stats_lease.as_slice_of::<RequestStats>()[0];
            engine.publish_request_stats(&stats);
            if stats.count > 0 {
                let count = stats.count.min(copy_count) as usize;
                let request_ids = requests_lease.as_slice_of::<u32>()[..count].to_vec();
                engine.process_request_list(&request_ids);
            }
            worker_ticket.mark_done();
        });

        // 从这里起 in-flight 的归还责任交给任务（或任务的 drop）
        async_guard.committed = true;

        let submitted = match self.ticket_worker.lock().as_ref() {
            Some(worker) => worker.submit(job),
            None => false,
        };
        if !submitted {
            // worker 已经关闭；任务连同 lease/event 一起被丢弃
            ticket_inner.mark_done();
        }
        ticket
    }

    // ---- 驱逐与卸载 ----

    /// 需要 engine lock。
    fn evict_if_needed(&self, state: &mut EngineState, required: usize) {
        let budget = state.max_texture_memory;
        if budget == 0 || state.total_memory + required <= budget {
            return;
        }
        log::debug!(
            "evict: current={} required={} budget={}",
            state.total_memory,
            required,
            budget
        );

        let mut candidates = Vec::new();
        for tex_id in 0..state.registry.allocated() {
            if !self.texture_flags[tex_id as usize].resident.load(Ordering::Relaxed) {
                continue;
            }
            let meta = state.registry.get(tex_id).unwrap();
            candidates.push(EvictionCandidate {
                tex_id,
                priority: meta.desc.eviction_priority,
                last_used_frame: meta.last_used_frame,
                loaded_frame: meta.loaded_frame,
                memory_usage: meta.memory_usage,
            });
        }

        let victims = evictor::select_victims(
            candidates,
            state.current_frame,
            state.min_resident_frames,
            state.total_memory,
            required,
            budget,
        );
        for tex_id in victims {
            self.destroy_texture_locked(state, tex_id);
        }
    }

    /// 释放 GPU 资源并同步 mirror。需要 engine lock；id 未驻留时 no-op。
    fn destroy_texture_locked(&self, state: &mut EngineState, tex_id: u32) {
        let flags = &self.texture_flags[tex_id as usize];
        if !flags.resident.load(Ordering::Acquire) {
            return;
        }
        let Some(meta) = state.registry.get_mut(tex_id) else {
            return;
        };

        // drop 顺序：sampler 先于数组
        meta.gpu = None;
        meta.num_mip_levels = 0;

        state.h_handles.as_mut_slice_of::<u64>()[tex_id as usize] = 0;
        let word = tex_id / 32;
        state.h_resident.as_mut_slice_of::<u32>()[word as usize] &= !(1u32 << (tex_id % 32));
        state.dirty.mark_handle(tex_id);
        state.dirty.mark_resident_word(word);

        flags.resident.store(false, Ordering::Release);
        state.total_memory -= meta.memory_usage;
        log::debug!("destroy_texture: id={} freed={} bytes", tex_id, meta.memory_usage);
        meta.memory_usage = 0;
    }

    fn unload_all_locked(&self, state: &mut EngineState) {
        for tex_id in 0..state.registry.allocated() {
            self.destroy_texture_locked(state, tex_id);
        }
    }

    // ---- loader 的发布 / 失败路径 ----

    pub(crate) fn publish_loaded(&self, tex_id: u32, upload: crate::loader::UploadedTexture) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let frame = state.current_frame;

        let meta = state.registry.get_mut(tex_id).unwrap();
        meta.width = upload.width;
        meta.height = upload.height;
        // 上传后统一是 RGBA
        meta.channels = 4;
        meta.num_mip_levels = upload.num_mip_levels;
        meta.memory_usage = upload.memory_usage;
        meta.last_used_frame = frame;
        meta.loaded_frame = frame;
        meta.last_error = None;
        let handle = upload.gpu.sampler.handle();
        meta.gpu = Some(upload.gpu);

        state.h_handles.as_mut_slice_of::<u64>()[tex_id as usize] = handle;
        let word = tex_id / 32;
        state.h_resident.as_mut_slice_of::<u32>()[word as usize] |= 1u32 << (tex_id % 32);
        state.dirty.mark_handle(tex_id);
        state.dirty.mark_resident_word(word);

        let flags = &self.texture_flags[tex_id as usize];
        flags.resident.store(true, Ordering::Release);
        flags.loading.store(false, Ordering::Release);

        state.total_memory += upload.memory_usage;
        log::info!(
            "load_texture: id={} {}x{} levels={} mem={} bytes total={} bytes",
            tex_id,
            upload.width,
            upload.height,
            upload.num_mip_levels,
            upload.memory_usage,
            state.total_memory
        );
    }

    pub(crate) fn fail_load(&self, tex_id: u32, err: LoaderError) {
        let mut state = self.state.lock();
        if let Some(meta) = state.registry.get_mut(tex_id) {
            meta.last_error = Some(err);
        }
        self.texture_flags[tex_id as usize].loading.store(false, Ordering::Release);
    }

    // ---- 生命周期 ----

    fn finish_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let _guard = self.async_mutex.lock();
        self.async_cv.notify_all();
    }

    fn drain_async(&self) {
        let mut guard = self.async_mutex.lock();
        while self.in_flight.load(Ordering::Acquire) != 0 {
            self.async_cv.wait(&mut guard);
        }
    }

    fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("abort: halting all operations");

        self.drain_async();
        // 排队中的加载任务会先跑完（它们看到 aborted 后立即返回）
        drop(self.thread_pool.lock().take());
        self.pinned_pool.clear();
        self.event_pool.clear();
        {
            let mut guard = self.state.lock();
            self.unload_all_locked(&mut guard);
        }
        log::info!("abort: completed");
    }

    fn begin_teardown(&self) {
        self.destroying.store(true, Ordering::SeqCst);
        self.drain_async();
        drop(self.ticket_worker.lock().take());
        drop(self.thread_pool.lock().take());
        let mut guard = self.state.lock();
        self.unload_all_locked(&mut guard);
    }
}

/// 按需加载的纹理缓存引擎。
///
/// 线程模型：一个调用方线程持有 render stream 驱动
/// `launch_prepare` / `process_requests*`；loader worker 池并行解码与
/// 上传；一个后台线程服务异步完成路径。engine lock 绝不跨像素解码或
/// GPU 上传持有。
pub struct MirageEngine {
    inner: Arc<EngineInner>,
}

impl MirageEngine {
    pub fn new(device: &GfxDevice, options: EngineOptions) -> Result<Self, LoaderError> {
        Ok(Self {
            inner: Arc::new(EngineInner::new(device, options)?),
        })
    }

    /// 从文件注册纹理。只探测元数据，像素等首次请求时才加载。
    /// 同一路径重复创建返回同一个 id。
    pub fn create_texture(&self, path: impl Into<PathBuf>, desc: TextureDesc) -> TextureHandle {
        self.inner.create_texture_from_path(path.into(), desc)
    }

    /// 从自定义 reader 注册纹理。同一 reader 对象、或内容哈希相同
    /// （且非 0）的两次创建返回同一个 id。
    pub fn create_texture_with_reader(&self, reader: Arc<dyn ImageReader>, desc: TextureDesc) -> TextureHandle {
        self.inner.create_texture_with_reader(reader, desc)
    }

    /// 从内存像素注册纹理，内部保留一份拷贝以支持驱逐后重载。
    /// `channels` 取 1/3/4。
    pub fn create_texture_from_memory(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        desc: TextureDesc,
    ) -> TextureHandle {
        self.inner.create_texture_from_memory(pixels, width, height, channels, desc)
    }

    /// 帧首调用：把 mirror 的脏区间刷上 device、清零 request ring、
    /// 推进帧号。所有拷贝都入队在 `stream` 上，先于调用方随后的 kernel。
    pub fn launch_prepare(&self, stream: &GfxStream) -> Result<(), LoaderError> {
        self.inner.launch_prepare(stream)
    }

    /// 传给 kernel 的 device 上下文；指针在引擎生命期内稳定，可以只取
    /// 一次。
    pub fn device_context(&self) -> DeviceContext {
        self.inner.device_context()
    }

    /// 同步处理上一帧的请求：回读 ring、去重、按预算驱逐、并行加载。
    /// 返回本次成功加载的纹理数。GPU 错误记入 `last_error` 并返回 0。
    pub fn process_requests(&self, stream: &GfxStream, ctx: &DeviceContext) -> usize {
        self.inner.process_requests(stream, ctx)
    }

    /// 异步变体：回读走专用 copy stream（通过 event 与 `stream` 排序），
    /// 去重/驱逐/加载在后台线程执行。调用方用返回的 [`Ticket`] 等待。
    pub fn process_requests_async(&self, stream: &GfxStream, ctx: &DeviceContext) -> Ticket {
        self.inner.process_requests_async(stream, ctx)
    }

    pub fn update_eviction_priority(&self, tex_id: u32, priority: EvictionPriority) {
        let mut state = self.inner.lock_state();
        match state.registry.get_mut(tex_id) {
            Some(meta) => meta.desc.eviction_priority = priority,
            None => state.last_error = Some(LoaderError::InvalidTextureId),
        }
    }

    /// 释放纹理的 GPU 资源。id 保持有效，之后的请求会重新加载。
    pub fn unload_texture(&self, tex_id: u32) {
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;
        if tex_id < state.registry.allocated() {
            self.inner.destroy_texture_locked(state, tex_id);
        } else {
            state.last_error = Some(LoaderError::InvalidTextureId);
        }
    }

    pub fn unload_all(&self) {
        let mut guard = self.inner.lock_state();
        self.inner.unload_all_locked(&mut guard);
    }

    pub fn set_max_texture_memory(&self, bytes: usize) {
        self.inner.lock_state().max_texture_memory = bytes;
    }

    pub fn max_texture_memory(&self) -> usize {
        self.inner.lock_state().max_texture_memory
    }

    pub fn enable_eviction(&self, enable: bool) {
        self.inner.lock_state().enable_eviction = enable;
    }

    /// 一次性的取消：置 sticky 标志、drain 在途 ticket、收掉 worker 池
    /// 与缓冲池、卸载全部纹理。之后 `process_requests*` 直接返回空。
    /// 幂等。
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.is_aborted()
    }

    pub fn resident_texture_count(&self) -> usize {
        let state = self.inner.lock_state();
        (0..state.registry.allocated())
            .filter(|&id| self.inner.flags(id).resident.load(Ordering::Relaxed))
            .count()
    }

    pub fn total_texture_memory(&self) -> usize {
        self.inner.lock_state().total_memory
    }

    /// 上一次 process_requests 观察到的原始请求计数。overflow 时可能
    /// 超过 ring 容量，按原样上报。
    pub fn request_count(&self) -> usize {
        self.inner.last_request_count.load(Ordering::Acquire)
    }

    pub fn had_request_overflow(&self) -> bool {
        self.inner.last_overflow.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<LoaderError> {
        self.inner.lock_state().last_error
    }

    /// 单个纹理最近一次失败的原因；加载成功后清空。
    pub fn texture_error(&self, tex_id: u32) -> Option<LoaderError> {
        self.inner.lock_state().registry.get(tex_id).and_then(|meta| meta.last_error)
    }
}

impl Drop for MirageEngine {
    fn drop(&mut self) {
        self.inner.begin_teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sampling;
    use mirage_gfx::{GfxEvent, HostBackend};
    use mirage_image::CheckerImageReader;

    struct TestEnv {
        backend: Arc<HostBackend>,
        engine: MirageEngine,
        stream: GfxStream,
        ctx: DeviceContext,
    }

    fn env_with(options: EngineOptions) -> TestEnv {
        env_with_device_limit(options, 0)
    }

    /// `device_limit` 是后端的 device 内存上限（0 不限），引擎自身的
    /// mirror/ring 也计入其中。
    fn env_with_device_limit(options: EngineOptions, device_limit: usize) -> TestEnv {
        let backend = Arc::new(HostBackend::with_memory_limit(device_limit));
        let device = GfxDevice::new(backend.clone());
        let engine = MirageEngine::new(&device, options).unwrap();
        let stream = GfxStream::new(&device).unwrap();
        let ctx = engine.device_context();
        TestEnv {
            backend,
            engine,
            stream,
            ctx,
        }
    }

    fn small_options() -> EngineOptions {
        EngineOptions {
            max_textures: 16,
            max_requests_per_launch: 64,
            max_texture_memory: 0,
            enable_eviction: true,
            max_threads: 2,
            min_resident_frames: 0,
        }
    }

    fn flat_desc() -> TextureDesc {
        TextureDesc {
            generate_mipmaps: false,
            ..Default::default()
        }
    }

    fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        rgba.iter().copied().cycle().take((width * height * 4) as usize).collect()
    }

    /// 模拟一个对若干 id 采样的 kernel：未驻留的 id 走 append 契约。
    /// 越界 id 在采样入口就被挡掉，绝不触碰 ring。
    fn kernel(ctx: &DeviceContext, tex_ids: &[u32]) {
        for &tex_id in tex_ids {
            if tex_id >= ctx.max_textures {
                continue;
            }
            if !sampling::texture_resident(ctx, tex_id) {
                sampling::record_texture_request(ctx, tex_id);
            }
        }
    }

    /// 一帧：prepare → kernel → process。返回本帧加载数。
    fn frame(env: &TestEnv, tex_ids: &[u32]) -> usize {
        env.engine.launch_prepare(&env.stream).unwrap();
        kernel(&env.ctx, tex_ids);
        env.engine.process_requests(&env.stream, &env.ctx)
    }

    fn device_handle(ctx: &DeviceContext, tex_id: u32) -> u64 {
        unsafe { *(ctx.tex_handles as *const u64).add(tex_id as usize) }
    }

    // 32×32 完整 mip 链 (6 levels) 的字节数
    const MIPPED_32: usize = 5460;
    const FLAT_32: usize = 32 * 32 * 4;

    #[test]
    fn default_construction() {
        let env = env_with(EngineOptions::default());
        assert_eq!(env.engine.last_error(), None);
        assert_eq!(env.engine.resident_texture_count(), 0);
        assert_eq!(env.engine.total_texture_memory(), 0);
        assert_eq!(env.engine.max_texture_memory(), 2 * 1024 * 1024 * 1024);
        assert!(!env.engine.is_aborted());
        assert!(!env.engine.had_request_overflow());
    }

    #[test]
    fn create_texture_from_memory_basics() {
        let env = env_with(small_options());
        let pixels = solid_image(8, 8, [1, 2, 3, 4]);

        let a = env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());
        assert!(a.valid);
        assert_eq!((a.id, a.width, a.height, a.channels), (0, 8, 8, 4));
        assert_eq!(a.error, None);

        let b = env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());
        assert_eq!(b.id, 1);

        // 内存纹理在创建时尚未驻留
        assert_eq!(env.engine.resident_texture_count(), 0);
    }

    #[test]
    fn create_texture_from_memory_rejects_bad_parameters() {
        let env = env_with(small_options());
        let pixels = solid_image(4, 4, [0; 4]);

        for (data, w, h, c) in [
            (&pixels[..0], 4u32, 4u32, 4u32), // 太短
            (&pixels[..], 0, 4, 4),
            (&pixels[..], 4, 4, 2), // 2 通道不支持
        ] {
            let handle = env.engine.create_texture_from_memory(data, w, h, c, flat_desc());
            assert!(!handle.valid);
            assert_eq!(handle.error, Some(LoaderError::InvalidParameter));
        }
        assert_eq!(env.engine.last_error(), Some(LoaderError::InvalidParameter));
    }

    #[test]
    fn max_textures_boundary() {
        let env = env_with(EngineOptions {
            max_textures: 2,
            ..small_options()
        });
        let pixels = solid_image(2, 2, [9; 4]);
        assert!(env.engine.create_texture_from_memory(&pixels, 2, 2, 4, flat_desc()).valid);
        assert!(env.engine.create_texture_from_memory(&pixels, 2, 2, 4, flat_desc()).valid);

        let third = env.engine.create_texture_from_memory(&pixels, 2, 2, 4, flat_desc());
        assert!(!third.valid);
        assert_eq!(third.error, Some(LoaderError::MaxTexturesExceeded));
        assert_eq!(env.engine.last_error(), Some(LoaderError::MaxTexturesExceeded));
    }

    /// S1：冷加载。四张 32×32 全部请求，一次 process 全部驻留。
    #[test]
    fn s1_cold_load() {
        let env = env_with(EngineOptions {
            max_textures: 4,
            max_requests_per_launch: 16,
            max_texture_memory: 0,
            ..small_options()
        });
        for i in 0..4u8 {
            let pixels = solid_image(32, 32, [i, i, i, 255]);
            let handle = env.engine.create_texture_from_memory(&pixels, 32, 32, 4, TextureDesc::default());
            assert!(handle.valid);
        }

        let loaded = frame(&env, &[0, 1, 2, 3]);
        assert_eq!(loaded, 4);
        assert_eq!(env.engine.resident_texture_count(), 4);
        assert_eq!(env.engine.request_count(), 4);
        // 每张 1365 texel × 4 B，共 4 张
        assert_eq!(env.engine.total_texture_memory(), 4 * MIPPED_32);
        assert_eq!(env.engine.total_texture_memory(), 21840);

        // 空请求帧什么都不加载
        assert_eq!(frame(&env, &[0, 1, 2, 3]), 0);
    }

    /// S2：预算驱逐。8192 预算下装两张 flat 32×32，第三张挤掉最旧者。
    #[test]
    fn s2_budget_eviction() {
        let env = env_with(EngineOptions {
            max_textures: 4,
            max_texture_memory: 2 * FLAT_32,
            ..small_options()
        });
        for _ in 0..4 {
            let pixels = solid_image(32, 32, [7; 4]);
            env.engine.create_texture_from_memory(&pixels, 32, 32, 4, flat_desc());
        }

        assert_eq!(frame(&env, &[0, 1]), 2);
        assert_eq!(env.engine.total_texture_memory(), 2 * FLAT_32);

        assert_eq!(frame(&env, &[2]), 1);
        assert_eq!(env.engine.total_texture_memory(), 2 * FLAT_32);
        assert_eq!(env.engine.resident_texture_count(), 2);

        // 同帧加载的 0/1 并列，按 id 破平：0 被驱逐，1 幸存
        env.engine.launch_prepare(&env.stream).unwrap();
        assert!(!sampling::texture_resident(&env.ctx, 0));
        assert!(sampling::texture_resident(&env.ctx, 1));
        assert!(sampling::texture_resident(&env.ctx, 2));
    }

    /// S3：KeepResident 钉住 id 0 之后，轮到 id 1 被驱逐。
    #[test]
    fn s3_keep_resident_pinning() {
        let env = env_with(EngineOptions {
            max_textures: 4,
            max_texture_memory: 2 * FLAT_32,
            ..small_options()
        });
        for _ in 0..4 {
            let pixels = solid_image(32, 32, [7; 4]);
            env.engine.create_texture_from_memory(&pixels, 32, 32, 4, flat_desc());
        }
        assert_eq!(frame(&env, &[0, 1]), 2);

        env.engine.update_eviction_priority(0, EvictionPriority::KeepResident);
        assert_eq!(frame(&env, &[2]), 1);

        env.engine.launch_prepare(&env.stream).unwrap();
        assert!(sampling::texture_resident(&env.ctx, 0));
        assert!(!sampling::texture_resident(&env.ctx, 1));
        assert!(sampling::texture_resident(&env.ctx, 2));
        assert_eq!(env.engine.total_texture_memory(), 2 * FLAT_32);
    }

    /// S4：hold-down 窗口内不驱逐，挤不出预算时加载以 OutOfMemory 收场；
    /// 窗口过后重试成功。
    #[test]
    fn s4_anti_thrash_hold_down() {
        // 后端上限 8192：引擎自身的 mirror/ring 占一点，单张 4096 的
        // flat 纹理能装一张，装不下第二张
        let env = env_with_device_limit(
            EngineOptions {
                max_textures: 4,
                max_requests_per_launch: 16,
                max_texture_memory: FLAT_32,
                enable_eviction: true,
                max_threads: 1,
                min_resident_frames: 3,
            },
            2 * FLAT_32,
        );
        for _ in 0..2 {
            let pixels = solid_image(32, 32, [3; 4]);
            env.engine.create_texture_from_memory(&pixels, 32, 32, 4, flat_desc());
        }

        // frame 1：id 0 进驻
        assert_eq!(frame(&env, &[0]), 1);

        // frame 2、3：id 0 在保护期内不让位，id 1 挤不进来
        for _ in 0..2 {
            assert_eq!(frame(&env, &[1]), 0);
            assert_eq!(env.engine.texture_error(1), Some(LoaderError::OutOfMemory));
            assert_eq!(env.engine.resident_texture_count(), 1);
            assert_eq!(env.engine.total_texture_memory(), FLAT_32);
        }

        // frame 4：保护期已过（4 - 1 >= 3），id 0 让位
        assert_eq!(frame(&env, &[1]), 1);
        env.engine.launch_prepare(&env.stream).unwrap();
        assert!(!sampling::texture_resident(&env.ctx, 0));
        assert!(sampling::texture_resident(&env.ctx, 1));
        assert_eq!(env.engine.total_texture_memory(), FLAT_32);
    }

    /// S5：三个请求打进容量 2 的 ring：overflow 置位、计数按原样上报、
    /// 最多两张加载。
    #[test]
    fn s5_ring_overflow() {
        let env = env_with(EngineOptions {
            max_requests_per_launch: 2,
            ..small_options()
        });
        for _ in 0..3 {
            let pixels = solid_image(4, 4, [1; 4]);
            env.engine.create_texture_from_memory(&pixels, 4, 4, 4, flat_desc());
        }

        let loaded = frame(&env, &[0, 1, 2]);
        assert!(env.engine.had_request_overflow());
        assert_eq!(env.engine.request_count(), 3);
        assert_eq!(loaded, 2);
    }

    #[test]
    fn zero_capacity_ring_records_only_overflow() {
        let env = env_with(EngineOptions {
            max_requests_per_launch: 0,
            ..small_options()
        });
        let pixels = solid_image(4, 4, [1; 4]);
        env.engine.create_texture_from_memory(&pixels, 4, 4, 4, flat_desc());

        assert_eq!(frame(&env, &[0]), 0);
        assert!(env.engine.had_request_overflow());
        assert_eq!(env.engine.resident_texture_count(), 0);
    }

    /// S6：内容哈希去重。哈希相同的两个 reader 对象共用一个 id，
    /// 哈希 0 永不合并。
    #[test]
    fn s6_reader_dedup() {
        let env = env_with(small_options());

        let a: Arc<dyn ImageReader> = Arc::new(CheckerImageReader::new(8, 8, 4, 2, 0xAA));
        let b: Arc<dyn ImageReader> = Arc::new(CheckerImageReader::new(8, 8, 4, 2, 0xAA));
        let c: Arc<dyn ImageReader> = Arc::new(CheckerImageReader::new(8, 8, 4, 2, 0));

        let ha = env.engine.create_texture_with_reader(a.clone(), TextureDesc::default());
        let hb = env.engine.create_texture_with_reader(b, TextureDesc::default());
        let hc = env.engine.create_texture_with_reader(c, TextureDesc::default());
        assert!(ha.valid && hb.valid && hc.valid);
        assert_eq!(ha.id, hb.id);
        assert_ne!(ha.id, hc.id);
        // 只分配了两个 id
        assert_eq!(hc.id, 1);

        // 同一 reader 对象再次创建也命中
        let ha2 = env.engine.create_texture_with_reader(a, TextureDesc::default());
        assert_eq!(ha2.id, ha.id);

        // 哈希 0 的 reader 彼此独立
        let d: Arc<dyn ImageReader> = Arc::new(CheckerImageReader::new(8, 8, 4, 2, 0));
        let hd = env.engine.create_texture_with_reader(d, TextureDesc::default());
        assert_eq!(hd.id, 2);
    }

    #[test]
    fn path_creates_deduplicate_and_record_probe_errors() {
        let env = env_with(small_options());

        let a = env.engine.create_texture("/no/such/texture.png", TextureDesc::default());
        // 纹理登记成功，探测失败记录在纹理上
        assert!(a.valid);
        assert_eq!(a.error, Some(LoaderError::FileNotFound));
        assert_eq!((a.width, a.height), (0, 0));

        let b = env.engine.create_texture("/no/such/texture.png", TextureDesc::default());
        assert_eq!(b.id, a.id);

        // 请求它：加载失败，错误记录在纹理上，engine 不报错
        assert_eq!(frame(&env, &[a.id]), 0);
        assert_eq!(env.engine.texture_error(a.id), Some(LoaderError::FileNotFound));
        assert_eq!(env.engine.resident_texture_count(), 0);
    }

    /// 未分配 id 的请求被 host 静默丢弃，不会动任何状态。
    #[test]
    fn request_for_unallocated_id_is_dropped() {
        let env = env_with(small_options());
        let pixels = solid_image(4, 4, [1; 4]);
        env.engine.create_texture_from_memory(&pixels, 4, 4, 4, flat_desc());

        // id 9 < max_textures 但未分配
        assert_eq!(frame(&env, &[9]), 0);
        assert_eq!(env.engine.resident_texture_count(), 0);
        assert_eq!(env.engine.request_count(), 1);
    }

    /// 越界 id 在 device 路径就被 bounds check 挡掉，ring 里不会出现。
    #[test]
    fn out_of_range_id_never_reaches_the_ring() {
        let env = env_with(small_options());
        env.engine.launch_prepare(&env.stream).unwrap();
        kernel(&env.ctx, &[env.ctx.max_textures + 5]);
        assert_eq!(env.engine.process_requests(&env.stream, &env.ctx), 0);
        assert_eq!(env.engine.request_count(), 0);
    }

    /// 卸载再请求恢复出同样的内存占用与驻留集合。
    #[test]
    fn reload_after_unload_is_idempotent() {
        let env = env_with(small_options());
        let pixels = solid_image(16, 16, [5, 6, 7, 255]);
        env.engine.create_texture_from_memory(&pixels, 16, 16, 4, TextureDesc::default());

        assert_eq!(frame(&env, &[0]), 1);
        let memory_after_load = env.engine.total_texture_memory();
        assert!(memory_after_load > 0);

        env.engine.unload_texture(0);
        assert_eq!(env.engine.total_texture_memory(), 0);
        assert_eq!(env.engine.resident_texture_count(), 0);

        assert_eq!(frame(&env, &[0]), 1);
        assert_eq!(env.engine.total_texture_memory(), memory_after_load);
        assert_eq!(env.engine.resident_texture_count(), 1);
    }

    /// 稳态（空请求帧之后）的 launch_prepare 不拷贝任何字节。
    #[test]
    fn steady_state_prepare_copies_nothing() {
        let env = env_with(small_options());
        let pixels = solid_image(8, 8, [1; 4]);
        env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());

        assert_eq!(frame(&env, &[0]), 1);
        // 这次 prepare 把加载产生的脏区间刷掉
        env.engine.launch_prepare(&env.stream).unwrap();
        assert_eq!(env.engine.process_requests(&env.stream, &env.ctx), 0);

        let before = env.backend.h2d_bytes();
        env.engine.launch_prepare(&env.stream).unwrap();
        assert_eq!(env.backend.h2d_bytes(), before);
    }

    /// 不变量 1：launch_prepare 之后 device mirror 与 host 驻留集一致。
    #[test]
    fn device_mirror_matches_residency_after_prepare() {
        let env = env_with(small_options());
        for i in 0..3u8 {
            let pixels = solid_image(8, 8, [i; 4]);
            env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());
        }
        assert_eq!(frame(&env, &[0, 2]), 2);
        env.engine.unload_texture(0);
        env.engine.launch_prepare(&env.stream).unwrap();

        assert!(!sampling::texture_resident(&env.ctx, 0));
        assert!(!sampling::texture_resident(&env.ctx, 1));
        assert!(sampling::texture_resident(&env.ctx, 2));
        assert_eq!(device_handle(&env.ctx, 0), 0);
        assert_eq!(device_handle(&env.ctx, 1), 0);
        assert_ne!(device_handle(&env.ctx, 2), 0);
    }

    /// mip 合成：solid 色的每一层都是同色，层数与记账符合公式。
    #[test]
    fn mipmap_synthesis_uploads_every_level() {
        let env = env_with(small_options());
        let pixels = solid_image(4, 4, [100, 150, 200, 255]);
        env.engine.create_texture_from_memory(&pixels, 4, 4, 4, TextureDesc::default());

        assert_eq!(frame(&env, &[0]), 1);
        // 4×4 → 3 levels，(16 + 4 + 1) * 4 字节
        assert_eq!(env.engine.total_texture_memory(), 84);

        env.engine.launch_prepare(&env.stream).unwrap();
        let handle = device_handle(&env.ctx, 0);
        for level in 0..3 {
            assert_eq!(env.backend.fetch_texel(handle, level, 0, 0), Some([100, 150, 200, 255]));
        }
        assert_eq!(env.backend.fetch_texel(handle, 3, 0, 0), None);

        // 采样模拟返回归一化的颜色
        let color = sampling::tex2d(&env.backend, &env.ctx, 0, 0.5, 0.5);
        assert!((color[0] - 100.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn sampling_missing_texture_returns_default_color() {
        let env = env_with(small_options());
        let pixels = solid_image(4, 4, [1; 4]);
        env.engine.create_texture_from_memory(&pixels, 4, 4, 4, flat_desc());
        env.engine.launch_prepare(&env.stream).unwrap();

        let color = sampling::tex2d(&env.backend, &env.ctx, 0, 0.0, 0.0);
        assert_eq!(color, sampling::DEFAULT_COLOR);
        // 这次未命中应当留下了一条请求
        assert_eq!(env.engine.process_requests(&env.stream, &env.ctx), 1);
    }

    #[test]
    fn invalid_id_operations_set_last_error() {
        let env = env_with(small_options());
        env.engine.update_eviction_priority(42, EvictionPriority::High);
        assert_eq!(env.engine.last_error(), Some(LoaderError::InvalidTextureId));

        let env = env_with(small_options());
        env.engine.unload_texture(42);
        assert_eq!(env.engine.last_error(), Some(LoaderError::InvalidTextureId));
    }

    #[test]
    fn abort_is_idempotent_and_releases_everything() {
        let env = env_with(small_options());
        let pixels = solid_image(8, 8, [1; 4]);
        env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());
        assert_eq!(frame(&env, &[0]), 1);

        env.engine.abort();
        assert!(env.engine.is_aborted());
        assert_eq!(env.engine.resident_texture_count(), 0);
        assert_eq!(env.engine.total_texture_memory(), 0);

        // abort 后的请求处理短路为 0
        env.engine.launch_prepare(&env.stream).unwrap();
        kernel(&env.ctx, &[0]);
        assert_eq!(env.engine.process_requests(&env.stream, &env.ctx), 0);
        let ticket = env.engine.process_requests_async(&env.stream, &env.ctx);
        assert_eq!(ticket.tasks_total(), 0);
        ticket.wait(None).unwrap();

        // 再次 abort 是 no-op
        env.engine.abort();
        assert!(env.engine.is_aborted());
    }

    #[test]
    fn async_ticket_completes_and_records_event() {
        let env = env_with(small_options());
        for i in 0..2u8 {
            let pixels = solid_image(8, 8, [i; 4]);
            env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());
        }

        env.engine.launch_prepare(&env.stream).unwrap();
        kernel(&env.ctx, &[0, 1]);
        let ticket = env.engine.process_requests_async(&env.stream, &env.ctx);
        assert_eq!(ticket.tasks_total(), 1);
        ticket.wait(None).unwrap();
        assert_eq!(ticket.tasks_remaining(), 0);
        assert_eq!(env.engine.resident_texture_count(), 2);
        assert_eq!(env.engine.request_count(), 2);

        // 带 event 的 wait：event 录制在原 render stream 上
        env.engine.launch_prepare(&env.stream).unwrap();
        kernel(&env.ctx, &[0, 1]);
        let ticket = env.engine.process_requests_async(&env.stream, &env.ctx);
        let device = GfxDevice::new(env.backend.clone());
        let event = GfxEvent::new(&device).unwrap();
        ticket.wait(Some(&event)).unwrap();
        event.synchronize().unwrap();
        // 全部已驻留，这一帧没有新请求
        assert_eq!(env.engine.request_count(), 0);
    }

    /// 属性 5：同一个 ring 被两个线程同时 process，每张纹理只加载一次。
    #[test]
    fn concurrent_process_requests_never_double_loads() {
        let env = env_with(EngineOptions {
            max_textures: 16,
            max_requests_per_launch: 64,
            max_threads: 4,
            ..small_options()
        });
        for i in 0..16u8 {
            let pixels = solid_image(32, 32, [i; 4]);
            env.engine.create_texture_from_memory(&pixels, 32, 32, 4, flat_desc());
        }

        env.engine.launch_prepare(&env.stream).unwrap();
        let all: Vec<u32> = (0..16).collect();
        kernel(&env.ctx, &all);

        let total_loaded: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let engine = &env.engine;
                    let stream = env.stream.clone();
                    let ctx = env.ctx;
                    scope.spawn(move || engine.process_requests(&stream, &ctx))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(total_loaded, 16);
        assert_eq!(env.engine.resident_texture_count(), 16);
        assert_eq!(env.engine.total_texture_memory(), 16 * FLAT_32);
    }

    /// loading 标志的认领协议：多线程抢同一个 id，恰好一个成功。
    #[test]
    fn loading_claim_is_exclusive() {
        let env = env_with(EngineOptions {
            max_textures: 8,
            max_threads: 4,
            ..small_options()
        });
        for i in 0..8u8 {
            let pixels = solid_image(8, 8, [i; 4]);
            env.engine.create_texture_from_memory(&pixels, 8, 8, 4, flat_desc());
        }

        for round in 0..10 {
            for tex_id in 0..8u32 {
                let successes: usize = std::thread::scope(|scope| {
                    let handles: Vec<_> = (0..4)
                        .map(|_| {
                            let inner = env.engine.inner.clone();
                            scope.spawn(move || inner.load_texture(tex_id))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .filter_map(|h| h.join().unwrap().then_some(()))
                        .count()
                });
                assert_eq!(successes, 1, "round {} id {}", round, tex_id);
            }
            assert_eq!(env.engine.resident_texture_count(), 8);
            env.engine.unload_all();
            assert_eq!(env.engine.total_texture_memory(), 0);
        }
    }

    /// 不变量 2：总内存恒等于驻留纹理的 memory_usage 之和。
    #[test]
    fn memory_accounting_stays_consistent() {
        let env = env_with(EngineOptions {
            max_textures: 8,
            max_texture_memory: 3 * FLAT_32,
            ..small_options()
        });
        for _ in 0..6 {
            let pixels = solid_image(32, 32, [2; 4]);
            env.engine.create_texture_from_memory(&pixels, 32, 32, 4, flat_desc());
        }

        frame(&env, &[0, 1, 2]);
        frame(&env, &[3, 4]);
        frame(&env, &[5]);
        env.engine.unload_texture(5);
        frame(&env, &[0]);

        let resident = env.engine.resident_texture_count();
        assert_eq!(env.engine.total_texture_memory(), resident * FLAT_32);
        assert!(env.engine.total_texture_memory() <= 3 * FLAT_32);
    }

    #[test]
    fn eviction_can_be_disabled() {
        let env = env_with(EngineOptions {
            max_textures: 4,
            max_texture_memory: FLAT_32,
            ..small_options()
        });
        for _ in 0..2 {
            let pixels = solid_image(32, 32, [1; 4]);
            env.engine.create_texture_from_memory(&pixels, 32, 32, 4, flat_desc());
        }
        assert_eq!(frame(&env, &[0]), 1);

        env.engine.enable_eviction(false);
        // 预算已满但不驱逐：加载照样进行（host 后端没有设上限）
        assert_eq!(frame(&env, &[1]), 1);
        assert_eq!(env.engine.resident_texture_count(), 2);
    }
}
