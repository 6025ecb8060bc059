/// 引擎的容量配置，构造后除标注的 setter 外不可变。
#[derive(Clone, Copy, Debug)]
pub struct EngineOptions {
    /// 可分配的纹理 id 上限，决定 handle table 和 residency bitmap 的
    /// 大小。
    pub max_textures: usize,

    /// request ring 的容量。0 表示每次采样都直接打 overflow 标记。
    pub max_requests_per_launch: usize,

    /// 纹理内存预算（字节）。0 = 不限制，同时关闭驱逐。
    /// 之后可用 [`crate::MirageEngine::set_max_texture_memory`] 调整。
    pub max_texture_memory: usize,

    pub enable_eviction: bool,

    /// loader worker 数。0 = 自动（硬件并发的一半，钳到 1..=16）。
    pub max_threads: usize,

    /// 反抖动保护：加载后这么多帧之内不会被驱逐。
    pub min_resident_frames: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_textures: 4096,
            max_requests_per_launch: 1024,
            max_texture_memory: 2 * 1024 * 1024 * 1024,
            enable_eviction: true,
            max_threads: 0,
            min_resident_frames: 3,
        }
    }
}

impl EngineOptions {
    pub(crate) fn resolved_worker_count(&self) -> usize {
        let count = if self.max_threads == 0 {
            let hw = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
            (hw / 2).max(1)
        } else {
            self.max_threads
        };
        count.min(16)
    }
}
