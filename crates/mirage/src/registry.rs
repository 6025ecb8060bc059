use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use mirage_gfx::{GfxMipArray2D, GfxTexArray2D, GfxTexSampler};
use mirage_image::ImageReader;

use crate::desc::TextureDesc;
use crate::error::LoaderError;

/// 像素来源。驱逐只释放 GPU 资源，来源保留，重新请求时照此重载。
#[derive(Clone)]
pub(crate) enum TextureSource {
    Path(PathBuf),
    Reader(Arc<dyn ImageReader>),
    /// in-memory 纹理保留一份原始像素以支持驱逐后重载。
    Memory {
        pixels: Arc<[u8]>,
        width: u32,
        height: u32,
        channels: u32,
    },
}

/// 驻留纹理拥有的 GPU 资源。
///
/// 字段顺序即析构顺序：sampler 引用底层数组，必须先销毁。
pub(crate) struct LoadedTexture {
    pub sampler: GfxTexSampler,
    pub image: TexImage,
}

/// flat / mipmapped 二选一的封闭标签，不走虚分发。
pub(crate) enum TexImage {
    Flat(GfxTexArray2D),
    Mipmapped(GfxMipArray2D),
}

/// 每纹理的 host 元数据，engine lock 保护。
pub(crate) struct TextureMeta {
    pub source: TextureSource,
    pub desc: TextureDesc,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub num_mip_levels: u32,
    pub memory_usage: usize,
    pub last_used_frame: u32,
    pub loaded_frame: u32,
    pub gpu: Option<LoadedTexture>,
    pub last_error: Option<LoaderError>,
}

impl TextureMeta {
    pub fn new(source: TextureSource, desc: TextureDesc) -> Self {
        let (width, height, channels) = match &source {
            TextureSource::Memory {
                width,
                height,
                channels,
                ..
            } => (*width, *height, *channels),
            _ => (0, 0, 0),
        };
        Self {
            source,
            desc,
            width,
            height,
            channels,
            num_mip_levels: 0,
            memory_usage: 0,
            last_used_frame: 0,
            loaded_frame: 0,
            gpu: None,
            last_error: None,
        }
    }
}

/// 每 id 一份的原子状态，放在 engine lock 之外。
///
/// `loading` 是 worker 之间 lock-free 的认领协议（compare-exchange，
/// 同一 id 只有一个 worker 能赢）；`resident` 是原子的，统计路径读它
/// 不需要拿锁。
#[derive(Default)]
pub(crate) struct TextureFlags {
    pub resident: AtomicBool,
    pub loading: AtomicBool,
}

/// id 分配与去重。engine lock 下访问。
///
/// id 按分配顺序单调递增，引擎生命期内绝不复用：unload 只清驻留，
/// 不回收 id。
pub(crate) struct TextureRegistry {
    textures: Vec<TextureMeta>,
    max_textures: usize,
    /// 路径去重。直接拿 PathBuf 当 key（本身就是 hash map over path）。
    by_path: HashMap<PathBuf, u32>,
    /// 内容哈希去重；0 = 未知，永不入表。
    by_hash: HashMap<u64, u32>,
    /// 同一个 reader 对象指针的快速去重。
    by_reader: HashMap<usize, u32>,
}

impl TextureRegistry {
    pub fn new(max_textures: usize) -> Self {
        Self {
            textures: Vec::new(),
            max_textures,
            by_path: HashMap::new(),
            by_hash: HashMap::new(),
            by_reader: HashMap::new(),
        }
    }

    /// 已分配的 id 数量；合法 id 恒小于它。
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.textures.len() as u32
    }

    pub fn get(&self, tex_id: u32) -> Option<&TextureMeta> {
        self.textures.get(tex_id as usize)
    }

    pub fn get_mut(&mut self, tex_id: u32) -> Option<&mut TextureMeta> {
        self.textures.get_mut(tex_id as usize)
    }

    pub fn allocate(&mut self, meta: TextureMeta) -> Result<u32, LoaderError> {
        if self.textures.len() >= self.max_textures {
            return Err(LoaderError::MaxTexturesExceeded);
        }
        let id = self.textures.len() as u32;
        self.textures.push(meta);
        Ok(id)
    }

    pub fn lookup_path(&self, path: &Path) -> Option<u32> {
        self.by_path.get(path).copied()
    }

    pub fn register_path(&mut self, path: PathBuf, tex_id: u32) {
        self.by_path.insert(path, tex_id);
    }

    pub fn lookup_hash(&self, hash: u64) -> Option<u32> {
        if hash == 0 {
            return None;
        }
        self.by_hash.get(&hash).copied()
    }

    pub fn register_hash(&mut self, hash: u64, tex_id: u32) {
        if hash != 0 {
            self.by_hash.insert(hash, tex_id);
        }
    }

    pub fn lookup_reader(&self, reader: &Arc<dyn ImageReader>) -> Option<u32> {
        self.by_reader.get(&Self::reader_key(reader)).copied()
    }

    pub fn register_reader(&mut self, reader: &Arc<dyn ImageReader>, tex_id: u32) {
        self.by_reader.insert(Self::reader_key(reader), tex_id);
    }

    #[inline]
    fn reader_key(reader: &Arc<dyn ImageReader>) -> usize {
        Arc::as_ptr(reader) as *const () as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirage_image::CheckerImageReader;

    fn meta() -> TextureMeta {
        TextureMeta::new(
            TextureSource::Memory {
                pixels: Arc::from(vec![0u8; 4].into_boxed_slice()),
                width: 1,
                height: 1,
                channels: 4,
            },
            TextureDesc::default(),
        )
    }

    #[test]
    fn ids_are_dense_and_capped() {
        let mut registry = TextureRegistry::new(2);
        assert_eq!(registry.allocate(meta()).unwrap(), 0);
        assert_eq!(registry.allocate(meta()).unwrap(), 1);
        assert_eq!(registry.allocate(meta()), Err(LoaderError::MaxTexturesExceeded));
        assert_eq!(registry.allocated(), 2);
    }

    #[test]
    fn hash_zero_never_matches() {
        let mut registry = TextureRegistry::new(8);
        registry.register_hash(0, 3);
        assert_eq!(registry.lookup_hash(0), None);

        registry.register_hash(0xAA, 1);
        assert_eq!(registry.lookup_hash(0xAA), Some(1));
    }

    #[test]
    fn reader_lookup_is_by_object_identity() {
        let mut registry = TextureRegistry::new(8);
        let a: Arc<dyn ImageReader> = Arc::new(CheckerImageReader::new(4, 4, 4, 1, 0xAA));
        let b: Arc<dyn ImageReader> = Arc::new(CheckerImageReader::new(4, 4, 4, 1, 0xAA));

        registry.register_reader(&a, 0);
        assert_eq!(registry.lookup_reader(&a), Some(0));
        // 内容相同但对象不同：指针去重不命中（交给内容哈希那一层）
        assert_eq!(registry.lookup_reader(&b), None);
    }

    #[test]
    fn path_lookup() {
        let mut registry = TextureRegistry::new(8);
        registry.register_path(PathBuf::from("assets/wood.png"), 5);
        assert_eq!(registry.lookup_path(Path::new("assets/wood.png")), Some(5));
        assert_eq!(registry.lookup_path(Path::new("assets/stone.png")), None);
    }
}
