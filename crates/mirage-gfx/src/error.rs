/// GPU 后端的错误分类。
///
/// 故意只保留引擎需要区分的几类：OOM 要映射成单个纹理的加载失败，
/// 其余都属于“GPU API 出错”这一大类。
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxError {
    #[error("device out of memory")]
    OutOfMemory,

    #[error("invalid or destroyed gfx resource")]
    InvalidResource,

    #[error("operation not supported by this backend")]
    Unsupported,

    #[error("gfx backend operation failed")]
    Failed,
}

pub type GfxResult<T> = Result<T, GfxError>;
