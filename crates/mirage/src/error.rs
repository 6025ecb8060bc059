use mirage_gfx::GfxError;

/// 加载器的错误分类。
///
/// 创建期的失败通过 [`crate::TextureHandle::error`] 同步返回；加载期的
/// 失败记录在对应纹理上（下一帧的新请求会重试），不会让
/// `process_requests` 整体失败。
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    #[error("invalid texture id")]
    InvalidTextureId,

    #[error("maximum texture count exceeded")]
    MaxTexturesExceeded,

    #[error("file not found")]
    FileNotFound,

    #[error("image load failed")]
    ImageLoadFailed,

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid parameter")]
    InvalidParameter,

    /// GPU API 层面的通用失败。
    #[error("gfx error: {0}")]
    Gfx(#[from] GfxError),
}

impl LoaderError {
    /// 把后端错误折叠成加载器的分类：OOM 保持可识别，其余归为 Gfx。
    pub(crate) fn from_gfx(err: GfxError) -> Self {
        match err {
            GfxError::OutOfMemory => LoaderError::OutOfMemory,
            other => LoaderError::Gfx(other),
        }
    }

    pub(crate) fn from_image(err: &mirage_image::ImageError) -> Self {
        match err {
            mirage_image::ImageError::FileNotFound(_) => LoaderError::FileNotFound,
            _ => LoaderError::ImageLoadFailed,
        }
    }
}
