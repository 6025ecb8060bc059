use std::path::PathBuf;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("reader is not open")]
    NotOpen,

    #[error("destination size or expected extent does not match the image")]
    BadDimensions,

    #[error("mip level {0} is not available from this reader")]
    BadMipLevel(u32),
}

pub type ImageResult<T> = Result<T, ImageError>;
