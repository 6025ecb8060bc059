//! 图像读取层。
//!
//! [`ImageReader`] 是缓存引擎消费像素的唯一入口：文件、程序化生成或者
//! 应用自定义的流式来源都以同一个 trait 出现。所有方法都是 `&self`，
//! 因为引擎以 `Arc` 共享 reader 并从多个 loader worker 并发调用。

mod checker_reader;
mod error;
mod fs_reader;
mod reader;

pub use checker_reader::CheckerImageReader;
pub use error::{ImageError, ImageResult};
pub use fs_reader::FsImageReader;
pub use reader::{ImageReader, PixelFormat, TextureInfo};
