use crate::error::LoaderError;

/// 纹理创建的同步结果。
///
/// `valid == false` 时 `error` 给出原因；`valid == true` 且 `error` 非
/// None 表示纹理已登记但探测元数据时出了问题（例如文件不存在），加载
/// 会在首次请求时再试并记录错误。
#[derive(Clone, Copy, Debug, Default)]
pub struct TextureHandle {
    pub id: u32,
    pub valid: bool,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub error: Option<LoaderError>,
}

impl TextureHandle {
    pub(crate) fn invalid(error: LoaderError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}
