//! mip 链的尺寸计算和 host 侧 2×2 box 下采样。

use crate::desc::TextureDesc;

pub(crate) const BYTES_PER_PIXEL: usize = 4;

/// 完整 mip 链的层数：`1 + floor(log2(max(w, h)))`。
pub(crate) fn mip_level_count(width: u32, height: u32) -> u32 {
    let mut levels = 1;
    let (mut w, mut h) = (width, height);
    while w > 1 || h > 1 {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        levels += 1;
    }
    levels
}

#[inline]
pub(crate) fn level_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// 前 `levels` 层的总字节数，`w_k = max(1, w >> k)`。
pub(crate) fn mip_chain_bytes(width: u32, height: u32, levels: u32) -> usize {
    (0..levels)
        .map(|k| {
            let (w, h) = level_extent(width, height, k);
            w as usize * h as usize * BYTES_PER_PIXEL
        })
        .sum()
}

/// 该描述符下纹理驻留时会占用的字节数。驱逐预算用它做预估，加载完成后
/// 记账也用同一套公式。
pub(crate) fn projected_texture_bytes(width: u32, height: u32, desc: &TextureDesc) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    if desc.generate_mipmaps && (width > 1 || height > 1) {
        mip_chain_bytes(width, height, clamped_level_count(width, height, desc))
    } else {
        width as usize * height as usize * BYTES_PER_PIXEL
    }
}

pub(crate) fn clamped_level_count(width: u32, height: u32, desc: &TextureDesc) -> u32 {
    let full = mip_level_count(width, height);
    if desc.max_mip_level > 0 {
        full.min(desc.max_mip_level)
    } else {
        full
    }
}

/// 2×2 box filter 下采样一层。
///
/// 奇数尺寸时边缘的 2×2 块会越界，按实际覆盖到的 texel 数取平均。
/// 返回 (像素, 宽, 高)。
pub(crate) fn downsample_box(prev: &[u8], prev_w: u32, prev_h: u32) -> (Vec<u8>, u32, u32) {
    let w = (prev_w / 2).max(1);
    let h = (prev_h / 2).max(1);
    let mut out = vec![0u8; w as usize * h as usize * BYTES_PER_PIXEL];

    for y in 0..h {
        for x in 0..w {
            let sx = x * 2;
            let sy = y * 2;
            for c in 0..BYTES_PER_PIXEL {
                let mut sum = 0u32;
                let mut count = 0u32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        if sx + dx < prev_w && sy + dy < prev_h {
                            let idx = (((sy + dy) * prev_w + sx + dx) as usize) * BYTES_PER_PIXEL + c;
                            sum += prev[idx] as u32;
                            count += 1;
                        }
                    }
                }
                out[((y * w + x) as usize) * BYTES_PER_PIXEL + c] = (sum / count) as u8;
            }
        }
    }

    (out, w, h)
}
