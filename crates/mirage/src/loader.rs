//! 解码 + host→device 上传 + mip 合成。
//!
//! 认领协议：`loading` 标志上的 compare-exchange 保证同一个 id 只有一个
//! worker 干活，输家直接返回。像素解码和 GPU 上传都在 engine lock 之外，
//! 只有快照和发布两个临界区拿锁。

use std::sync::atomic::Ordering;

use mirage_gfx::{GfxMipArray2D, GfxResult, GfxSamplerDesc, GfxTexArray2D, GfxTexSampler};
use mirage_image::{FsImageReader, ImageReader};

use crate::desc::TextureDesc;
use crate::engine::EngineInner;
use crate::error::LoaderError;
use crate::mipmap;
use crate::registry::{LoadedTexture, TexImage, TextureSource};

/// 解码完成的 RGBA8 像素。
#[derive(Debug)]
struct DecodedImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

/// 1/3 通道输入展开成 RGBA：灰度复制到 RGB，alpha 填 255。
fn expand_to_rgba(src: &[u8], width: u32, height: u32, channels: u32) -> Vec<u8> {
    let texels = width as usize * height as usize;
    match channels {
        4 => src[..texels * 4].to_vec(),
        3 => {
            let mut out = vec![255u8; texels * 4];
            for i in 0..texels {
                out[i * 4..i * 4 + 3].copy_from_slice(&src[i * 3..i * 3 + 3]);
            }
            out
        }
        _ => {
            let mut out = vec![255u8; texels * 4];
            for i in 0..texels {
                out[i * 4] = src[i];
                out[i * 4 + 1] = src[i];
                out[i * 4 + 2] = src[i];
            }
            out
        }
    }
}

fn decode_reader(reader: &dyn ImageReader) -> Result<DecodedImage, LoaderError> {
    let info = if reader.is_open() {
        reader.info()
    } else {
        reader.open().map_err(|e| LoaderError::from_image(&e))?
    };
    if !info.is_valid || info.width == 0 || info.height == 0 {
        return Err(LoaderError::ImageLoadFailed);
    }

    let (w, h) = (info.width, info.height);
    let texels = w as usize * h as usize;
    match info.num_channels {
        4 => {
            let mut pixels = vec![0u8; texels * 4];
            reader
                .read_mip_level(&mut pixels, 0, w, h)
                .map_err(|e| LoaderError::from_image(&e))?;
            Ok(DecodedImage {
                pixels,
                width: w,
                height: h,
            })
        }
        c @ (1 | 3) => {
            let mut native = vec![0u8; texels * c as usize];
            reader
                .read_mip_level(&mut native, 0, w, h)
                .map_err(|e| LoaderError::from_image(&e))?;
            Ok(DecodedImage {
                pixels: expand_to_rgba(&native, w, h, c),
                width: w,
                height: h,
            })
        }
        _ => Err(LoaderError::ImageLoadFailed),
    }
}

impl EngineInner {
    /// 加载一个 id。成功发布返回 true；id 已被别人认领/已驻留/失败都
    /// 返回 false。
    pub(crate) fn load_texture(&self, tex_id: u32) -> bool {
        if self.is_aborted() {
            return false;
        }

        let flags = self.flags(tex_id);
        if flags.resident.load(Ordering::Acquire) || flags.loading.load(Ordering::Acquire) {
            return false;
        }
        if flags
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // 另一个 worker 赢了认领
            return false;
        }

        // 拿锁做来源快照，解码在锁外进行
        let (source, desc) = {
            let state = self.lock_state();
            if flags.resident.load(Ordering::Acquire) {
                flags.loading.store(false, Ordering::Release);
                return false;
            }
            match state.registry.get(tex_id) {
                Some(meta) => (meta.source.clone(), meta.desc),
                None => {
                    flags.loading.store(false, Ordering::Release);
                    return false;
                }
            }
        };

        let decoded = match decode_source(&source) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::error!("load_texture: decode failed for id={}: {}", tex_id, err);
                self.fail_load(tex_id, err);
                return false;
            }
        };

        match create_gpu_texture(self, &desc, decoded) {
            Ok(upload) => {
                self.publish_loaded(tex_id, upload);
                true
            }
            Err(err) => {
                // RAII 已释放半成品资源
                log::error!("load_texture: gpu upload failed for id={}: {}", tex_id, err);
                self.fail_load(tex_id, LoaderError::from_gfx(err));
                false
            }
        }
    }
}

fn decode_source(source: &TextureSource) -> Result<DecodedImage, LoaderError> {
    match source {
        TextureSource::Reader(reader) => decode_reader(reader.as_ref()),
        TextureSource::Path(path) => {
            let reader = FsImageReader::new(path.clone());
            decode_reader(&reader)
        }
        TextureSource::Memory {
            pixels,
            width,
            height,
            channels,
        } => Ok(DecodedImage {
            pixels: expand_to_rgba(pixels, *width, *height, *channels),
            width: *width,
            height: *height,
        }),
    }
}

/// 加载产物：GPU 资源加上发布需要的元数据。
pub(crate) struct UploadedTexture {
    pub gpu: LoadedTexture,
    pub width: u32,
    pub height: u32,
    pub num_mip_levels: u32,
    pub memory_usage: usize,
}

fn create_gpu_texture(engine: &EngineInner, desc: &TextureDesc, decoded: DecodedImage) -> GfxResult<UploadedTexture> {
    let (w, h) = (decoded.width, decoded.height);
    let device = engine.device();
    let use_mips = desc.generate_mipmaps && (w > 1 || h > 1);

    let mut sampler_desc = GfxSamplerDesc {
        address_mode: desc.address_mode,
        filter_mode: desc.filter_mode,
        mip_filter_mode: desc.mip_filter_mode,
        normalized_coords: desc.normalized_coords,
        srgb: desc.srgb,
        max_mip_clamp: 0,
    };

    if use_mips {
        let levels = mipmap::clamped_level_count(w, h, desc);
        sampler_desc.max_mip_clamp = levels - 1;

        let array = GfxMipArray2D::new(device, w, h, levels)?;
        array.upload_level(0, &decoded.pixels, w, h)?;

        let mut current = decoded.pixels;
        let (mut cw, mut ch) = (w, h);
        for level in 1..levels {
            let (next, nw, nh) = mipmap::downsample_box(&current, cw, ch);
            array.upload_level(level, &next, nw, nh)?;
            current = next;
            cw = nw;
            ch = nh;
        }

        let sampler = GfxTexSampler::new_mipmapped(device, &array, &sampler_desc)?;
        Ok(UploadedTexture {
            gpu: LoadedTexture {
                sampler,
                image: TexImage::Mipmapped(array),
            },
            width: w,
            height: h,
            num_mip_levels: levels,
            memory_usage: mipmap::mip_chain_bytes(w, h, levels),
        })
    } else {
        let array = GfxTexArray2D::new(device, w, h)?;
        array.upload(&decoded.pixels)?;
        let sampler = GfxTexSampler::new_flat(device, &array, &sampler_desc)?;
        Ok(UploadedTexture {
            gpu: LoadedTexture {
                sampler,
                image: TexImage::Flat(array),
            },
            width: w,
            height: h,
            num_mip_levels: 1,
            memory_usage: w as usize * h as usize * mipmap::BYTES_PER_PIXEL,
        })
    }
}
