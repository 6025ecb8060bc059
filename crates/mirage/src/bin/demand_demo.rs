//! 在 host 后端上跑一个小型按需加载场景：
//! 模拟 kernel 对一组棋盘格纹理采样，观察逐帧的加载、预算驱逐与
//! 异步 ticket 路径。

use std::sync::Arc;

use anyhow::Result;

use mirage::{sampling, EngineOptions, MirageEngine, TextureDesc};
use mirage_gfx::{GfxDevice, GfxStream, HostBackend};
use mirage_image::CheckerImageReader;

fn main() -> Result<()> {
    mirage_crate_tools::init_log();

    let backend = Arc::new(HostBackend::new());
    let device = GfxDevice::new(backend.clone());
    let stream = GfxStream::new(&device)?;

    let engine = MirageEngine::new(
        &device,
        EngineOptions {
            max_textures: 64,
            max_requests_per_launch: 256,
            // 预算压到只够一部分纹理，逼出驱逐
            max_texture_memory: 6 * 256 * 256 * 4,
            min_resident_frames: 1,
            ..Default::default()
        },
    )?;

    // 十张内容不同的棋盘格纹理（哈希互不相同，各占一个 id）
    let mut tex_ids = Vec::new();
    for i in 0..10u64 {
        let reader = Arc::new(
            CheckerImageReader::new(256, 256, 4, 16 + i as u32 * 4, 0x1000 + i)
                .with_colors([255, (i * 25) as u8, 0, 255], [0, 0, (255 - i * 20) as u8, 255]),
        );
        let handle = engine.create_texture_with_reader(reader, TextureDesc::default());
        anyhow::ensure!(handle.valid, "texture creation failed: {:?}", handle.error);
        tex_ids.push(handle.id);
    }

    let ctx = engine.device_context();

    for frame_index in 0..6usize {
        engine.launch_prepare(&stream)?;

        // 每帧访问一个滑动窗口，制造 working set 的变化
        let window = &tex_ids[(frame_index * 2) % 5..][..5.min(tex_ids.len())];
        let mut missed = 0;
        for &tex_id in window {
            for sample_index in 0..4 {
                let u = sample_index as f32 / 4.0;
                let color = sampling::tex2d(&backend, &ctx, tex_id, u, 0.5);
                if color == sampling::DEFAULT_COLOR {
                    missed += 1;
                }
            }
        }

        // 偶数帧走同步路径，奇数帧走异步 ticket
        let loaded = if frame_index % 2 == 0 {
            engine.process_requests(&stream, &ctx)
        } else {
            let ticket = engine.process_requests_async(&stream, &ctx);
            ticket.wait(None)?;
            0
        };

        log::info!(
            "frame {}: misses={} loaded={} resident={} memory={:.1} KB overflow={}",
            frame_index,
            missed,
            loaded,
            engine.resident_texture_count(),
            engine.total_texture_memory() as f64 / 1024.0,
            engine.had_request_overflow(),
        );
    }

    engine.abort();
    log::info!("demo finished, engine drained");
    Ok(())
}
