//! Texture readback from GPU to CPU.

use crate::error::submit_with_validation;
use anyhow::{Result as AnyResult, anyhow};
use render_tree::Size;
use std::sync::Arc;
use std::sync::mpsc::channel;
use wgpu::*;

/// Copy an RGBA8 texture into tightly packed rows.
///
/// # Errors
/// Returns an error if submission, polling or buffer mapping fails.
pub fn readback_texture(
    device: &Arc<Device>,
    queue: &Queue,
    texture: &Texture,
    size: Size,
) -> AnyResult<Vec<u8>> {
    let bytes_per_pixel: u32 = 4;
    let row_bytes: u32 = size.width * bytes_per_pixel;
    let padded_bpr: u32 =
        row_bytes.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT;
    let readback = device.create_buffer(&BufferDescriptor {
        label: Some("readback"),
        size: u64::from(padded_bpr) * u64::from(size.height),
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("readback-encoder"),
    });
    encoder.copy_texture_to_buffer(
        TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        TexelCopyBufferInfo {
            buffer: &readback,
            layout: TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(size.height),
            },
        },
        Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    );
    submit_with_validation(device, queue, "readback", [encoder.finish()])?;

    let slice = readback.slice(..);
    let (sender, receiver) = channel();
    slice.map_async(MapMode::Read, move |res| {
        drop(sender.send(res));
    });
    device
        .poll(PollType::Wait)
        .map_err(|err| anyhow!("waiting for readback: {err}"))?;
    receiver
        .recv()
        .map_err(|err| anyhow!("readback callback dropped: {err}"))??;

    let mapped = slice.get_mapped_range();
    let row_len = row_bytes as usize;
    let mut data = Vec::with_capacity(row_len * size.height as usize);
    for row in mapped.chunks(padded_bpr as usize).take(size.height as usize) {
        data.extend_from_slice(&row[..row_len]);
    }
    drop(mapped);
    readback.unmap();
    Ok(data)
}
