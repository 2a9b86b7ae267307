use render_tree::{ColorRGBA, Node, PointF, Rect, RectF, RectNode, Size};
use renderer::{GpuDevice, HardwareRasterizer, RasterizerConfig, RenderTarget, SubmitOptions};
use std::sync::Arc;
use wgpu_backend::WgpuDevice;

const TARGET_SIZE: Size = Size::new(64, 32);

/// A headless device, or `None` on machines without a usable adapter.
fn device() -> Option<WgpuDevice> {
    let _init = env_logger::builder().is_test(true).try_init();
    match WgpuDevice::new_headless() {
        Ok(device) => Some(device),
        Err(err) => {
            log::warn!(target: "wgpu_renderer", "skipping wgpu test: {err:#}");
            None
        }
    }
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let start = ((y * TARGET_SIZE.width + x) * 4) as usize;
    [
        pixels[start],
        pixels[start + 1],
        pixels[start + 2],
        pixels[start + 3],
    ]
}

fn assert_close(actual: [u8; 4], expected: [u8; 4]) {
    let close = actual
        .iter()
        .zip(expected)
        .all(|(channel, want)| channel.abs_diff(want) <= 3);
    assert!(close, "expected {expected:?}, got {actual:?}");
}

fn read(rasterizer: &mut HardwareRasterizer<WgpuDevice>, target: &RenderTarget) -> Vec<u8> {
    rasterizer.device_mut().read_target_pixels(target).unwrap()
}

#[test]
fn solid_rects_reach_the_presented_buffer() {
    let Some(device) = device() else {
        return;
    };
    let mut rasterizer = HardwareRasterizer::new(device, RasterizerConfig::default());
    let target = rasterizer
        .device_mut()
        .create_headless_target(TARGET_SIZE, true);
    let tree = Node::composition(vec![
        Node::solid_rect(RectF::new(0.0, 0.0, 32.0, 32.0), ColorRGBA::RED),
        Node::solid_rect(
            RectF::new(16.0, 0.0, 32.0, 32.0),
            ColorRGBA::BLUE.with_opacity(0.5),
        ),
    ]);
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();

    let pixels = read(&mut rasterizer, &target);
    assert_eq!(pixels.len(), 64 * 32 * 4);
    assert_close(pixel(&pixels, 4, 4), [255, 0, 0, 255]);
    assert_close(pixel(&pixels, 20, 4), [128, 0, 128, 255]);
    assert_close(pixel(&pixels, 40, 4), [0, 0, 128, 128]);
    assert_close(pixel(&pixels, 60, 4), [0, 0, 0, 0]);
    assert_eq!(rasterizer.device().stats().swaps, 1);
}

#[test]
fn fallback_content_is_cached_in_offscreen_atlases() {
    let Some(device) = device() else {
        return;
    };
    let mut rasterizer = HardwareRasterizer::new(device, RasterizerConfig::default());
    let target = rasterizer
        .device_mut()
        .create_headless_target(TARGET_SIZE, true);
    let badge = Node::rect(
        RectNode::new(RectF::new(0.0, 0.0, 12.0, 12.0))
            .with_background(ColorRGBA::GREEN)
            .with_corner_radius(2.0),
    );
    let tree = Node::composition(vec![
        Arc::clone(&badge),
        Node::composition_with_offset(vec![badge], PointF::new(30.0, 10.0)),
    ]);

    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    assert_eq!(rasterizer.metrics().fallback_rasterizations, 1);
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    assert_eq!(rasterizer.metrics().fallback_rasterizations, 0);
    assert_eq!(rasterizer.metrics().offscreen_hits, 2);

    let pixels = read(&mut rasterizer, &target);
    assert_close(pixel(&pixels, 6, 6), [0, 255, 0, 255]);
    assert_close(pixel(&pixels, 36, 16), [0, 255, 0, 255]);
    assert_close(pixel(&pixels, 20, 28), [0, 0, 0, 0]);
}

#[test]
fn recycled_framebuffers_start_transparent() {
    let Some(mut device) = device() else {
        return;
    };
    device.make_current(None);
    let first = device.create_framebuffer(Size::new(8, 8));
    device.bind_framebuffer(Some(first));
    device.set_scissor(Rect::new(0, 0, 8, 8));
    device.clear([1.0, 0.0, 0.0, 1.0]);
    device.delete_framebuffer(first);

    let second = device.create_framebuffer(Size::new(8, 8));
    assert!(device.framebuffer_texture(second).is_some());
    assert_eq!(device.reused_framebuffer_textures(), 1);
    device.finish().unwrap();
    device.release_current();
}
