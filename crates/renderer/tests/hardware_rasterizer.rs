use anyhow::Result as AnyResult;
use render_tree::{
    AlphaFormat, ColorRGBA, FilterNode, ImageData, Node, NodeRef, PointF, Rect, RectF, RectNode,
    ResourceProvider, Size,
};
use renderer::{
    Canvas, CpuDevice, FallbackRasterizer, GpuDevice, HardwareRasterizer, RasterizerConfig,
    RenderTarget, SoftwareRasterizer, SubmitOptions,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

const TARGET_SIZE: Size = Size::new(48, 48);

fn init_logging() {
    let _init = env_logger::builder().is_test(true).try_init();
}

fn rasterizer_with(
    config: RasterizerConfig,
    preserve: bool,
) -> (HardwareRasterizer<CpuDevice>, RenderTarget) {
    init_logging();
    let mut rasterizer = HardwareRasterizer::new(CpuDevice::new(), config);
    let target = rasterizer
        .device_mut()
        .create_render_target(TARGET_SIZE, preserve);
    (rasterizer, target)
}

fn rasterizer() -> (HardwareRasterizer<CpuDevice>, RenderTarget) {
    rasterizer_with(RasterizerConfig::default(), true)
}

fn pixel(
    rasterizer: &HardwareRasterizer<CpuDevice>,
    target: &RenderTarget,
    x: u32,
    y: u32,
) -> [u8; 4] {
    rasterizer.device().surface_pixel(target, x, y).unwrap()
}

fn assert_close(actual: [u8; 4], expected: [u8; 4]) {
    let close = actual
        .iter()
        .zip(expected)
        .all(|(channel, want)| channel.abs_diff(want) <= 2);
    assert!(close, "expected {expected:?}, got {actual:?}");
}

fn full_rect(color: ColorRGBA) -> NodeRef {
    Node::solid_rect(RectF::new(0.0, 0.0, 48.0, 48.0), color)
}

/// A rect with rounded corners, which only the fallback rasterizer draws.
fn rounded(rect: RectF, color: ColorRGBA) -> NodeRef {
    Node::rect(
        RectNode::new(rect)
            .with_background(color)
            .with_corner_radius(2.0),
    )
}

#[test]
fn empty_tree_is_cleared_and_presented() {
    let config = RasterizerConfig {
        clear_color: ColorRGBA::WHITE,
        ..RasterizerConfig::default()
    };
    let (mut rasterizer, target) = rasterizer_with(config, true);
    rasterizer
        .submit(&Node::composition(Vec::new()), &target, SubmitOptions::default())
        .unwrap();

    assert_eq!(pixel(&rasterizer, &target, 0, 0), [255, 255, 255, 255]);
    assert_eq!(pixel(&rasterizer, &target, 47, 47), [255, 255, 255, 255]);
    assert_eq!(rasterizer.device().stats().swaps, 1);
    assert_eq!(rasterizer.metrics().draw_calls, 0);
    assert!(!rasterizer.device().is_current());
}

#[test]
fn draws_keep_tree_order_across_fallback_content() {
    let (mut rasterizer, target) = rasterizer();
    let tree = Node::composition(vec![
        Node::solid_rect(RectF::new(0.0, 0.0, 20.0, 20.0), ColorRGBA::RED),
        rounded(RectF::new(10.0, 10.0, 20.0, 20.0), ColorRGBA::BLUE),
        Node::solid_rect(RectF::new(20.0, 20.0, 20.0, 20.0), ColorRGBA::GREEN),
    ]);
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();

    assert_eq!(pixel(&rasterizer, &target, 5, 5), [255, 0, 0, 255]);
    assert_eq!(pixel(&rasterizer, &target, 15, 15), [0, 0, 255, 255]);
    assert_eq!(pixel(&rasterizer, &target, 25, 25), [0, 255, 0, 255]);
    assert_eq!(pixel(&rasterizer, &target, 45, 5), [0, 0, 0, 0]);
    assert_eq!(rasterizer.metrics().fallback_rasterizations, 1);
}

#[test]
fn fallback_content_is_rasterized_once_and_reused() {
    let (mut rasterizer, target) = rasterizer();
    let badge = rounded(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::BLUE);
    let tree = Node::composition(vec![
        Arc::clone(&badge),
        Node::composition_with_offset(vec![Arc::clone(&badge)], PointF::new(20.0, 20.0)),
    ]);

    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    let first = rasterizer.metrics();
    // The second placement differs by a whole-pixel translation only.
    assert_eq!(first.fallback_rasterizations, 1);
    assert_eq!(first.offscreen_misses, 1);
    assert_eq!(first.offscreen_hits, 1);
    assert_eq!(pixel(&rasterizer, &target, 5, 5), [0, 0, 255, 255]);
    assert_eq!(pixel(&rasterizer, &target, 25, 25), [0, 0, 255, 255]);

    for _ in 0..3 {
        rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
        let metrics = rasterizer.metrics();
        assert_eq!(metrics.fallback_rasterizations, 0);
        assert_eq!(metrics.offscreen_misses, 0);
        assert_eq!(metrics.offscreen_hits, 2);
        assert_eq!(metrics.canvas_uploads, 0);
    }
    assert_eq!(pixel(&rasterizer, &target, 25, 25), [0, 0, 255, 255]);
    assert!(rasterizer.offscreen_stats().hit_rate() > 85.0);
}

/// Software fallback that counts what the hardware rasterizer asks of it.
struct CountingFallback {
    inner: SoftwareRasterizer,
    submissions: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl FallbackRasterizer for CountingFallback {
    fn advance_frame(&mut self) {
        self.inner.advance_frame();
    }

    fn submit_offscreen(&mut self, node: &Node, canvas: &mut Canvas) -> AnyResult<()> {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        self.inner.submit_offscreen(node, canvas)
    }

    fn reset_context(&mut self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.inner.reset_context();
    }

    fn resource_provider(&self) -> Arc<dyn ResourceProvider> {
        self.inner.resource_provider()
    }
}

#[test]
fn repeated_subtrees_reach_the_fallback_once_per_frame() {
    init_logging();
    let submissions = Arc::new(AtomicUsize::new(0));
    let resets = Arc::new(AtomicUsize::new(0));
    let fallback = CountingFallback {
        inner: SoftwareRasterizer::new(1 << 20),
        submissions: Arc::clone(&submissions),
        resets: Arc::clone(&resets),
    };
    let mut rasterizer = HardwareRasterizer::with_fallback(
        CpuDevice::new(),
        RasterizerConfig::default(),
        Box::new(fallback),
    );
    let target = rasterizer
        .device_mut()
        .create_render_target(TARGET_SIZE, true);

    let badge = rounded(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::BLUE);
    let tree = Node::composition(vec![
        Arc::clone(&badge),
        Arc::clone(&badge),
        Node::composition_with_offset(vec![badge], PointF::new(12.0, 0.0)),
    ]);

    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    assert_eq!(submissions.load(Ordering::Relaxed), 1);
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    assert_eq!(submissions.load(Ordering::Relaxed), 1);
    assert_eq!(rasterizer.metrics().offscreen_hits, 3);
    // The context is handed back once per frame.
    assert_eq!(resets.load(Ordering::Relaxed), 2);
}

#[test]
fn fractional_offsets_rasterize_separately() {
    let (mut rasterizer, target) = rasterizer();
    let badge = rounded(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::BLUE);
    let tree = Node::composition(vec![
        Arc::clone(&badge),
        Node::composition_with_offset(vec![Arc::clone(&badge)], PointF::new(20.5, 20.0)),
    ]);
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    assert_eq!(rasterizer.metrics().fallback_rasterizations, 2);
}

#[test]
fn dirty_region_is_redrawn_on_preserved_targets() {
    let (mut rasterizer, target) = rasterizer_with(RasterizerConfig::default(), true);
    rasterizer
        .submit(&full_rect(ColorRGBA::RED), &target, SubmitOptions::default())
        .unwrap();
    let before = rasterizer.device().read_surface_pixels(&target).unwrap();

    // Fallback and opacity-group content both straddle the dirty rect's edges.
    let dirty = Rect::new(16, 16, 16, 16);
    let tree = Node::composition(vec![
        full_rect(ColorRGBA::BLUE),
        rounded(RectF::new(8.0, 8.0, 16.0, 16.0), ColorRGBA::GREEN),
        Node::filter(
            FilterNode::new(Node::composition(vec![
                Node::solid_rect(RectF::new(24.0, 24.0, 20.0, 20.0), ColorRGBA::WHITE),
                Node::solid_rect(RectF::new(28.0, 28.0, 20.0, 20.0), ColorRGBA::BLACK),
            ]))
            .with_opacity(0.5),
        ),
    ]);
    let options = SubmitOptions { dirty: Some(dirty) };
    rasterizer.submit(&tree, &target, options).unwrap();
    assert_eq!(rasterizer.metrics().fallback_rasterizations, 1);
    assert_eq!(rasterizer.metrics().composition_targets, 1);

    let after = rasterizer.device().read_surface_pixels(&target).unwrap();
    let width = TARGET_SIZE.width as usize;
    let mut changed_inside = 0;
    for (index, (old, new)) in before.chunks_exact(4).zip(after.chunks_exact(4)).enumerate() {
        let (x, y) = ((index % width) as i32, (index / width) as i32);
        let inside = dirty.contains_point(x, y);
        if inside {
            changed_inside += usize::from(old != new);
        } else {
            assert_eq!(old, new, "pixel ({x}, {y}) outside the dirty rect changed");
        }
    }
    assert_eq!(changed_inside, 16 * 16);
    assert_eq!(pixel(&rasterizer, &target, 20, 20), [0, 255, 0, 255]);
    assert_eq!(pixel(&rasterizer, &target, 17, 30), [0, 0, 255, 255]);
}

#[test]
fn dirty_region_is_ignored_when_contents_are_lost() {
    let (mut rasterizer, target) = rasterizer_with(RasterizerConfig::default(), false);
    rasterizer
        .submit(&full_rect(ColorRGBA::RED), &target, SubmitOptions::default())
        .unwrap();

    let options = SubmitOptions {
        dirty: Some(Rect::new(0, 0, 8, 8)),
    };
    rasterizer
        .submit(&full_rect(ColorRGBA::BLUE), &target, options)
        .unwrap();
    assert_eq!(pixel(&rasterizer, &target, 4, 4), [0, 0, 255, 255]);
    assert_eq!(pixel(&rasterizer, &target, 20, 20), [0, 0, 255, 255]);
}

#[test]
fn foreign_state_changes_are_restored() {
    let (mut rasterizer, target) = rasterizer();
    rasterizer
        .submit(&full_rect(ColorRGBA::RED), &target, SubmitOptions::default())
        .unwrap();

    // Another user of the context leaves a tiny scissor and no program.
    let device = rasterizer.device_mut();
    device.make_current(Some(&target));
    device.set_scissor(Rect::new(0, 0, 1, 1));
    device.use_program(None);
    device.set_blend_enabled(true);
    device.release_current();
    rasterizer.invalidate_state();

    rasterizer
        .submit(&full_rect(ColorRGBA::GREEN), &target, SubmitOptions::default())
        .unwrap();
    assert_eq!(pixel(&rasterizer, &target, 30, 30), [0, 255, 0, 255]);
}

#[test]
fn opacity_groups_match_with_and_without_composition() {
    let group = || {
        Node::filter(
            FilterNode::new(Node::composition(vec![
                Node::solid_rect(RectF::new(0.0, 0.0, 20.0, 20.0), ColorRGBA::BLUE),
                Node::solid_rect(RectF::new(10.0, 10.0, 20.0, 20.0), ColorRGBA::RED),
            ]))
            .with_opacity(0.5),
        )
    };

    let (mut composed, composed_target) = rasterizer();
    composed
        .submit(&group(), &composed_target, SubmitOptions::default())
        .unwrap();
    assert_eq!(composed.metrics().composition_targets, 1);
    assert_eq!(composed.metrics().fallback_rasterizations, 0);

    let config = RasterizerConfig {
        offscreen_composition: false,
        ..RasterizerConfig::default()
    };
    let (mut fallback, fallback_target) = rasterizer_with(config, true);
    fallback
        .submit(&group(), &fallback_target, SubmitOptions::default())
        .unwrap();
    assert_eq!(fallback.metrics().composition_targets, 0);
    assert_eq!(fallback.metrics().fallback_rasterizations, 1);

    // The overlap shows only the top rect, at half strength.
    for (x, y, expected) in [
        (5, 5, [0, 0, 128, 128]),
        (15, 15, [128, 0, 0, 128]),
        (25, 25, [128, 0, 0, 128]),
    ] {
        assert_close(pixel(&composed, &composed_target, x, y), expected);
        assert_close(pixel(&fallback, &fallback_target, x, y), expected);
    }
}

#[test]
fn images_are_drawn_from_textures() {
    let (mut rasterizer, target) = rasterizer();
    let image = rasterizer
        .resource_provider()
        .create_image(ImageData {
            size: Size::new(2, 1),
            alpha_format: AlphaFormat::Premultiplied,
            pixels: vec![255, 0, 0, 255, 0, 255, 0, 255],
        })
        .unwrap();
    let tree = Node::image(image, RectF::new(0.0, 0.0, 20.0, 10.0));
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();

    assert_eq!(pixel(&rasterizer, &target, 2, 5), [255, 0, 0, 255]);
    assert_eq!(pixel(&rasterizer, &target, 17, 5), [0, 255, 0, 255]);
    assert_eq!(rasterizer.metrics().fallback_rasterizations, 0);
}

#[test]
fn text_goes_through_the_fallback() {
    let (mut rasterizer, target) = rasterizer();
    let provider = rasterizer.resource_provider();
    let glyphs = provider.create_glyph_buffer("HI", provider.create_font(14.0));
    let tree = Node::text(glyphs, PointF::new(4.0, 20.0), ColorRGBA::BLACK);
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();

    assert_eq!(rasterizer.metrics().fallback_rasterizations, 1);
    let pixels = rasterizer.device().read_surface_pixels(&target).unwrap();
    let inked = pixels.chunks_exact(4).filter(|pixel| pixel[3] > 0).count();
    assert!(inked > 10, "expected glyph coverage, got {inked} pixels");
}

#[test]
fn redundant_state_is_not_reissued() {
    let (mut rasterizer, target) = rasterizer();
    let tree = Node::composition(
        (0..8)
            .map(|index| {
                Node::solid_rect(
                    RectF::new(index as f32 * 4.0, 0.0, 4.0, 4.0),
                    ColorRGBA::RED,
                )
            })
            .collect(),
    );
    rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
    // Eight opaque rects with one program merge into a single draw.
    assert_eq!(rasterizer.metrics().draw_calls, 1);
    assert_eq!(rasterizer.metrics().vertices, 48);
}

#[test]
#[should_panic(expected = "render thread")]
fn submitting_from_a_second_thread_panics() {
    let (rasterizer, target) = rasterizer();
    let tree = full_rect(ColorRGBA::RED);
    let moved_tree = Arc::clone(&tree);
    let mut rasterizer = thread::spawn(move || {
        let mut rasterizer = rasterizer;
        rasterizer
            .submit(&moved_tree, &target, SubmitOptions::default())
            .unwrap();
        rasterizer
    })
    .join()
    .unwrap();

    rasterizer
        .submit(&tree, &target, SubmitOptions::default())
        .unwrap();
}
