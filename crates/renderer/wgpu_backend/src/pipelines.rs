//! Shaders and render pipeline construction.
//!
//! Both shader programs share one vertex stage over `renderer::Vertex`.
//! Colors arrive premultiplied and targets are non-sRGB, so fragments are
//! written without conversion.

use core::mem;
use renderer::{ShaderKind, Vertex};
use std::borrow::Cow;
use wgpu::*;

const SHADER_WGSL: &str = r"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) tex_coord: vec2<f32>,
};

@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) tex_coord: vec2<f32>,
) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.color = color;
    out.tex_coord = tex_coord;
    return out;
}

@fragment
fn fs_color(in: VertexOut) -> @location(0) vec4<f32> {
    return in.color;
}

@group(0) @binding(0) var t_color: texture_2d<f32>;
@group(0) @binding(1) var t_sampler: sampler;

@fragment
fn fs_textured(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(t_color, t_sampler, in.tex_coord) * in.color;
}
";

const VERTEX_ATTRIBUTES: [VertexAttribute; 3] = [
    VertexAttribute {
        format: VertexFormat::Float32x2,
        offset: 0,
        shader_location: 0,
    },
    VertexAttribute {
        format: VertexFormat::Float32x4,
        offset: 8,
        shader_location: 1,
    },
    VertexAttribute {
        format: VertexFormat::Float32x2,
        offset: 24,
        shader_location: 2,
    },
];

pub fn create_shader(device: &Device) -> ShaderModule {
    device.create_shader_module(ShaderModuleDescriptor {
        label: Some("rasterizer-shader"),
        source: ShaderSource::Wgsl(Cow::Borrowed(SHADER_WGSL)),
    })
}

/// Layout of the texture and sampler sampled by `TexturedQuad`.
pub fn create_texture_bind_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("tex-bind-layout"),
        entries: &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

/// Nearest filtering, matching `CpuDevice`.
pub fn create_nearest_sampler(device: &Device) -> Sampler {
    device.create_sampler(&SamplerDescriptor {
        label: Some("nearest-sampler"),
        mag_filter: FilterMode::Nearest,
        min_filter: FilterMode::Nearest,
        mipmap_filter: FilterMode::Nearest,
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        address_mode_w: AddressMode::ClampToEdge,
        ..SamplerDescriptor::default()
    })
}

pub struct PipelineParams<'params> {
    pub shader: &'params ShaderModule,
    pub layout: &'params PipelineLayout,
    pub kind: ShaderKind,
    pub blend: bool,
    pub format: TextureFormat,
}

pub fn build_pipeline(device: &Device, params: &PipelineParams<'_>) -> RenderPipeline {
    let fragment_entry = match params.kind {
        ShaderKind::ColorFill => "fs_color",
        ShaderKind::TexturedQuad => "fs_textured",
    };
    let vertex_buffers = [VertexBufferLayout {
        array_stride: mem::size_of::<Vertex>() as BufferAddress,
        step_mode: VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }];
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(fragment_entry),
        layout: Some(params.layout),
        vertex: VertexState {
            module: params.shader,
            entry_point: Some("vs_main"),
            buffers: &vertex_buffers,
            compilation_options: PipelineCompilationOptions::default(),
        },
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            ..PrimitiveState::default()
        },
        depth_stencil: None,
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            module: params.shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(ColorTargetState {
                format: params.format,
                // Source-over on premultiplied color, or plain replacement.
                blend: params
                    .blend
                    .then_some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}
