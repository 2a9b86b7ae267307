//! Render pipelines per shader program, blend mode and target format.

use crate::pipelines::{
    PipelineParams, build_pipeline, create_nearest_sampler, create_shader,
    create_texture_bind_layout,
};
use renderer::ShaderKind;
use std::collections::HashMap;
use wgpu::{
    BindGroupLayout, Device, PipelineLayout, PipelineLayoutDescriptor, RenderPipeline, Sampler,
    ShaderModule, TextureFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub kind: ShaderKind,
    pub blend: bool,
    pub format: TextureFormat,
}

/// Pipelines are built on first use and kept for the device's lifetime.
pub struct PipelineCache {
    shader: ShaderModule,
    texture_bind_layout: BindGroupLayout,
    color_layout: PipelineLayout,
    textured_layout: PipelineLayout,
    sampler: Sampler,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: &Device) -> Self {
        let texture_bind_layout = create_texture_bind_layout(device);
        let color_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("color-pipeline-layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });
        let textured_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("tex-pipeline-layout"),
            bind_group_layouts: &[&texture_bind_layout],
            push_constant_ranges: &[],
        });
        Self {
            shader: create_shader(device),
            texture_bind_layout,
            color_layout,
            textured_layout,
            sampler: create_nearest_sampler(device),
            pipelines: HashMap::new(),
        }
    }

    /// Build the pipeline for `key` if it does not exist yet.
    pub fn ensure(&mut self, device: &Device, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        log::debug!(target: "wgpu_renderer", "building pipeline {key:?}");
        let layout = match key.kind {
            ShaderKind::ColorFill => &self.color_layout,
            ShaderKind::TexturedQuad => &self.textured_layout,
        };
        let pipeline = build_pipeline(
            device,
            &PipelineParams {
                shader: &self.shader,
                layout,
                kind: key.kind,
                blend: key.blend,
                format: key.format,
            },
        );
        self.pipelines.insert(key, pipeline);
    }

    pub fn get(&self, key: PipelineKey) -> Option<&RenderPipeline> {
        self.pipelines.get(&key)
    }

    #[inline]
    pub const fn texture_bind_layout(&self) -> &BindGroupLayout {
        &self.texture_bind_layout
    }

    #[inline]
    pub const fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
