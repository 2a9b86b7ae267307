//! Instance, adapter, device and queue creation.

use anyhow::{Context as _, Result as AnyResult, anyhow};
use pollster::block_on;
use std::sync::Arc;
use wgpu::{
    Adapter, AdapterInfo, Backends, Device, DeviceDescriptor, Instance, InstanceDescriptor,
    InstanceFlags, Limits, PowerPreference, Queue, RequestAdapterOptions, Surface,
};
use winit::window::Window;

/// Owns the wgpu device and queue. The instance is kept alive for as long
/// as any surface created from it.
pub struct GpuContext {
    _instance: Instance,
    adapter: Adapter,
    device: Arc<Device>,
    queue: Queue,
}

impl GpuContext {
    /// Context without a presentable surface, for offscreen rendering.
    ///
    /// # Errors
    /// Returns an error if no adapter is available or device creation fails.
    pub fn headless() -> AnyResult<Self> {
        let instance = Self::create_instance();
        block_on(Self::initialize(instance, None))
    }

    /// Context able to present to `window`, together with the window's surface.
    ///
    /// # Errors
    /// Returns an error if the surface, adapter or device cannot be created.
    pub fn for_window(window: Arc<Window>) -> AnyResult<(Self, Surface<'static>)> {
        let instance = Self::create_instance();
        let surface = instance
            .create_surface(window)
            .context("creating window surface")?;
        let context = block_on(Self::initialize(instance, Some(&surface)))?;
        Ok((context, surface))
    }

    fn create_instance() -> Instance {
        Instance::new(&InstanceDescriptor {
            backends: Backends::PRIMARY | Backends::GL,
            flags: InstanceFlags::from_build_config(),
            ..InstanceDescriptor::default()
        })
    }

    async fn initialize(instance: Instance, surface: Option<&Surface<'static>>) -> AnyResult<Self> {
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| anyhow!("Failed to find a suitable GPU adapter: {err}"))?;
        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("rasterizer-device"),
                required_limits: Limits::downlevel_defaults().using_resolution(adapter.limits()),
                ..DeviceDescriptor::default()
            })
            .await
            .map_err(|err| anyhow!("Failed to create GPU device: {err}"))?;
        device.on_uncaptured_error(Box::new(|error| {
            log::error!(target: "wgpu_renderer", "Uncaptured WGPU error: {error}");
        }));
        let info = adapter.get_info();
        log::info!(
            target: "wgpu_renderer",
            "using adapter {} ({:?})",
            info.name,
            info.backend
        );
        Ok(Self {
            _instance: instance,
            adapter,
            device: Arc::new(device),
            queue,
        })
    }

    #[inline]
    pub const fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub const fn queue(&self) -> &Queue {
        &self.queue
    }

    #[inline]
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.adapter.get_info()
    }
}
