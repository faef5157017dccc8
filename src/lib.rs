use std::sync::Arc;

use crossbeam::channel::{self, Receiver};
use log::{info, warn};
use winit::window::Window;

pub use app::ShaderApp;
pub use compute::*;
pub use definitions::Definitions;
pub use driver::*;
pub use error::{Error, ErrorKind, ErrorRecord, ErrorSink, FatalPolicy};
pub use hot::ShaderHotReload;
pub use keyinputs::{KeyCommand, KeyInputHandler};
pub use mouse::{MouseState, MouseTracker};
pub use uniforms::SystemUniforms;
pub use view::{BufferView, Value};

/// Device, queue and (when windowed) the configured surface.
pub struct Core {
    pub device: Arc<wgpu::Device>,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub surface: Option<wgpu::Surface<'static>>,
    pub config: Option<wgpu::SurfaceConfiguration>,
    pub size: winit::dpi::PhysicalSize<u32>,
    pub window: Option<Arc<Window>>,
    lost: Receiver<String>,
}

impl Core {
    /// Acquires an adapter compatible with `window` and configures its surface.
    pub async fn new(window: Arc<Window>) -> Result<Self, Error> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| Error::Initialization(format!("surface: {e}")))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Initialization(e.to_string()))?;
        let (device, queue, lost) = Self::request_device(&adapter).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| Error::Compatibility("surface supports no formats".to_string()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            device,
            queue,
            adapter_info: adapter.get_info(),
            surface: Some(surface),
            config: Some(config),
            size,
            window: Some(window),
            lost,
        })
    }

    /// A device without a surface, for offscreen work and tests.
    pub async fn headless(width: u32, height: u32) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| Error::Initialization(e.to_string()))?;
        let (device, queue, lost) = Self::request_device(&adapter).await?;
        Ok(Self {
            device,
            queue,
            adapter_info: adapter.get_info(),
            surface: None,
            config: None,
            size: winit::dpi::PhysicalSize::new(width, height),
            window: None,
            lost,
        })
    }

    async fn request_device(adapter: &wgpu::Adapter) -> Result<(Arc<wgpu::Device>, wgpu::Queue, Receiver<String>), Error> {
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("refract device"),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Initialization(e.to_string()))?;
        let info = adapter.get_info();
        info!("Core: {} ({:?})", info.name, info.backend);

        let (tx, lost) = channel::bounded(1);
        device.set_device_lost_callback(move |reason, message| {
            warn!("device lost: {reason:?} {message}");
            let _ = tx.try_send(format!("{reason:?}: {message}"));
        });
        Ok((Arc::new(device), queue, lost))
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    /// Format render targets should use.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.config
            .as_ref()
            .map_or(wgpu::TextureFormat::Rgba8UnormSrgb, |c| c.format)
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        if let (Some(surface), Some(config)) = (&self.surface, &mut self.config) {
            config.width = new_size.width;
            config.height = new_size.height;
            surface.configure(&self.device, config);
        }
    }

    /// The reason the device was lost, once.
    pub fn device_lost(&self) -> Option<String> {
        self.lost.try_recv().ok()
    }
}

mod app;
pub mod compute;
pub mod definitions;
mod driver;
pub mod error;
pub mod file_log;
mod hot;
mod keyinputs;
mod mouse;
pub mod reflect;
mod renderer;
pub mod shader;
mod texture;
mod uniforms;
pub mod view;
pub mod wgsl;
