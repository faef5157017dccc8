use log::{debug, info};

use crate::compute::builder::{AddressMode, Filter, SamplerSpec, TextureSource};
use crate::compute::resource::{texel_format, view_dimension};
use crate::error::Error;
use crate::reflect::{SampleKind, TextureDimension, TextureKind};

/// A device texture with its default view.
pub struct TextureManager {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

impl TextureManager {
    /// Allocates a texture for `kind` and uploads its initial contents.
    pub fn from_source(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        name: &str,
        source: &mut TextureSource,
        kind: &TextureKind,
    ) -> Result<Self, Error> {
        let format = texture_format(name, kind)?;
        let (width, height, pixels) = match source {
            TextureSource::Encoded(bytes) => {
                let image = image::load_from_memory(bytes)
                    .map_err(|e| Error::resource(format!("texture `{name}`: {e}")))?
                    .to_rgba8();
                let (w, h) = image.dimensions();
                (w, h, Some(image.into_raw()))
            }
            TextureSource::Rgba8 {
                width,
                height,
                pixels,
            } => {
                let expected = *width as usize * *height as usize * 4;
                if pixels.len() != expected {
                    return Err(Error::validation(format!(
                        "texture `{name}` has {} bytes, {width}x{height} RGBA needs {expected}",
                        pixels.len()
                    )));
                }
                (*width, *height, Some(pixels.clone()))
            }
            TextureSource::Blank { width, height } => (*width, *height, None),
            TextureSource::Stream(stream) => {
                let (w, h) = stream.size();
                (w, h, stream.next_frame())
            }
        };
        if width == 0 || height == 0 {
            return Err(Error::validation(format!("texture `{name}` has an empty size")));
        }

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if kind.storage.is_some() {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(name),
            dimension: Some(view_dimension(kind.dimension)),
            ..Default::default()
        });
        info!("TextureManager::from_source, {name}: {width}x{height} {format:?}");

        let manager = Self {
            texture,
            view,
            width,
            height,
            format,
        };
        if let Some(pixels) = pixels {
            manager.write_rgba(queue, &pixels);
        }
        Ok(manager)
    }

    /// Uploads a full RGBA8 frame. Only valid for 4-byte texel formats.
    pub fn write_rgba(&self, queue: &wgpu::Queue, pixels: &[u8]) {
        if self.format.block_copy_size(None) != Some(4) {
            debug!("skipping RGBA upload into {:?}", self.format);
            return;
        }
        let expected = self.width as usize * self.height as usize * 4;
        if pixels.len() < expected {
            debug!("skipping short frame of {} bytes, need {expected}", pixels.len());
            return;
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels[..expected],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.width),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

fn texture_format(name: &str, kind: &TextureKind) -> Result<wgpu::TextureFormat, Error> {
    if kind.dimension != TextureDimension::D2 || kind.multisampled {
        return Err(Error::Compatibility(format!(
            "texture `{name}`: only single-sampled 2d textures can be created from data"
        )));
    }
    if let Some(storage) = &kind.storage {
        return texel_format(&storage.format).ok_or_else(|| {
            Error::Compatibility(format!(
                "texture `{name}` uses unsupported format `{}`",
                storage.format
            ))
        });
    }
    match kind.sample {
        SampleKind::Float => Ok(wgpu::TextureFormat::Rgba8Unorm),
        SampleKind::Uint => Ok(wgpu::TextureFormat::Rgba8Uint),
        SampleKind::Sint => Ok(wgpu::TextureFormat::Rgba8Sint),
        SampleKind::Depth => Err(Error::Compatibility(format!(
            "depth texture `{name}` cannot be created from data"
        ))),
    }
}

pub fn create_sampler(device: &wgpu::Device, spec: &SamplerSpec, comparison: bool) -> wgpu::Sampler {
    let filter = match spec.filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    };
    let address_mode = match spec.address_mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(&spec.name),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        compare: comparison.then_some(wgpu::CompareFunction::LessEqual),
        ..Default::default()
    })
}
