use log::{debug, info};

use super::builder::PSpec;
use super::multipass::BindingTable;
use crate::definitions::{BindingKind, Definitions};
use crate::error::Error;
use crate::reflect::{SampleKind, StorageTextureAccess, TextureDimension, TextureKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceType {
    UniformBuffer { size: u64 },
    StorageBuffer { size: u64, read_only: bool },
    Sampler { comparison: bool },
    Texture(TextureKind),
}

#[derive(Debug, Clone)]
pub struct ResourceBinding {
    pub binding: u32,
    pub name: String,
    pub resource_type: ResourceType,
}

/// The single bind-group layout shared by every pipeline of a build, plus
/// the reorder table that turns it into `N` bind groups.
#[derive(Debug)]
pub struct ResourceLayout {
    pub bindings: Vec<ResourceBinding>,
    pub table: BindingTable,
}

impl ResourceLayout {
    /// Validates `spec` and derives the layout. Touches no device.
    pub fn from_spec(spec: &PSpec) -> Result<Self, Error> {
        validate(spec)?;
        let table = BindingTable::resolve(&spec.bindings, &spec.defs)?;
        let bindings = spec
            .defs
            .bindings()
            .into_iter()
            .map(|b| {
                let resource_type = match b.kind {
                    BindingKind::Uniform(var) => ResourceType::UniformBuffer {
                        size: var.byte_size(1),
                    },
                    BindingKind::Storage(var) => {
                        let length = spec.storage(b.name).map_or(0, |s| s.size);
                        ResourceType::StorageBuffer {
                            size: var.byte_size(length),
                            read_only: var.access != Some(crate::reflect::Access::ReadWrite),
                        }
                    }
                    BindingKind::Sampler(s) => ResourceType::Sampler {
                        comparison: s.comparison,
                    },
                    BindingKind::Texture(t) => ResourceType::Texture(t.kind.clone()),
                };
                ResourceBinding {
                    binding: b.binding,
                    name: b.name.to_string(),
                    resource_type,
                }
            })
            .collect();
        info!(
            "ResourceLayout::from_spec, {} bindings, {} groups",
            spec.defs.bind_group_length,
            table.groups()
        );
        Ok(Self { bindings, table })
    }

    pub fn get_binding(&self, binding: u32) -> Option<&ResourceBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn get_binding_by_name(&self, name: &str) -> Option<&ResourceBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn create_bind_group_layout(&self, device: &wgpu::Device) -> Result<wgpu::BindGroupLayout, Error> {
        let entries = (0..self.table.slots())
            .map(|slot| {
                let index = self.table.layout_binding(slot);
                let binding = self
                    .get_binding(index)
                    .ok_or_else(|| Error::validation(format!("no resource at binding {index}")))?;
                create_layout_entry(binding)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        debug!("bind group layout with {} entries", entries.len());
        Ok(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shared Group 0 Layout"),
            entries: &entries,
        }))
    }
}

fn create_layout_entry(binding: &ResourceBinding) -> Result<wgpu::BindGroupLayoutEntry, Error> {
    let all = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE;
    // writable storage is not allowed in the vertex stage
    let writable = wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE;
    let (visibility, ty) = match &binding.resource_type {
        ResourceType::UniformBuffer { .. } => (
            all,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        ),
        ResourceType::StorageBuffer { read_only, .. } => (
            if *read_only { all } else { writable },
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: *read_only,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        ),
        ResourceType::Sampler { comparison } => (
            all,
            wgpu::BindingType::Sampler(if *comparison {
                wgpu::SamplerBindingType::Comparison
            } else {
                wgpu::SamplerBindingType::Filtering
            }),
        ),
        ResourceType::Texture(kind) => match &kind.storage {
            Some(storage) => (
                if storage.access == StorageTextureAccess::Read { all } else { writable },
                wgpu::BindingType::StorageTexture {
                    access: match storage.access {
                        StorageTextureAccess::Read => wgpu::StorageTextureAccess::ReadOnly,
                        StorageTextureAccess::Write => wgpu::StorageTextureAccess::WriteOnly,
                        StorageTextureAccess::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
                    },
                    format: texel_format(&storage.format).ok_or_else(|| {
                        Error::Compatibility(format!(
                            "storage texture `{}` uses unsupported format `{}`",
                            binding.name, storage.format
                        ))
                    })?,
                    view_dimension: view_dimension(kind.dimension),
                },
            ),
            None => (
                all,
                wgpu::BindingType::Texture {
                    multisampled: kind.multisampled,
                    sample_type: match kind.sample {
                        SampleKind::Float => wgpu::TextureSampleType::Float { filterable: true },
                        SampleKind::Sint => wgpu::TextureSampleType::Sint,
                        SampleKind::Uint => wgpu::TextureSampleType::Uint,
                        SampleKind::Depth => wgpu::TextureSampleType::Depth,
                    },
                    view_dimension: view_dimension(kind.dimension),
                },
            ),
        },
    };
    Ok(wgpu::BindGroupLayoutEntry {
        binding: binding.binding,
        visibility,
        ty,
        count: None,
    })
}

pub fn view_dimension(dimension: TextureDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureDimension::D1 => wgpu::TextureViewDimension::D1,
        TextureDimension::D2 => wgpu::TextureViewDimension::D2,
        TextureDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        TextureDimension::D3 => wgpu::TextureViewDimension::D3,
        TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
        TextureDimension::CubeArray => wgpu::TextureViewDimension::CubeArray,
    }
}

/// Maps a WGSL texel format name to its wgpu format.
pub fn texel_format(name: &str) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    Some(match name {
        "rgba8unorm" => F::Rgba8Unorm,
        "rgba8snorm" => F::Rgba8Snorm,
        "rgba8uint" => F::Rgba8Uint,
        "rgba8sint" => F::Rgba8Sint,
        "bgra8unorm" => F::Bgra8Unorm,
        "rgba16uint" => F::Rgba16Uint,
        "rgba16sint" => F::Rgba16Sint,
        "rgba16float" => F::Rgba16Float,
        "r32uint" => F::R32Uint,
        "r32sint" => F::R32Sint,
        "r32float" => F::R32Float,
        "rg32uint" => F::Rg32Uint,
        "rg32sint" => F::Rg32Sint,
        "rg32float" => F::Rg32Float,
        "rgba32uint" => F::Rgba32Uint,
        "rgba32sint" => F::Rgba32Sint,
        "rgba32float" => F::Rgba32Float,
        _ => return None,
    })
}

/// Checks a spec against its definitions before anything is allocated.
pub fn validate(spec: &PSpec) -> Result<(), Error> {
    let defs: &Definitions = &spec.defs;

    if let Some(b) = defs.bindings().iter().find(|b| b.group != 0) {
        return Err(Error::validation(format!(
            "`{}` is declared in @group({}); all resources must be in @group(0)",
            b.name, b.group
        )));
    }

    match (&defs.entries.vertex, &defs.entries.fragment) {
        (Some(v), None) => {
            return Err(Error::validation(format!(
                "vertex entry point `{}` has no fragment entry point",
                v.name
            )))
        }
        (None, Some(f)) => {
            return Err(Error::validation(format!(
                "fragment entry point `{}` has no vertex entry point",
                f.name
            )))
        }
        _ => {}
    }
    if defs.entries.vertex.is_none() && defs.entries.computes.is_empty() {
        return Err(Error::validation("the shader declares no entry point"));
    }

    for entry in &defs.entries.computes {
        if spec.compute(&entry.name).is_none() {
            return Err(Error::validation(format!(
                "compute entry point `{}` has no dispatch in the spec",
                entry.name
            )));
        }
    }
    for compute in &spec.computes {
        if !defs.entries.computes.iter().any(|e| e.name == compute.name) {
            return Err(Error::validation(format!(
                "dispatch `{}` names no compute entry point",
                compute.name
            )));
        }
    }

    for (name, var) in &defs.storages {
        let storage = spec
            .storage(name)
            .ok_or_else(|| Error::resource(format!("storage `{name}` has no spec entry")))?;
        if var.is_runtime_sized() && storage.size == 0 {
            return Err(Error::validation(format!(
                "runtime-sized storage `{name}` needs a non-zero size"
            )));
        }
    }
    for storage in &spec.storages {
        if !defs.storages.contains_key(&storage.name) {
            return Err(Error::validation(format!(
                "storage spec `{}` names no declared storage",
                storage.name
            )));
        }
    }
    if spec.storages.iter().filter(|s| s.vertex).count() > 1 {
        return Err(Error::validation("at most one storage can be the vertex buffer"));
    }

    for texture in &defs.textures {
        if texture.kind.external {
            return Err(Error::Compatibility(format!(
                "external texture `{}` is not supported",
                texture.name
            )));
        }
        let given = spec
            .texture(&texture.name)
            .ok_or_else(|| Error::resource(format!("texture `{}` has no spec entry", texture.name)))?;
        if given.storage != texture.kind.storage.is_some() {
            return Err(Error::validation(format!(
                "texture `{}` storage flag does not match its declaration",
                texture.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::builder::{ComputeSpec, StorageSpec};
    use crate::error::ErrorKind;

    fn spec(source: &str) -> PSpec {
        PSpec::from_source(source).unwrap()
    }

    #[test]
    fn vertex_without_fragment_fails_validation() {
        let err = validate(&spec(
            "@vertex fn vs() -> @builtin(position) vec4f { return vec4f(0.0); }",
        ))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("`vs`"));
    }

    #[test]
    fn compute_entries_need_dispatches() {
        let source = "@compute @workgroup_size(64) fn step() {}";
        assert!(validate(&spec(source)).is_err());
        assert!(validate(&spec(source).with_compute(ComputeSpec::new("step", [1, 1, 1]))).is_ok());
        let extra = spec(source)
            .with_compute(ComputeSpec::new("step", [1, 1, 1]))
            .with_compute(ComputeSpec::new("other", [1, 1, 1]));
        assert!(validate(&extra).is_err());
    }

    #[test]
    fn storages_need_spec_entries() {
        let source = "@group(0) @binding(0) var<storage, read_write> cells: array<u32>;\n\
                      @compute @workgroup_size(64) fn step() {}";
        let base = || spec(source).with_compute(ComputeSpec::new("step", [1, 1, 1]));
        assert_eq!(validate(&base()).unwrap_err().kind(), ErrorKind::Resource);
        assert!(validate(&base().with_storage(StorageSpec::new("cells", 0))).is_err());
        assert!(validate(&base().with_storage(StorageSpec::new("cells", 16))).is_ok());
    }

    #[test]
    fn other_groups_are_rejected() {
        let err = validate(&spec(
            "@group(1) @binding(0) var<uniform> u: f32;\n@compute @workgroup_size(1) fn c() {}",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("@group(1)"));
    }

    #[test]
    fn layout_sizes_follow_spec_lengths() {
        let layout = ResourceLayout::from_spec(
            &spec(
                "@group(0) @binding(0) var<uniform> sys: vec2u;\n\
                 @group(0) @binding(1) var<storage, read_write> cells: array<u32>;\n\
                 @compute @workgroup_size(64) fn step() {}",
            )
            .with_compute(ComputeSpec::new("step", [1, 1, 1]))
            .with_storage(StorageSpec::new("cells", 64)),
        )
        .unwrap();
        assert_eq!(
            layout.get_binding_by_name("cells").unwrap().resource_type,
            ResourceType::StorageBuffer {
                size: 256,
                read_only: false
            }
        );
        assert_eq!(
            layout.get_binding(0).unwrap().resource_type,
            ResourceType::UniformBuffer { size: 8 }
        );
        assert_eq!(layout.table.groups(), 1);
    }

    #[test]
    fn texel_formats() {
        assert_eq!(texel_format("rgba8unorm"), Some(wgpu::TextureFormat::Rgba8Unorm));
        assert_eq!(texel_format("r32float"), Some(wgpu::TextureFormat::R32Float));
        assert_eq!(texel_format("rgb10a2unorm"), None);
    }
}
