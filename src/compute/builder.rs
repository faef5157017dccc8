use std::fmt;

use crate::definitions::Definitions;
use crate::view::Value;

/// Produces the caller's uniform values for a frame number.
pub type UniformFn = Box<dyn FnMut(u64) -> Value>;
/// Receives pointer positions in pixels.
pub type PointerFn = Box<dyn FnMut(f32, f32)>;

/// A texture whose contents change over time, re-uploaded every frame.
pub trait FrameSource {
    /// `(width, height)` of the frames.
    fn size(&self) -> (u32, u32);
    /// Next RGBA8 frame, `None` when nothing changed.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Initial data of one storage buffer.
#[derive(Debug, Clone)]
pub struct StorageSpec {
    pub name: String,
    /// Element count of a runtime-sized array.
    pub size: u32,
    pub data: Option<Value>,
    /// Copied back to the host after every frame.
    pub read: bool,
    /// Also bound as the per-instance vertex buffer.
    pub vertex: bool,
}

impl StorageSpec {
    pub fn new(name: &str, size: u32) -> Self {
        Self {
            name: name.to_string(),
            size,
            data: None,
            read: false,
            vertex: false,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn readable(mut self) -> Self {
        self.read = true;
        self
    }

    pub fn as_vertex(mut self) -> Self {
        self.vertex = true;
        self
    }
}

/// One compute entry point to dispatch every step.
#[derive(Debug, Clone)]
pub struct ComputeSpec {
    pub name: String,
    pub workgroups: [u32; 3],
    /// Number of invocations wanted along x; overrides `workgroups[0]` with
    /// `ceil(instances / workgroup_size.x)`.
    pub instances: Option<u32>,
}

impl ComputeSpec {
    pub fn new(name: &str, workgroups: [u32; 3]) -> Self {
        Self {
            name: name.to_string(),
            workgroups,
            instances: None,
        }
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = Some(instances);
        self
    }

    /// Workgroup counts to dispatch for an entry point of the given size.
    pub fn dispatch(&self, workgroup_size: [u32; 3]) -> [u32; 3] {
        match self.instances {
            Some(instances) => [
                instances.div_ceil(workgroup_size[0].max(1)).max(1),
                self.workgroups[1].max(1),
                self.workgroups[2].max(1),
            ],
            None => self.workgroups.map(|w| w.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Clone)]
pub struct SamplerSpec {
    pub name: String,
    pub filter: Filter,
    pub address_mode: AddressMode,
}

impl SamplerSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            filter: Filter::default(),
            address_mode: AddressMode::default(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_address_mode(mut self, address_mode: AddressMode) -> Self {
        self.address_mode = address_mode;
        self
    }
}

pub enum TextureSource {
    /// PNG or JPEG bytes.
    Encoded(Vec<u8>),
    Rgba8 { width: u32, height: u32, pixels: Vec<u8> },
    /// A zeroed texture, typically a storage texture target.
    Blank { width: u32, height: u32 },
    Stream(Box<dyn FrameSource>),
}

impl fmt::Debug for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoded(bytes) => write!(f, "Encoded({} bytes)", bytes.len()),
            Self::Rgba8 { width, height, .. } => write!(f, "Rgba8({width}x{height})"),
            Self::Blank { width, height } => write!(f, "Blank({width}x{height})"),
            Self::Stream(source) => write!(f, "Stream({:?})", source.size()),
        }
    }
}

#[derive(Debug)]
pub struct TextureSpec {
    pub name: String,
    pub data: TextureSource,
    /// Bound as a storage texture.
    pub storage: bool,
}

impl TextureSpec {
    pub fn new(name: &str, data: TextureSource) -> Self {
        Self {
            name: name.to_string(),
            data,
            storage: false,
        }
    }

    pub fn as_storage(mut self) -> Self {
        self.storage = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    TriangleList,
    #[default]
    TriangleStrip,
    LineList,
    PointList,
}

/// What the render pass draws.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub vertex_count: u32,
    /// Defaults to the length of the vertex storage or of `instance_data`.
    pub instance_count: Option<u32>,
    pub topology: Topology,
    /// Static per-instance attributes, used when no storage is marked
    /// `vertex`. Laid out like the vertex entry's `@location` inputs.
    pub instance_data: Option<Vec<f32>>,
}

impl Default for Geometry {
    fn default() -> Self {
        // full screen quad as a strip
        Self {
            vertex_count: 4,
            instance_count: None,
            topology: Topology::TriangleStrip,
            instance_data: None,
        }
    }
}

impl Geometry {
    pub fn new(vertex_count: u32, topology: Topology) -> Self {
        Self {
            vertex_count,
            topology,
            ..Self::default()
        }
    }

    pub fn with_instances(mut self, count: u32) -> Self {
        self.instance_count = Some(count);
        self
    }

    pub fn with_instance_data(mut self, data: Vec<f32>) -> Self {
        self.instance_data = Some(data);
        self
    }
}

/// Everything needed to build a [`ShaderInstance`](super::ShaderInstance).
pub struct PSpec {
    pub code: String,
    pub defs: Definitions,
    pub uniforms: Option<UniformFn>,
    pub pointer: Option<PointerFn>,
    pub geometry: Geometry,
    pub storages: Vec<StorageSpec>,
    pub samplers: Vec<SamplerSpec>,
    pub textures: Vec<TextureSpec>,
    pub computes: Vec<ComputeSpec>,
    /// Requested compute steps per frame, rounded up at build time.
    pub compute_group_count: Option<u32>,
    /// Binding reorder table, one row per bind group.
    pub bindings: Vec<Vec<u32>>,
    pub clear_color: [f64; 4],
    pub target_format: wgpu::TextureFormat,
    pub label: String,
}

impl fmt::Debug for PSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PSpec")
            .field("label", &self.label)
            .field("geometry", &self.geometry)
            .field("storages", &self.storages)
            .field("samplers", &self.samplers)
            .field("textures", &self.textures)
            .field("computes", &self.computes)
            .field("compute_group_count", &self.compute_group_count)
            .field("bindings", &self.bindings)
            .field("target_format", &self.target_format)
            .finish_non_exhaustive()
    }
}

impl PSpec {
    pub fn new(code: impl Into<String>, defs: Definitions) -> Self {
        Self {
            code: code.into(),
            defs,
            uniforms: None,
            pointer: None,
            geometry: Geometry::default(),
            storages: Vec::new(),
            samplers: Vec::new(),
            textures: Vec::new(),
            computes: Vec::new(),
            compute_group_count: None,
            bindings: Vec::new(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            target_format: wgpu::TextureFormat::Bgra8UnormSrgb,
            label: "refract".to_string(),
        }
    }

    /// Reflects `code` and uses the result as the definitions.
    pub fn from_source(code: impl Into<String>) -> Result<Self, crate::Error> {
        let code = code.into();
        let defs = Definitions::from_source(&code)?;
        Ok(Self::new(code, defs))
    }

    pub fn with_uniforms(mut self, uniforms: impl FnMut(u64) -> Value + 'static) -> Self {
        self.uniforms = Some(Box::new(uniforms));
        self
    }

    pub fn with_pointer(mut self, pointer: impl FnMut(f32, f32) + 'static) -> Self {
        self.pointer = Some(Box::new(pointer));
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_storage(mut self, storage: StorageSpec) -> Self {
        self.storages.push(storage);
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerSpec) -> Self {
        self.samplers.push(sampler);
        self
    }

    pub fn with_texture(mut self, texture: TextureSpec) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn with_compute(mut self, compute: ComputeSpec) -> Self {
        self.computes.push(compute);
        self
    }

    pub fn with_compute_group_count(mut self, count: u32) -> Self {
        self.compute_group_count = Some(count);
        self
    }

    pub fn with_bindings(mut self, bindings: Vec<Vec<u32>>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_clear_color(mut self, color: [f64; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_target_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.target_format = format;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn storage(&self, name: &str) -> Option<&StorageSpec> {
        self.storages.iter().find(|s| s.name == name)
    }

    pub fn compute(&self, name: &str) -> Option<&ComputeSpec> {
        self.computes.iter().find(|c| c.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureSpec> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn sampler(&self, name: &str) -> Option<&SamplerSpec> {
        self.samplers.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_override_x_workgroups() {
        let c = ComputeSpec::new("step", [3, 2, 0]).with_instances(100);
        assert_eq!(c.dispatch([64, 1, 1]), [2, 2, 1]);
        let plain = ComputeSpec::new("step", [3, 2, 0]);
        assert_eq!(plain.dispatch([64, 1, 1]), [3, 2, 1]);
    }

    #[test]
    fn builder_collects_entries() {
        let spec = PSpec::new("", Definitions::default())
            .with_storage(StorageSpec::new("cells", 64).readable())
            .with_compute(ComputeSpec::new("step", [8, 8, 1]))
            .with_bindings(vec![vec![0, 1, 2], vec![0, 2, 1]])
            .with_compute_group_count(2);
        assert!(spec.storage("cells").unwrap().read);
        assert!(spec.compute("step").is_some());
        assert_eq!(spec.bindings.len(), 2);
        assert_eq!(spec.geometry.vertex_count, 4);
    }
}
