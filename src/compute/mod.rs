//! Building and running one shader program: spec types, the resource
//! layout, the bind-group reorder table, and the GPU-side instance.

pub mod builder;
mod core;
pub mod multipass;
pub mod resource;

pub use self::core::{ReadListener, ShaderInstance};
pub use builder::{
    AddressMode, ComputeSpec, Filter, FrameSource, Geometry, PSpec, PointerFn, SamplerSpec, StorageSpec,
    TextureSource, TextureSpec, Topology, UniformFn,
};
pub use multipass::{compute_bind_group, compute_group_count, render_bind_group, BindingTable};
pub use resource::{ResourceBinding, ResourceLayout, ResourceType};
