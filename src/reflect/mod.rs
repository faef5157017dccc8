//! Shader reflection: resolves the WGSL syntax tree into type descriptors
//! with fully computed layouts, plus the resource bindings and entry points
//! of the module.

mod graph;
pub mod layout;

use serde::{Deserialize, Serialize};

use crate::wgsl::{ParseError, Span};

pub use graph::reflect;

/// A host-shareable type with resolved layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// `f32`, `i32`, `u32` (and `bool`). Alignment equals size.
    Primitive { name: String, size: u32 },
    /// Vectors, matrices and atomics. `name` is `vec3`, `mat4x4`, `atomic`,
    /// `format` is the scalar component type.
    Template {
        name: String,
        format: String,
        size: u32,
        align: u32,
    },
    Struct {
        name: String,
        size: u32,
        align: u32,
        members: Vec<MemberDescriptor>,
    },
    /// `count == 0` is a runtime-sized array.
    Array {
        element: Box<TypeDescriptor>,
        count: u32,
        stride: u32,
        size: u32,
        align: u32,
    },
}

impl TypeDescriptor {
    pub fn size(&self) -> u32 {
        match self {
            Self::Primitive { size, .. }
            | Self::Template { size, .. }
            | Self::Struct { size, .. }
            | Self::Array { size, .. } => *size,
        }
    }

    pub fn align(&self) -> u32 {
        match self {
            Self::Primitive { size, .. } => *size,
            Self::Template { align, .. } | Self::Struct { align, .. } | Self::Array { align, .. } => {
                *align
            }
        }
    }

    /// Type name as written in WGSL, e.g. `vec3<f32>` or `array<Particle>`.
    pub fn wgsl_name(&self) -> String {
        match self {
            Self::Primitive { name, .. } | Self::Struct { name, .. } => name.clone(),
            Self::Template { name, format, .. } => format!("{name}<{format}>"),
            Self::Array { element, count: 0, .. } => format!("array<{}>", element.wgsl_name()),
            Self::Array { element, count, .. } => {
                format!("array<{}, {count}>", element.wgsl_name())
            }
        }
    }

    /// Whether the type ends in a runtime-sized array.
    pub fn is_runtime_sized(&self) -> bool {
        match self {
            Self::Array { count, .. } => *count == 0,
            Self::Struct { members, .. } => members.last().is_some_and(|m| m.ty.is_runtime_sized()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
    pub offset: u32,
    /// Occupied size, which differs from `ty.size()` under `@size`.
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    #[default]
    Float,
    Sint,
    Uint,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTextureAccess {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageTexture {
    /// Texel format as written in WGSL, e.g. `rgba8unorm`.
    pub format: String,
    pub access: StorageTextureAccess,
}

/// What a `texture_*` declaration binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TextureKind {
    pub dimension: TextureDimension,
    pub sample: SampleKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multisampled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageTexture>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceClass {
    Uniform(TypeDescriptor),
    Storage(TypeDescriptor, Access),
    Sampler { comparison: bool },
    Texture(TextureKind),
}

/// A module-scope variable with `@group`/`@binding`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub class: ResourceClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

/// One user-defined or builtin input/output of an entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct IoVariable {
    pub name: String,
    pub location: Option<u32>,
    pub builtin: Option<String>,
    pub ty: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: Stage,
    pub workgroup_size: Option<[u32; 3]>,
    pub inputs: Vec<IoVariable>,
    pub outputs: Vec<IoVariable>,
}

/// Everything reflection recovers from one shader module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reflection {
    /// Declared structs, in declaration order.
    pub structs: Vec<TypeDescriptor>,
    pub resources: Vec<Resource>,
    pub entry_points: Vec<EntryPoint>,
}

impl Reflection {
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn struct_type(&self, name: &str) -> Option<&TypeDescriptor> {
        self.structs
            .iter()
            .find(|s| matches!(s, TypeDescriptor::Struct { name: n, .. } if n == name))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReflectError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{span}: unknown type `{name}`")]
    UnknownType { name: String, span: Span },
    #[error("{span}: `{name}` is defined in terms of itself")]
    Cycle { name: String, span: Span },
    #[error("{span}: {message}")]
    InvalidType { message: String, span: Span },
    #[error("{span}: `{expr}` is not a constant integer expression")]
    NotConstant { expr: String, span: Span },
    #[error("{span}: resource `{name}` has no usable @{attribute}")]
    MissingBinding {
        name: String,
        attribute: &'static str,
        span: Span,
    },
    #[error("{span}: @{attribute} on `{name}`: {message}")]
    InvalidAttribute {
        name: String,
        attribute: String,
        message: String,
        span: Span,
    },
}

impl ReflectError {
    pub fn span(&self) -> Span {
        match self {
            Self::Parse(e) => e.span,
            Self::UnknownType { span, .. }
            | Self::Cycle { span, .. }
            | Self::InvalidType { span, .. }
            | Self::NotConstant { span, .. }
            | Self::MissingBinding { span, .. }
            | Self::InvalidAttribute { span, .. } => *span,
        }
    }
}
