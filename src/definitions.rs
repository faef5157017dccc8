//! `Definitions`: the flattened, serializable form of a shader's reflection.
//!
//! This is the only artifact exchanged with the outside world. It can be
//! cached next to the shader source as `<shader>.defs.json`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::reflect::{
    self, Access, Reflection, ReflectError, ResourceClass, Stage, TextureKind, TypeDescriptor,
};

/// Layout of one variable, struct member or array element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,
    #[serde(flatten)]
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Primitive { name: String },
    Template { name: String, format: String },
    Struct(Members),
    Array(ArrayLayout),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub element: Box<VariableDescriptor>,
    /// Zero for a runtime-sized array.
    pub count: u32,
    pub stride: u32,
}

/// Struct members in declaration order. Serialized as a JSON object whose
/// key order is the declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Members(pub Vec<(String, VariableDescriptor)>);

impl Members {
    pub fn get(&self, name: &str) -> Option<&VariableDescriptor> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableDescriptor)> {
        self.0.iter().map(|(n, d)| (n.as_str(), d))
    }
}

impl Serialize for Members {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, member) in &self.0 {
            map.serialize_entry(name, member)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Members {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = Members;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of struct members")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Members, A::Error> {
                let mut members = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, member)) = access.next_entry()? {
                    members.push((name, member));
                }
                Ok(Members(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

impl VariableDescriptor {
    /// Flattens a resolved type.
    pub fn from_type(ty: &TypeDescriptor) -> Self {
        let layout = match ty {
            TypeDescriptor::Primitive { name, .. } => Layout::Primitive { name: name.clone() },
            TypeDescriptor::Template { name, format, .. } => Layout::Template {
                name: name.clone(),
                format: format.clone(),
            },
            TypeDescriptor::Struct { members, .. } => Layout::Struct(Members(
                members
                    .iter()
                    .map(|m| {
                        let mut member = Self::from_type(&m.ty);
                        member.offset = Some(m.offset);
                        member.size = m.size;
                        (m.name.clone(), member)
                    })
                    .collect(),
            )),
            TypeDescriptor::Array {
                element,
                count,
                stride,
                ..
            } => Layout::Array(ArrayLayout {
                element: Box::new(Self::from_type(element)),
                count: *count,
                stride: *stride,
            }),
        };
        Self {
            size: ty.size(),
            offset: None,
            group: None,
            binding: None,
            access: None,
            layout,
        }
    }

    /// Whether the layout ends in a runtime-sized array.
    pub fn is_runtime_sized(&self) -> bool {
        match &self.layout {
            Layout::Array(array) => array.count == 0,
            Layout::Struct(members) => members.0.last().is_some_and(|(_, m)| m.is_runtime_sized()),
            _ => false,
        }
    }

    /// Stride of the runtime-sized tail, if any.
    pub fn runtime_stride(&self) -> Option<u32> {
        match &self.layout {
            Layout::Array(array) if array.count == 0 => Some(array.stride),
            Layout::Struct(members) => members.0.last().and_then(|(_, m)| m.runtime_stride()),
            _ => None,
        }
    }

    /// Byte size of a buffer holding this variable with `length` elements in
    /// its runtime-sized tail.
    pub fn byte_size(&self, length: u32) -> u64 {
        match &self.layout {
            Layout::Array(array) if array.count == 0 => {
                u64::from(length) * u64::from(array.stride.max(1))
            }
            Layout::Struct(members) if self.is_runtime_sized() => {
                let (_, tail) = &members.0[members.0.len() - 1];
                let start = u64::from(tail.offset.unwrap_or(0));
                start + tail.byte_size(length)
            }
            _ => u64::from(self.size),
        }
    }

    /// Layout equality ignoring where the variable is bound.
    pub fn same_layout(&self, other: &Self) -> bool {
        self.size == other.size && self.layout == other.layout
    }

    fn bound(mut self, group: u32, binding: u32, access: Option<Access>) -> Self {
        self.group = Some(group);
        self.binding = Some(binding);
        self.access = access;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub comparison: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    #[serde(default)]
    pub kind: TextureKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
    #[serde(rename = "type")]
    pub ty: VariableDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexEntry {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<VertexInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEntry {
    pub name: String,
    pub workgroup_size: [u32; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entries {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex: Option<VertexEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<FragmentEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computes: Vec<ComputeEntry>,
}

/// What sits at a binding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind<'a> {
    Uniform(&'a VariableDescriptor),
    Storage(&'a VariableDescriptor),
    Sampler(&'a SamplerBinding),
    Texture(&'a TextureBinding),
}

impl BindingKind<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uniform(_) => "uniform",
            Self::Storage(_) => "storage",
            Self::Sampler(_) => "sampler",
            Self::Texture(_) => "texture",
        }
    }
}

/// One declared resource, as listed by [`Definitions::bindings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingInfo<'a> {
    pub name: &'a str,
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind<'a>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definitions {
    #[serde(default)]
    pub uniforms: BTreeMap<String, VariableDescriptor>,
    #[serde(default)]
    pub storages: BTreeMap<String, VariableDescriptor>,
    #[serde(default)]
    pub samplers: Vec<SamplerBinding>,
    #[serde(default)]
    pub textures: Vec<TextureBinding>,
    #[serde(default)]
    pub entries: Entries,
    pub bind_group_length: u32,
}

impl Definitions {
    /// Reflects `source` and flattens the result.
    pub fn from_source(source: &str) -> Result<Self, ReflectError> {
        Ok(Self::from_reflection(&reflect::reflect(source)?))
    }

    pub fn from_reflection(reflection: &Reflection) -> Self {
        let mut defs = Self::default();
        for resource in &reflection.resources {
            let (group, binding) = (resource.group, resource.binding);
            match &resource.class {
                ResourceClass::Uniform(ty) => {
                    let var = VariableDescriptor::from_type(ty).bound(group, binding, None);
                    defs.uniforms.insert(resource.name.clone(), var);
                }
                ResourceClass::Storage(ty, access) => {
                    let var = VariableDescriptor::from_type(ty).bound(group, binding, Some(*access));
                    defs.storages.insert(resource.name.clone(), var);
                }
                ResourceClass::Sampler { comparison } => defs.samplers.push(SamplerBinding {
                    name: resource.name.clone(),
                    group,
                    binding,
                    comparison: *comparison,
                }),
                ResourceClass::Texture(kind) => defs.textures.push(TextureBinding {
                    name: resource.name.clone(),
                    group,
                    binding,
                    kind: kind.clone(),
                }),
            }
        }
        defs.bind_group_length = reflection.resources.iter().filter(|r| r.group == 0).count() as u32;

        for entry in &reflection.entry_points {
            match entry.stage {
                Stage::Vertex if defs.entries.vertex.is_none() => {
                    defs.entries.vertex = Some(VertexEntry {
                        name: entry.name.clone(),
                        inputs: entry
                            .inputs
                            .iter()
                            .map(|io| VertexInput {
                                name: io.name.clone(),
                                location: io.location,
                                builtin: io.builtin.clone(),
                                ty: VariableDescriptor::from_type(&io.ty),
                            })
                            .collect(),
                    });
                }
                Stage::Fragment if defs.entries.fragment.is_none() => {
                    defs.entries.fragment = Some(FragmentEntry {
                        name: entry.name.clone(),
                    });
                }
                Stage::Compute => defs.entries.computes.push(ComputeEntry {
                    name: entry.name.clone(),
                    workgroup_size: entry.workgroup_size.unwrap_or([1, 1, 1]),
                }),
                _ => debug!("ignoring additional {:?} entry point `{}`", entry.stage, entry.name),
            }
        }
        defs
    }

    /// Every declared resource ordered by `(group, binding)`.
    pub fn bindings(&self) -> Vec<BindingInfo<'_>> {
        let uniforms = self.uniforms.iter().map(|(name, var)| BindingInfo {
            name,
            group: var.group.unwrap_or(0),
            binding: var.binding.unwrap_or(0),
            kind: BindingKind::Uniform(var),
        });
        let storages = self.storages.iter().map(|(name, var)| BindingInfo {
            name,
            group: var.group.unwrap_or(0),
            binding: var.binding.unwrap_or(0),
            kind: BindingKind::Storage(var),
        });
        let samplers = self.samplers.iter().map(|s| BindingInfo {
            name: &s.name,
            group: s.group,
            binding: s.binding,
            kind: BindingKind::Sampler(s),
        });
        let textures = self.textures.iter().map(|t| BindingInfo {
            name: &t.name,
            group: t.group,
            binding: t.binding,
            kind: BindingKind::Texture(t),
        });
        let mut all: Vec<_> = uniforms.chain(storages).chain(samplers).chain(textures).collect();
        all.sort_by_key(|b| (b.group, b.binding));
        all
    }

    pub fn binding(&self, binding: u32) -> Option<BindingInfo<'_>> {
        self.bindings()
            .into_iter()
            .find(|b| b.group == 0 && b.binding == binding)
    }

    /// Names of uniforms and storages whose layout differs between the two
    /// snapshots, including added and removed ones.
    pub fn changed(&self, other: &Definitions) -> Vec<String> {
        fn diff(
            a: &BTreeMap<String, VariableDescriptor>,
            b: &BTreeMap<String, VariableDescriptor>,
            out: &mut Vec<String>,
        ) {
            for (name, var) in a {
                match b.get(name) {
                    Some(other) if other.same_layout(var) => {}
                    _ => out.push(name.clone()),
                }
            }
            out.extend(b.keys().filter(|name| !a.contains_key(*name)).cloned());
        }

        let mut changed = Vec::new();
        diff(&self.uniforms, &other.uniforms, &mut changed);
        diff(&self.storages, &other.storages, &mut changed);
        changed.sort();
        changed.dedup();
        changed
    }

    /// Cache location for a shader file: `life.wgsl` → `life.defs.json`.
    pub fn cache_path(shader: &Path) -> PathBuf {
        shader.with_extension("defs.json")
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        std::fs::write(path, self.to_json()?)?;
        info!("wrote definitions to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
struct Sys { frame: u32, resolution: vec2f }
struct Cell { alive: u32, age: f32 }
@group(0) @binding(0) var<uniform> sys: Sys;
@group(0) @binding(1) var<storage, read> current: array<Cell>;
@group(0) @binding(2) var<storage, read_write> next: array<Cell>;
@group(0) @binding(3) var samp: sampler;
@group(0) @binding(4) var tex: texture_2d<f32>;
@vertex fn vs(@location(0) pos: vec2f) -> @builtin(position) vec4f { return vec4f(pos, 0.0, 1.0); }
@fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }
@compute @workgroup_size(8, 8) fn step(@builtin(global_invocation_id) id: vec3u) {}
"#;

    #[test]
    fn extracts_bindings_and_entries() {
        let defs = Definitions::from_source(SHADER).unwrap();
        assert_eq!(defs.bind_group_length, 5);
        let sys = &defs.uniforms["sys"];
        assert_eq!(sys.size, 16);
        assert_eq!(sys.binding, Some(0));
        match &sys.layout {
            Layout::Struct(members) => {
                let names: Vec<_> = members.iter().map(|(n, _)| n).collect();
                assert_eq!(names, ["frame", "resolution"]);
                assert_eq!(members.get("resolution").unwrap().offset, Some(8));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(defs.storages["current"].access, Some(Access::Read));
        assert!(defs.storages["next"].is_runtime_sized());
        assert_eq!(defs.storages["next"].byte_size(10), 80);
        assert_eq!(defs.entries.computes[0].workgroup_size, [8, 8, 1]);
        assert_eq!(defs.entries.vertex.as_ref().unwrap().inputs[0].location, Some(0));

        let order: Vec<_> = defs.bindings().iter().map(|b| b.binding).collect();
        assert_eq!(order, [0, 1, 2, 3, 4]);
        assert_eq!(defs.binding(3).unwrap().kind.label(), "sampler");
    }

    #[test]
    fn json_shape_and_member_order() {
        let defs = Definitions::from_source(
            "struct U { z: f32, a: vec4f }\n@group(0) @binding(0) var<uniform> u: U;",
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&defs.to_json().unwrap()).unwrap();
        assert_eq!(json["bindGroupLength"], 1);
        let u = &json["uniforms"]["u"];
        assert_eq!(u["size"], 32);
        assert_eq!(u["struct"]["a"]["offset"], 16);
        assert_eq!(u["struct"]["a"]["template"]["name"], "vec4");

        let text = defs.to_json().unwrap();
        assert!(text.find("\"z\"").unwrap() < text.find("\"a\"").unwrap());
        assert_eq!(Definitions::from_json(&text).unwrap(), defs);
    }

    #[test]
    fn change_detection_compares_layouts() {
        let before = Definitions::from_source(
            "@group(0) @binding(0) var<uniform> u: vec4f;\n@group(0) @binding(1) var<storage> s: array<f32>;",
        )
        .unwrap();
        let moved = Definitions::from_source(
            "@group(0) @binding(1) var<uniform> u: vec4f;\n@group(0) @binding(0) var<storage> s: array<u32>;",
        )
        .unwrap();
        assert_eq!(before.changed(&moved), vec!["s".to_string()]);
        assert!(before.changed(&before).is_empty());
    }
}
