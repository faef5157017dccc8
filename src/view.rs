//! Typed read/write views over the raw bytes of one uniform or storage
//! buffer.
//!
//! A [`BufferView`] owns its bytes and an arena of nodes mirroring a
//! [`VariableDescriptor`]. Arrays keep a single element template plus count
//! and stride, so the arena grows with the type, not with the data.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::definitions::{Layout, VariableDescriptor};

/// A materialized value. Converts to and from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Numbers(Vec<f64>),
    List(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Numbers(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Number of top-level elements of a list value.
    pub fn len(&self) -> usize {
        match self {
            Self::Number(_) => 1,
            Self::Numbers(v) => v.len(),
            Self::List(v) => v.len(),
            Self::Struct(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a struct value from `(name, value)` pairs.
    pub fn fields<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Struct(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn flatten_into(&self, out: &mut Vec<f64>) -> bool {
        match self {
            Self::Number(n) => out.push(*n),
            Self::Numbers(v) => out.extend_from_slice(v),
            Self::List(items) => return items.iter().all(|item| item.flatten_into(out)),
            Self::Struct(_) => return false,
        }
        true
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::Numbers(v)
    }
}

impl<const N: usize> From<[f32; N]> for Value {
    fn from(v: [f32; N]) -> Self {
        Self::Numbers(v.iter().copied().map(f64::from).collect())
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = serde_json::Error;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(json)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(n) => serde_json::json!(n),
            Value::Numbers(v) => serde_json::json!(v),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Into::into).collect()),
            Value::Struct(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    #[error("`{path}` expects {expected}")]
    Mismatch { path: String, expected: &'static str },
    #[error("unsupported scalar type `{0}`")]
    UnsupportedScalar(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    F32,
    I32,
    /// `u32`, `bool` and atomics of either.
    U32,
}

impl Scalar {
    fn parse(name: &str) -> Result<Self, ViewError> {
        match name {
            "f32" => Ok(Self::F32),
            "i32" => Ok(Self::I32),
            "u32" | "bool" => Ok(Self::U32),
            other => Err(ViewError::UnsupportedScalar(other.to_string())),
        }
    }

    fn read(self, bytes: &[u8]) -> f64 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            Self::F32 => f64::from(f32::from_le_bytes(raw)),
            Self::I32 => f64::from(i32::from_le_bytes(raw)),
            Self::U32 => f64::from(u32::from_le_bytes(raw)),
        }
    }

    fn write(self, bytes: &mut [u8], value: f64) {
        let raw = match self {
            Self::F32 => (value as f32).to_le_bytes(),
            Self::I32 => (value as i32).to_le_bytes(),
            Self::U32 => (value as u32).to_le_bytes(),
        };
        bytes[..4].copy_from_slice(&raw);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
enum Node {
    /// Scalars, vectors, matrices and packed scalar arrays: `columns` runs
    /// of `length` contiguous scalars, `column_stride` bytes apart.
    Numeric {
        scalar: Scalar,
        length: u32,
        columns: u32,
        column_stride: u32,
    },
    Struct { fields: Vec<(String, u32, NodeId)> },
    Array { element: NodeId, count: u32, stride: u32 },
}

#[derive(Debug, Clone)]
pub struct BufferView {
    bytes: Vec<u8>,
    nodes: Vec<Node>,
    root: NodeId,
    dirty: bool,
}

impl BufferView {
    /// Allocates a zeroed view. `dynamic_length` is the element count of a
    /// runtime-sized tail and is ignored for fixed-size layouts.
    pub fn new(descriptor: &VariableDescriptor, dynamic_length: u32) -> Result<Self, ViewError> {
        let mut nodes = Vec::new();
        let root = Self::build(&mut nodes, descriptor, Some(dynamic_length))?;
        let size = descriptor.byte_size(dynamic_length) as usize;
        debug!("buffer view of {size} bytes with {} nodes", nodes.len());
        Ok(Self {
            bytes: vec![0; size],
            nodes,
            root,
            dirty: true,
        })
    }

    fn build(
        nodes: &mut Vec<Node>,
        descriptor: &VariableDescriptor,
        dynamic_length: Option<u32>,
    ) -> Result<NodeId, ViewError> {
        let node = match &descriptor.layout {
            Layout::Primitive { name } => Node::Numeric {
                scalar: Scalar::parse(name)?,
                length: 1,
                columns: 1,
                column_stride: 4,
            },
            Layout::Template { name, format } => {
                let scalar = Scalar::parse(format)?;
                let (columns, rows) = crate::reflect::layout::template_shape(name).unwrap_or((1, 1));
                let (column_size, column_align) = crate::reflect::layout::vector_layout(rows, 4);
                Node::Numeric {
                    scalar,
                    length: rows,
                    columns,
                    column_stride: crate::reflect::layout::round_up(column_size, column_align),
                }
            }
            Layout::Struct(members) => {
                let last = members.0.len().saturating_sub(1);
                let mut fields = Vec::with_capacity(members.0.len());
                for (index, (name, member)) in members.0.iter().enumerate() {
                    // only the trailing member may be runtime-sized
                    let tail = if index == last { dynamic_length } else { None };
                    let id = Self::build(nodes, member, tail)?;
                    fields.push((name.clone(), member.offset.unwrap_or(0), id));
                }
                Node::Struct { fields }
            }
            Layout::Array(array) => {
                let count = match array.count {
                    0 => dynamic_length.unwrap_or(0),
                    n => n,
                };
                let packed = matches!(&array.element.layout, Layout::Primitive { .. })
                    && array.stride == 4;
                if packed {
                    let Layout::Primitive { name } = &array.element.layout else {
                        unreachable!()
                    };
                    Node::Numeric {
                        scalar: Scalar::parse(name)?,
                        length: count,
                        columns: 1,
                        column_stride: 4 * count,
                    }
                } else {
                    let element = Self::build(nodes, &array.element, None)?;
                    Node::Array {
                        element,
                        count,
                        stride: array.stride,
                    }
                }
            }
        };
        nodes.push(node);
        Ok(NodeId(nodes.len() - 1))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Top-level field names when the view is a struct, in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        match &self.nodes[self.root.0] {
            Node::Struct { fields } => fields.iter().map(|(name, _, _)| name.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the whole view, or its top-level `field`, holds plain numbers
    /// (a scalar, vector, matrix or packed scalar array).
    pub fn is_numeric(&self, field: Option<&str>) -> bool {
        let id = match (field, &self.nodes[self.root.0]) {
            (None, _) => self.root,
            (Some(field), Node::Struct { fields }) => match fields.iter().find(|(name, _, _)| name == field) {
                Some((_, _, id)) => *id,
                None => return false,
            },
            (Some(_), _) => return false,
        };
        matches!(self.nodes[id.0], Node::Numeric { length, columns, .. } if length * columns > 0)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the dirty flag and clears it.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Overwrites the live bytes in place. Extra input is ignored, a short
    /// input leaves the remaining bytes untouched.
    pub fn update(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.bytes.len());
        if n != bytes.len() || n != self.bytes.len() {
            debug!("view update with {} bytes into {}", bytes.len(), self.bytes.len());
        }
        self.bytes[..n].copy_from_slice(&bytes[..n]);
        self.dirty = true;
    }

    pub fn get(&self) -> Value {
        self.read(self.root, 0)
    }

    /// Writes `value` into the live bytes. The view only becomes dirty when
    /// a byte actually changed.
    pub fn set(&mut self, value: &Value) -> Result<(), ViewError> {
        self.write(self.root, 0, value, "$")
    }

    fn read(&self, id: NodeId, base: usize) -> Value {
        match &self.nodes[id.0] {
            Node::Numeric {
                scalar,
                length,
                columns,
                column_stride,
            } => {
                let mut out = Vec::with_capacity((length * columns) as usize);
                for column in 0..*columns as usize {
                    let start = base + column * *column_stride as usize;
                    for i in 0..*length as usize {
                        let at = start + i * 4;
                        match self.bytes.get(at..at + 4) {
                            Some(raw) => out.push(scalar.read(raw)),
                            None => break,
                        }
                    }
                }
                if *length == 1 && *columns == 1 {
                    Value::Number(out.first().copied().unwrap_or_default())
                } else {
                    Value::Numbers(out)
                }
            }
            Node::Struct { fields } => Value::Struct(
                fields
                    .iter()
                    .map(|(name, offset, node)| (name.clone(), self.read(*node, base + *offset as usize)))
                    .collect(),
            ),
            Node::Array {
                element,
                count,
                stride,
            } => Value::List(
                (0..*count as usize)
                    .map(|i| self.read(*element, base + i * *stride as usize))
                    .collect(),
            ),
        }
    }

    fn write(&mut self, id: NodeId, base: usize, value: &Value, path: &str) -> Result<(), ViewError> {
        match self.nodes[id.0].clone() {
            Node::Numeric {
                scalar,
                length,
                columns,
                column_stride,
            } => {
                let mut numbers = Vec::new();
                if !value.flatten_into(&mut numbers) {
                    return Err(ViewError::Mismatch {
                        path: path.to_string(),
                        expected: "a number or a list of numbers",
                    });
                }
                let capacity = (length * columns) as usize;
                if numbers.len() > capacity {
                    debug!("`{path}` truncated from {} to {capacity} numbers", numbers.len());
                }
                for (i, number) in numbers.into_iter().take(capacity).enumerate() {
                    let column = i / length as usize;
                    let row = i % length as usize;
                    let at = base + column * column_stride as usize + row * 4;
                    if let Some(slot) = self.bytes.get_mut(at..at + 4) {
                        let mut raw = [0; 4];
                        scalar.write(&mut raw, number);
                        if *slot != raw {
                            slot.copy_from_slice(&raw);
                            self.dirty = true;
                        }
                    }
                }
                Ok(())
            }
            Node::Struct { fields } => {
                let Value::Struct(map) = value else {
                    return Err(ViewError::Mismatch {
                        path: path.to_string(),
                        expected: "a struct",
                    });
                };
                for (key, field) in map {
                    match fields.iter().find(|(name, _, _)| name == key) {
                        Some((_, offset, node)) => {
                            self.write(*node, base + *offset as usize, field, &format!("{path}.{key}"))?
                        }
                        None => debug!("`{path}` has no field `{key}`"),
                    }
                }
                Ok(())
            }
            Node::Array {
                element,
                count,
                stride,
            } => {
                let items: Vec<Value> = match value {
                    Value::List(items) => items.clone(),
                    Value::Numbers(numbers) => numbers.iter().copied().map(Value::Number).collect(),
                    _ => {
                        return Err(ViewError::Mismatch {
                            path: path.to_string(),
                            expected: "a list",
                        })
                    }
                };
                if items.len() > count as usize {
                    debug!("`{path}` truncated from {} to {count} elements", items.len());
                }
                for (i, item) in items.iter().take(count as usize).enumerate() {
                    self.write(element, base + i * stride as usize, item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Definitions;

    fn view(source: &str, name: &str, length: u32) -> BufferView {
        let defs = Definitions::from_source(source).unwrap();
        let var = defs
            .uniforms
            .get(name)
            .or_else(|| defs.storages.get(name))
            .unwrap();
        BufferView::new(var, length).unwrap()
    }

    fn json(text: &str) -> Value {
        Value::try_from(serde_json::from_str::<serde_json::Value>(text).unwrap()).unwrap()
    }

    #[test]
    fn struct_round_trip() {
        let mut v = view(
            "struct U { time: f32, pos: vec3f, count: i32, m: mat2x2f }\n\
             @group(0) @binding(0) var<uniform> u: U;",
            "u",
            1,
        );
        assert_eq!(v.len(), 48);
        let value = json(r#"{"time": 1.5, "pos": [1, 2, 3], "count": -4, "m": [1, 0, 0, 1]}"#);
        v.set(&value).unwrap();
        assert_eq!(v.get(), value);
        assert_eq!(&v.bytes()[0..4], &1.5f32.to_le_bytes());
        assert_eq!(&v.bytes()[16..20], &1.0f32.to_le_bytes());
    }

    #[test]
    fn partial_set_leaves_other_fields() {
        let mut v = view(
            "struct U { a: f32, b: f32 }\n@group(0) @binding(0) var<uniform> u: U;",
            "u",
            1,
        );
        v.set(&json(r#"{"a": 1, "b": 2}"#)).unwrap();
        v.set(&json(r#"{"b": 5}"#)).unwrap();
        assert_eq!(v.get(), json(r#"{"a": 1, "b": 5}"#));
    }

    #[test]
    fn lists_are_truncated_to_declared_length() {
        let mut v = view(
            "@group(0) @binding(0) var<storage> s: array<u32, 3>;",
            "s",
            0,
        );
        v.set(&Value::Numbers(vec![1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert_eq!(v.get(), Value::Numbers(vec![1.0, 2.0, 3.0]));
        assert_eq!(v.len(), 12);
    }

    #[test]
    fn runtime_array_length_follows_dynamic_length() {
        for length in [1, 7, 1024] {
            let v = view(
                "@group(0) @binding(0) var<storage> s: array<vec3f>;",
                "s",
                length,
            );
            assert_eq!(v.len(), 16 * length as usize);
            assert_eq!(v.node_count(), 2);
        }
        let v = view(
            "struct P { n: u32, items: array<vec2f> }\n@group(0) @binding(0) var<storage> p: P;",
            "p",
            5,
        );
        assert_eq!(v.len(), 8 + 5 * 8);
    }

    #[test]
    fn vec3_array_keeps_padding() {
        let mut v = view(
            "@group(0) @binding(0) var<storage> s: array<vec3f, 2>;",
            "s",
            0,
        );
        v.set(&json("[[1, 2, 3], [4, 5, 6]]")).unwrap();
        assert_eq!(&v.bytes()[16..20], &4.0f32.to_le_bytes());
        assert_eq!(&v.bytes()[12..16], &[0; 4]);
        assert_eq!(v.get(), json("[[1, 2, 3], [4, 5, 6]]"));
    }

    #[test]
    fn scalar_accepts_single_element_list() {
        let mut v = view("@group(0) @binding(0) var<uniform> t: f32;", "t", 1);
        v.set(&Value::Numbers(vec![2.5])).unwrap();
        assert_eq!(v.get(), Value::Number(2.5));
    }

    #[test]
    fn set_marks_dirty_only_on_change() {
        let mut v = view(
            "struct U { frame: u32, gain: f32 }\n@group(0) @binding(0) var<uniform> u: U;",
            "u",
            1,
        );
        assert!(v.take_dirty());
        v.set(&json(r#"{"frame": 0}"#)).unwrap();
        assert!(!v.is_dirty());
        v.set(&json(r#"{"frame": 3}"#)).unwrap();
        assert!(v.take_dirty());
        v.set(&json(r#"{"frame": 3, "gain": 0}"#)).unwrap();
        assert!(!v.is_dirty());
    }

    #[test]
    fn numeric_fields() {
        let v = view(
            "struct M { pos: vec2f }\nstruct U { mouse: M, time: f32, hist: array<f32, 4>, pts: array<vec2f, 2> }\n\
             @group(0) @binding(0) var<storage> u: U;",
            "u",
            1,
        );
        assert!(!v.is_numeric(None));
        assert!(!v.is_numeric(Some("mouse")));
        assert!(v.is_numeric(Some("time")));
        assert!(v.is_numeric(Some("hist")));
        assert!(!v.is_numeric(Some("pts")));
        assert!(!v.is_numeric(Some("missing")));
    }

    #[test]
    fn update_replaces_bytes_and_marks_dirty() {
        let mut v = view("@group(0) @binding(0) var<storage> s: array<u32, 2>;", "s", 0);
        assert!(v.take_dirty());
        assert!(!v.is_dirty());
        v.update(bytemuck::cast_slice(&[7u32, 9]));
        assert!(v.is_dirty());
        assert_eq!(v.get(), Value::Numbers(vec![7.0, 9.0]));
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let mut v = view(
            "struct U { a: f32 }\n@group(0) @binding(0) var<uniform> u: U;",
            "u",
            1,
        );
        let err = v.set(&json(r#"{"a": {"x": 1}}"#)).unwrap_err();
        assert!(matches!(err, ViewError::Mismatch { ref path, .. } if path == "$.a"));
    }
}
