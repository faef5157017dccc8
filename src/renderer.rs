use log::{debug, info};

use crate::compute::builder::Topology;
use crate::definitions::{Layout, VariableDescriptor, VertexInput};
use crate::error::Error;

/// Per-instance vertex attributes derived from the vertex entry's
/// `@location` inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceLayout {
    pub stride: u64,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl InstanceLayout {
    /// Builds the layout of `inputs`. With a storage element, inputs whose
    /// names match struct members take those members' offsets and the stride
    /// is the storage stride. Otherwise attributes are packed in location
    /// order.
    pub fn new(inputs: &[VertexInput], storage_element: Option<(&VariableDescriptor, u32)>) -> Result<Option<Self>, Error> {
        let mut located: Vec<_> = inputs
            .iter()
            .filter_map(|input| input.location.map(|l| (l, input)))
            .collect();
        if located.is_empty() {
            return Ok(None);
        }
        located.sort_by_key(|(l, _)| *l);

        let mut attributes = Vec::with_capacity(located.len());
        let mut packed = 0u64;
        for (location, input) in located {
            let format = vertex_format(&input.ty).ok_or_else(|| {
                Error::validation(format!(
                    "vertex input `{}` has no vertex format",
                    input.name
                ))
            })?;
            let member_offset = storage_element.and_then(|(element, _)| match &element.layout {
                Layout::Struct(members) => members.get(&input.name).and_then(|m| m.offset),
                _ => None,
            });
            let offset = match member_offset {
                Some(offset) => u64::from(offset),
                None => packed,
            };
            packed = offset + format.size();
            attributes.push(wgpu::VertexAttribute {
                format,
                offset,
                shader_location: location,
            });
        }
        let stride = match storage_element {
            Some((_, stride)) => u64::from(stride),
            None => packed,
        };
        debug!("instance layout: {} attributes, stride {stride}", attributes.len());
        Ok(Some(Self { stride, attributes }))
    }

    pub fn desc(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &self.attributes,
        }
    }
}

/// Vertex format of a reflected scalar or vector type.
pub fn vertex_format(ty: &VariableDescriptor) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as V;
    let (scalar, components) = match &ty.layout {
        Layout::Primitive { name } => (name.as_str(), 1),
        Layout::Template { name, format } => {
            let components = match name.as_str() {
                "vec2" => 2,
                "vec3" => 3,
                "vec4" => 4,
                _ => return None,
            };
            (format.as_str(), components)
        }
        _ => return None,
    };
    Some(match (scalar, components) {
        ("f32", 1) => V::Float32,
        ("f32", 2) => V::Float32x2,
        ("f32", 3) => V::Float32x3,
        ("f32", 4) => V::Float32x4,
        ("u32", 1) => V::Uint32,
        ("u32", 2) => V::Uint32x2,
        ("u32", 3) => V::Uint32x3,
        ("u32", 4) => V::Uint32x4,
        ("i32", 1) => V::Sint32,
        ("i32", 2) => V::Sint32x2,
        ("i32", 3) => V::Sint32x3,
        ("i32", 4) => V::Sint32x4,
        _ => return None,
    })
}

pub struct Renderer {
    pub render_pipeline: wgpu::RenderPipeline,
    pub instance_layout: Option<InstanceLayout>,
}

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        vertex_entry: &str,
        fragment_entry: &str,
        format: wgpu::TextureFormat,
        layout: &wgpu::PipelineLayout,
        instance_layout: Option<InstanceLayout>,
        topology: Topology,
    ) -> Self {
        let color_target_state = [Some(wgpu::ColorTargetState {
            format,
            blend: Some(wgpu::BlendState {
                color: wgpu::BlendComponent::REPLACE,
                alpha: wgpu::BlendComponent::REPLACE,
            }),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let buffers: Vec<wgpu::VertexBufferLayout> = instance_layout.iter().map(InstanceLayout::desc).collect();
        let strip = topology == Topology::TriangleStrip;
        info!("Renderer::new, {vertex_entry}/{fragment_entry} -> {format:?}");
        let pipeline_desc = wgpu::RenderPipelineDescriptor {
            label: Some("Render Pipeline"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some(vertex_entry),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(fragment_entry),
                targets: &color_target_state,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: match topology {
                    Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                    Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                    Topology::LineList => wgpu::PrimitiveTopology::LineList,
                    Topology::PointList => wgpu::PrimitiveTopology::PointList,
                },
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: if strip { None } else { Some(wgpu::Face::Back) },
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        };
        let render_pipeline = device.create_render_pipeline(&pipeline_desc);
        Self {
            render_pipeline,
            instance_layout,
        }
    }

    pub fn begin_render_pass<'a>(
        encoder: &'a mut wgpu::CommandEncoder,
        view: &'a wgpu::TextureView,
        load_op: wgpu::LoadOp<wgpu::Color>,
        label: Option<&'a str>,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label,
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: load_op,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Definitions;

    #[test]
    fn packs_static_instance_attributes() {
        let defs = Definitions::from_source(
            "@vertex fn vs(@builtin(vertex_index) i: u32, @location(1) color: vec4f, @location(0) pos: vec2f) -> @builtin(position) vec4f { return vec4f(pos, 0.0, 1.0); }\n\
             @fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }",
        )
        .unwrap();
        let inputs = &defs.entries.vertex.as_ref().unwrap().inputs;
        let layout = InstanceLayout::new(inputs, None).unwrap().unwrap();
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.attributes[0].format, wgpu::VertexFormat::Float32x2);
        assert_eq!(layout.attributes[1].offset, 8);
        assert_eq!(layout.attributes[1].shader_location, 1);
    }

    #[test]
    fn storage_members_give_offsets() {
        let defs = Definitions::from_source(
            "struct P { pos: vec2f, vel: vec2f, color: vec4f }\n\
             @group(0) @binding(0) var<storage> ps: array<P>;\n\
             @vertex fn vs(@location(0) pos: vec2f, @location(1) color: vec4f) -> @builtin(position) vec4f { return vec4f(pos, 0.0, 1.0); }\n\
             @fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }",
        )
        .unwrap();
        let Layout::Array(array) = &defs.storages["ps"].layout else {
            panic!("not an array")
        };
        let inputs = &defs.entries.vertex.as_ref().unwrap().inputs;
        let layout = InstanceLayout::new(inputs, Some((&array.element, array.stride)))
            .unwrap()
            .unwrap();
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.attributes[1].offset, 16);
    }
}
