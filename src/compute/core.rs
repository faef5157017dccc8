use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crossbeam::channel::{self, Receiver, TryRecvError};
use log::{debug, info, warn};
use tracing::info_span;
use wgpu::util::DeviceExt;

use super::builder::{FrameSource, Geometry, PSpec, PointerFn, SamplerSpec, TextureSource, UniformFn};
use super::multipass::{compute_bind_group, compute_group_count, render_bind_group};
use super::resource::{ResourceLayout, ResourceType};
use crate::definitions::Layout;
use crate::error::{Error, ErrorKind, ErrorSink};
use crate::renderer::{InstanceLayout, Renderer};
use crate::texture::{create_sampler, TextureManager};
use crate::uniforms::SystemUniforms;
use crate::view::{BufferView, Value};
use crate::{shader, Core};

/// Called with the storage name and its refreshed view after a read-back.
pub type ReadListener = Box<dyn FnMut(&str, &BufferView)>;

struct BoundBuffer {
    name: String,
    buffer: wgpu::Buffer,
    view: BufferView,
    uniform: bool,
}

enum MapState {
    Idle,
    /// Copy recorded in the current submission, not yet mapped.
    Copied,
    Mapping(Receiver<Result<(), wgpu::BufferAsyncError>>),
}

struct ReadBack {
    binding: u32,
    staging: wgpu::Buffer,
    size: u64,
    state: MapState,
}

struct BoundTexture {
    name: String,
    manager: TextureManager,
    stream: Option<Box<dyn FrameSource>>,
}

struct ComputePass {
    name: String,
    pipeline: wgpu::ComputePipeline,
    workgroups: [u32; 3],
}

/// Device resources and pipelines built from one [`PSpec`].
pub struct ShaderInstance {
    label: String,
    layout: ResourceLayout,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_groups: Vec<wgpu::BindGroup>,
    buffers: BTreeMap<u32, BoundBuffer>,
    textures: BTreeMap<u32, BoundTexture>,
    samplers: BTreeMap<u32, wgpu::Sampler>,
    renderer: Option<Renderer>,
    computes: Vec<ComputePass>,
    steps: u32,
    readbacks: Vec<ReadBack>,
    listeners: Vec<ReadListener>,
    uniforms: Option<UniformFn>,
    pointer: Option<PointerFn>,
    geometry: Geometry,
    instance_count: u32,
    /// Layout binding of the storage used as the instance vertex buffer.
    vertex_binding: Option<u32>,
    instance_buffer: Option<wgpu::Buffer>,
    clear_color: wgpu::Color,
    sink: ErrorSink,
    destroyed: bool,
}

impl fmt::Debug for ShaderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderInstance")
            .field("label", &self.label)
            .field("steps", &self.steps)
            .field("instance_count", &self.instance_count)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl ShaderInstance {
    /// Validates `spec`, compiles the shader and allocates everything.
    /// Fatal errors are reported to `sink` and returned.
    pub fn build(core: &Core, spec: PSpec, sink: &ErrorSink) -> Result<Self, Error> {
        let span = info_span!("[ShaderInstance::build]", label = %spec.label);
        let _guard = span.enter();
        sink.check(Self::build_inner(core, spec, sink))
    }

    fn build_inner(core: &Core, spec: PSpec, sink: &ErrorSink) -> Result<Self, Error> {
        let layout = ResourceLayout::from_spec(&spec)?;
        check_limits(core, &layout)?;
        let module = shader::create_module(core, &spec.code, &spec.label, sink)?;

        core.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = Self::allocate(core, spec, layout, &module, sink);
        let scope = pollster::block_on(core.device.pop_error_scope());
        match (built, scope) {
            (Ok(mut instance), Some(e)) => {
                instance.destroy();
                Err(Error::validation(e.to_string()))
            }
            (built, _) => built,
        }
    }

    fn allocate(
        core: &Core,
        mut spec: PSpec,
        layout: ResourceLayout,
        module: &wgpu::ShaderModule,
        sink: &ErrorSink,
    ) -> Result<Self, Error> {
        let device = &core.device;
        let table = &layout.table;

        // every buffer that can land in the vertex storage's slot needs VERTEX usage
        let vertex_binding = spec
            .storages
            .iter()
            .find(|s| s.vertex)
            .and_then(|s| spec.defs.storages.get(&s.name))
            .and_then(|var| var.binding);
        let mut vertex_resources = BTreeSet::new();
        if let Some(binding) = vertex_binding {
            vertex_resources.insert(binding);
            if let Some(slot) = (0..table.slots()).find(|&s| table.layout_binding(s) == binding) {
                vertex_resources.extend((0..table.groups()).map(|g| table.resource_at(g, slot)));
            }
        }

        let mut buffers = BTreeMap::new();
        let mut readbacks = Vec::new();
        for (name, var) in &spec.defs.uniforms {
            let binding = var.binding.unwrap_or(0);
            let view = BufferView::new(var, 1)?;
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(name),
                contents: view.bytes(),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            buffers.insert(
                binding,
                BoundBuffer {
                    name: name.clone(),
                    buffer,
                    view,
                    uniform: true,
                },
            );
        }
        for (name, var) in &spec.defs.storages {
            let binding = var.binding.unwrap_or(0);
            let storage = spec
                .storage(name)
                .ok_or_else(|| Error::resource(format!("storage `{name}` has no spec entry")))?;
            let mut view = BufferView::new(var, storage.size)?;
            if let Some(data) = &storage.data {
                view.set(data)?;
            }
            view.take_dirty();
            let mut usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
            if storage.read {
                usage |= wgpu::BufferUsages::COPY_SRC;
            }
            if vertex_resources.contains(&binding) {
                usage |= wgpu::BufferUsages::VERTEX;
            }
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(name),
                contents: view.bytes(),
                usage,
            });
            if storage.read {
                let size = buffer.size();
                readbacks.push(ReadBack {
                    binding,
                    staging: device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(&format!("{name} staging")),
                        size,
                        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    }),
                    size,
                    state: MapState::Idle,
                });
            }
            debug!("storage `{name}` at binding {binding}: {} bytes", view.len());
            buffers.insert(
                binding,
                BoundBuffer {
                    name: name.clone(),
                    buffer,
                    view,
                    uniform: false,
                },
            );
        }

        let mut samplers = BTreeMap::new();
        for sampler in &spec.defs.samplers {
            let given = spec.sampler(&sampler.name).cloned().unwrap_or_else(|| {
                debug!("sampler `{}` uses defaults", sampler.name);
                SamplerSpec::new(&sampler.name)
            });
            samplers.insert(sampler.binding, create_sampler(device, &given, sampler.comparison));
        }

        let mut textures = BTreeMap::new();
        for texture in &spec.defs.textures {
            let given = spec
                .textures
                .iter_mut()
                .find(|t| t.name == texture.name)
                .ok_or_else(|| Error::resource(format!("texture `{}` has no spec entry", texture.name)))?;
            let manager = TextureManager::from_source(device, &core.queue, &texture.name, &mut given.data, &texture.kind)?;
            let stream = match std::mem::replace(&mut given.data, TextureSource::Blank { width: 0, height: 0 }) {
                TextureSource::Stream(stream) => Some(stream),
                other => {
                    given.data = other;
                    None
                }
            };
            textures.insert(
                texture.binding,
                BoundTexture {
                    name: texture.name.clone(),
                    manager,
                    stream,
                },
            );
        }

        let bind_group_layout = layout.create_bind_group_layout(device)?;
        let bind_groups = create_bind_groups(device, &layout, &bind_group_layout, &buffers, &textures, &samplers)?;
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", spec.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut instance_buffer = None;
        let mut instance_count = spec.geometry.instance_count.unwrap_or(1);
        let renderer = match (&spec.defs.entries.vertex, &spec.defs.entries.fragment) {
            (Some(vertex), Some(fragment)) => {
                let storage_element = match vertex_binding {
                    Some(binding) => {
                        let (name, var) = spec
                            .defs
                            .storages
                            .iter()
                            .find(|(_, v)| v.binding == Some(binding))
                            .ok_or_else(|| Error::validation("vertex storage vanished"))?;
                        match &var.layout {
                            Layout::Array(array) => {
                                if spec.geometry.instance_count.is_none() {
                                    instance_count = match array.count {
                                        0 => spec.storage(name).map_or(1, |s| s.size),
                                        n => n,
                                    };
                                }
                                Some((array.element.as_ref(), array.stride))
                            }
                            _ => {
                                return Err(Error::validation(format!(
                                    "vertex storage `{name}` must be an array"
                                )))
                            }
                        }
                    }
                    None => None,
                };
                let instance_layout = InstanceLayout::new(&vertex.inputs, storage_element)?;
                if let (Some(instance), None) = (&instance_layout, vertex_binding) {
                    let data = spec.geometry.instance_data.as_ref().ok_or_else(|| {
                        Error::resource(format!(
                            "vertex entry point `{}` has @location inputs but no vertex storage or instance data",
                            vertex.name
                        ))
                    })?;
                    if spec.geometry.instance_count.is_none() && instance.stride > 0 {
                        instance_count = (data.len() as u64 * 4 / instance.stride) as u32;
                    }
                    instance_buffer = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Instance Buffer"),
                        contents: bytemuck::cast_slice(data),
                        usage: wgpu::BufferUsages::VERTEX,
                    }));
                }
                Some(Renderer::new(
                    device,
                    module,
                    &vertex.name,
                    &fragment.name,
                    spec.target_format,
                    &pipeline_layout,
                    instance_layout,
                    spec.geometry.topology,
                ))
            }
            _ => None,
        };

        let mut computes = Vec::new();
        for entry in &spec.defs.entries.computes {
            let dispatch = spec
                .compute(&entry.name)
                .ok_or_else(|| Error::validation(format!("compute entry point `{}` has no dispatch", entry.name)))?;
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{} Pipeline - {}", spec.label, entry.name)),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some(&entry.name),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            computes.push(ComputePass {
                name: entry.name.clone(),
                pipeline,
                workgroups: dispatch.dispatch(entry.workgroup_size),
            });
        }

        let groups = table.groups() as u32;
        let steps = if computes.is_empty() {
            0
        } else {
            let requested = spec.compute_group_count.unwrap_or(1);
            let steps = compute_group_count(requested, groups);
            if steps != requested {
                debug!("compute steps per frame rounded from {requested} to {steps} for {groups} groups");
            }
            steps
        };
        let [r, g, b, a] = spec.clear_color;
        info!(
            "ShaderInstance::build, {}: {} buffers, {} textures, {} computes x {steps} steps, render: {}",
            spec.label,
            buffers.len(),
            textures.len(),
            computes.len(),
            renderer.is_some()
        );

        Ok(Self {
            label: spec.label,
            layout,
            bind_group_layout,
            bind_groups,
            buffers,
            textures,
            samplers,
            renderer,
            computes,
            steps,
            readbacks,
            listeners: Vec::new(),
            uniforms: spec.uniforms,
            pointer: spec.pointer,
            geometry: spec.geometry,
            instance_count,
            vertex_binding,
            instance_buffer,
            clear_color: wgpu::Color { r, g, b, a },
            sink: sink.clone(),
            destroyed: false,
        })
    }

    /// Registers a callback for every completed read-back.
    pub fn add_read_listeners(&mut self, listener: impl FnMut(&str, &BufferView) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Forwards a pointer position to the spec's pointer hook.
    pub fn pointer(&mut self, x: f32, y: f32) {
        if let Some(pointer) = &mut self.pointer {
            pointer(x, y);
        }
    }

    /// Compute steps dispatched per frame.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn groups(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn has_render(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Host view of a uniform or storage.
    pub fn view(&self, name: &str) -> Option<&BufferView> {
        self.buffers.values().find(|b| b.name == name).map(|b| &b.view)
    }

    /// Overwrites part of a storage or uniform and uploads it right away.
    pub fn set(&mut self, core: &Core, name: &str, value: &Value) -> Result<(), Error> {
        let bound = self
            .buffers
            .values_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| Error::resource(format!("no buffer named `{name}`")))?;
        bound.view.set(value)?;
        bound.view.take_dirty();
        core.queue.write_buffer(&bound.buffer, 0, bound.view.bytes());
        Ok(())
    }

    /// Executes one frame: uniforms, compute steps, render, read-back.
    pub fn run(
        &mut self,
        core: &Core,
        frame: u64,
        system: &SystemUniforms,
        target: Option<&wgpu::TextureView>,
    ) -> Result<(), Error> {
        if self.destroyed {
            return Err(Error::Runtime(format!("`{}` was destroyed", self.label)));
        }
        let span = info_span!("[ShaderInstance::run]", frame);
        let _guard = span.enter();

        self.drain_readbacks();
        self.update_streams(core)?;
        self.write_uniforms(core, frame, system)?;

        let mut encoder = core.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&format!("{} Frame {frame}", self.label)),
        });
        let groups = self.bind_groups.len();

        if !self.computes.is_empty() {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("{} Compute", self.label)),
                timestamp_writes: None,
            });
            for step in 0..self.steps {
                let group = &self.bind_groups[compute_bind_group(frame, step, groups)];
                for pass in &self.computes {
                    compute_pass.set_pipeline(&pass.pipeline);
                    compute_pass.set_bind_group(0, group, &[]);
                    let [x, y, z] = pass.workgroups;
                    compute_pass.dispatch_workgroups(x, y, z);
                }
            }
        }

        if let (Some(renderer), Some(target)) = (&self.renderer, target) {
            let index = render_bind_group(frame, self.steps, groups);
            let vertex_buffer = match self.vertex_binding {
                Some(binding) => {
                    let table = &self.layout.table;
                    let resource = (0..table.slots())
                        .find(|&s| table.layout_binding(s) == binding)
                        .map_or(binding, |slot| table.resource_at(index, slot));
                    self.buffers.get(&resource).map(|b| &b.buffer)
                }
                None => self.instance_buffer.as_ref(),
            };
            let mut render_pass = Renderer::begin_render_pass(
                &mut encoder,
                target,
                wgpu::LoadOp::Clear(self.clear_color),
                Some("Render Pass"),
            );
            render_pass.set_pipeline(&renderer.render_pipeline);
            render_pass.set_bind_group(0, &self.bind_groups[index], &[]);
            if renderer.instance_layout.is_some() {
                if let Some(buffer) = vertex_buffer {
                    render_pass.set_vertex_buffer(0, buffer.slice(..));
                }
            }
            render_pass.draw(0..self.geometry.vertex_count, 0..self.instance_count);
        }

        for readback in &mut self.readbacks {
            if let MapState::Idle = readback.state {
                if let Some(source) = self.buffers.get(&readback.binding) {
                    encoder.copy_buffer_to_buffer(&source.buffer, 0, &readback.staging, 0, readback.size);
                    readback.state = MapState::Copied;
                }
            }
        }

        core.queue.submit(Some(encoder.finish()));

        for readback in &mut self.readbacks {
            if let MapState::Copied = readback.state {
                let (tx, rx) = channel::bounded(1);
                readback.staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send(result);
                });
                readback.state = MapState::Mapping(rx);
            }
        }
        core.device
            .poll(wgpu::PollType::Poll)
            .map_err(|e| Error::Runtime(e.to_string()))?;
        self.drain_readbacks();
        Ok(())
    }

    /// Blocks until every outstanding read-back has been delivered.
    pub fn wait_for_reads(&mut self, core: &Core) -> Result<(), Error> {
        if self.readbacks.iter().any(|r| matches!(r.state, MapState::Mapping(_))) {
            core.device
                .poll(wgpu::PollType::wait_indefinitely())
                .map_err(|e| Error::Runtime(e.to_string()))?;
        }
        self.drain_readbacks();
        Ok(())
    }

    /// Releases every device resource. Further `run` calls fail.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        for bound in self.buffers.values() {
            bound.buffer.destroy();
        }
        for readback in &self.readbacks {
            readback.staging.destroy();
        }
        for texture in self.textures.values() {
            texture.manager.destroy();
        }
        if let Some(buffer) = &self.instance_buffer {
            buffer.destroy();
        }
        self.destroyed = true;
        info!("ShaderInstance::destroy, {}", self.label);
    }

    fn drain_readbacks(&mut self) {
        for readback in &mut self.readbacks {
            let MapState::Mapping(rx) = &readback.state else {
                continue;
            };
            match rx.try_recv() {
                Ok(Ok(())) => {
                    if let Some(bound) = self.buffers.get_mut(&readback.binding) {
                        {
                            let data = readback.staging.slice(..).get_mapped_range();
                            bound.view.update(&data);
                        }
                        bound.view.take_dirty();
                        readback.staging.unmap();
                        for listener in &mut self.listeners {
                            listener(&bound.name, &bound.view);
                        }
                    } else {
                        readback.staging.unmap();
                    }
                    readback.state = MapState::Idle;
                }
                Ok(Err(e)) => {
                    self.sink.warn(ErrorKind::Runtime, format!("read-back failed: {e}"));
                    readback.state = MapState::Idle;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => readback.state = MapState::Idle,
            }
        }
    }

    fn write_uniforms(&mut self, core: &Core, frame: u64, system: &SystemUniforms) -> Result<(), Error> {
        let produced = self.uniforms.as_mut().map(|f| f(frame));
        let uniform_count = self.buffers.values().filter(|b| b.uniform).count();
        for bound in self.buffers.values_mut().filter(|b| b.uniform) {
            system.apply(&bound.name, &mut bound.view)?;
            match &produced {
                Some(value @ Value::Struct(fields)) => match fields.get(&bound.name) {
                    Some(own) => bound.view.set(own)?,
                    // a single uniform may be given directly
                    None if uniform_count == 1 => bound.view.set(value)?,
                    None => {}
                },
                Some(value) if uniform_count == 1 => bound.view.set(value)?,
                _ => {}
            }
            if bound.view.take_dirty() {
                core.queue.write_buffer(&bound.buffer, 0, bound.view.bytes());
            }
        }
        Ok(())
    }

    fn update_streams(&mut self, core: &Core) -> Result<(), Error> {
        let mut resized = false;
        for bound in self.textures.values_mut() {
            let Some(stream) = &mut bound.stream else {
                continue;
            };
            let (width, height) = stream.size();
            if (width, height) != (bound.manager.width, bound.manager.height) {
                let kind = self
                    .layout
                    .get_binding_by_name(&bound.name)
                    .and_then(|b| match &b.resource_type {
                        ResourceType::Texture(kind) => Some(kind.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                let mut blank = TextureSource::Blank { width, height };
                let manager = TextureManager::from_source(&core.device, &core.queue, &bound.name, &mut blank, &kind)?;
                bound.manager.destroy();
                bound.manager = manager;
                resized = true;
                debug!("stream `{}` resized to {width}x{height}", bound.name);
            }
            if let Some(frame) = stream.next_frame() {
                bound.manager.write_rgba(&core.queue, &frame);
            }
        }
        if resized {
            self.bind_groups = create_bind_groups(
                &core.device,
                &self.layout,
                &self.bind_group_layout,
                &self.buffers,
                &self.textures,
                &self.samplers,
            )?;
        }
        Ok(())
    }
}

impl Drop for ShaderInstance {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("ShaderInstance `{}` dropped without destroy()", self.label);
            self.destroy();
        }
    }
}

fn check_limits(core: &Core, layout: &ResourceLayout) -> Result<(), Error> {
    let limits = core.device.limits();
    for binding in &layout.bindings {
        match binding.resource_type {
            ResourceType::StorageBuffer { size, .. }
                if size > u64::from(limits.max_storage_buffer_binding_size) =>
            {
                return Err(Error::Compatibility(format!(
                    "storage `{}` needs {size} bytes, max_storage_buffer_binding_size is {}",
                    binding.name, limits.max_storage_buffer_binding_size
                )))
            }
            ResourceType::UniformBuffer { size }
                if size > u64::from(limits.max_uniform_buffer_binding_size) =>
            {
                return Err(Error::Compatibility(format!(
                    "uniform `{}` needs {size} bytes, which exceeds the device limit of {}",
                    binding.name, limits.max_uniform_buffer_binding_size
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

fn create_bind_groups(
    device: &wgpu::Device,
    layout: &ResourceLayout,
    bind_group_layout: &wgpu::BindGroupLayout,
    buffers: &BTreeMap<u32, BoundBuffer>,
    textures: &BTreeMap<u32, BoundTexture>,
    samplers: &BTreeMap<u32, wgpu::Sampler>,
) -> Result<Vec<wgpu::BindGroup>, Error> {
    let table = &layout.table;
    (0..table.groups())
        .map(|group| {
            let entries = table
                .entries(group)
                .map(|(slot_binding, resource)| {
                    let resource_ref = if let Some(bound) = buffers.get(&resource) {
                        bound.buffer.as_entire_binding()
                    } else if let Some(texture) = textures.get(&resource) {
                        wgpu::BindingResource::TextureView(&texture.manager.view)
                    } else if let Some(sampler) = samplers.get(&resource) {
                        wgpu::BindingResource::Sampler(sampler)
                    } else {
                        return Err(Error::resource(format!(
                            "binding group {group} needs binding {resource}, which has no resource"
                        )));
                    };
                    Ok(wgpu::BindGroupEntry {
                        binding: slot_binding,
                        resource: resource_ref,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Bind Group {group}")),
                layout: bind_group_layout,
                entries: &entries,
            }))
        })
        .collect()
}
