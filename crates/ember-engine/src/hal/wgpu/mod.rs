//! Backend driving real hardware through wgpu.
//!
//! wgpu tracks resource states itself, so barriers are validated by the core
//! layer and translate to nothing here. Clears are folded into the load op of
//! the next render pass on the same target.

mod pipeline;
mod swap_chain;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use self::pipeline::{Pipeline, RootSignature};
use self::swap_chain::SwapChain;
use super::{
    AdapterInfo, Backend, Command, DescriptorKind, FeatureLevel, Fence, GpuError, GpuResult,
    HeapKind, PipelineDesc, PipelineId, PowerPreference, ResourceDesc, ResourceId, ResourceKind,
    RootSignatureDesc, RootSignatureId, ScissorRect, SurfaceHandle, SwapChainDesc, TextureFormat,
    VertexBufferView, Viewport,
};

enum Resource {
    Buffer { buffer: wgpu::Buffer, heap: HeapKind, mapped: bool },
    Texture { texture: wgpu::Texture, view: wgpu::TextureView },
    BackBuffer { index: u32 },
}

struct Gpu {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

/// wgpu implementation of [`Backend`].
pub struct WgpuBackend {
    instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    gpu: Option<Gpu>,
    resources: HashMap<ResourceId, Resource>,
    root_signatures: HashMap<RootSignatureId, RootSignature>,
    pipelines: HashMap<PipelineId, Pipeline>,
    bind_groups: HashMap<(RootSignatureId, ResourceId), wgpu::BindGroup>,
    sampler: Option<wgpu::Sampler>,
    swap_chain: Option<SwapChain>,
    lost: Arc<Mutex<Option<String>>>,
    next_id: u64,
}

impl WgpuBackend {
    /// Creates the instance. `debug_layer` turns on API validation.
    pub fn new(debug_layer: bool) -> Self {
        let flags = if debug_layer {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });

        Self {
            instance,
            adapters: Vec::new(),
            gpu: None,
            resources: HashMap::new(),
            root_signatures: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            sampler: None,
            swap_chain: None,
            lost: Arc::new(Mutex::new(None)),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn gpu(&self) -> GpuResult<&Gpu> {
        if let Some(reason) = self.lost.lock().clone() {
            return Err(GpuError::DeviceRemoved(reason));
        }
        self.gpu
            .as_ref()
            .ok_or_else(|| GpuError::InvalidCall("device not opened".into()))
    }

    fn describe(index: usize, adapter: &wgpu::Adapter) -> AdapterInfo {
        let info = adapter.get_info();
        let max_feature_level = if adapter.get_downlevel_capabilities().is_webgpu_compliant() {
            FeatureLevel::Level12_0
        } else {
            FeatureLevel::Level11_0
        };
        AdapterInfo {
            index,
            name: format!("{} ({:?})", info.name, info.backend),
            vendor_id: info.vendor,
            // wgpu does not expose memory sizes.
            dedicated_memory: 0,
            is_software: info.device_type == wgpu::DeviceType::Cpu,
            max_feature_level,
        }
    }

    /// Blocks until a buffer mapping resolves.
    fn map_blocking(gpu: &Gpu, id: ResourceId, buffer: &wgpu::Buffer, mode: wgpu::MapMode) -> GpuResult<()> {
        let (tx, rx) = flume::bounded(1);
        buffer.slice(..).map_async(mode, move |result| {
            let _ = tx.send(result);
        });
        gpu.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::Map { resource: id, reason: e.to_string() })?;
        rx.recv()
            .map_err(|e| GpuError::Map { resource: id, reason: e.to_string() })?
            .map_err(|e| GpuError::Map { resource: id, reason: e.to_string() })
    }

    fn texture_of(&mut self, id: ResourceId) -> GpuResult<wgpu::Texture> {
        match self.resources.get(&id) {
            Some(Resource::Texture { texture, .. }) => Ok(texture.clone()),
            Some(Resource::BackBuffer { index }) => {
                let index = *index;
                let device = self.gpu()?.device.clone();
                let chain = self
                    .swap_chain
                    .as_mut()
                    .ok_or_else(|| GpuError::InvalidCall("no swap chain".into()))?;
                chain.texture(&device, index)
            }
            Some(Resource::Buffer { .. }) => Err(GpuError::InvalidCall(format!("{id} is not a texture"))),
            None => Err(GpuError::UnknownResource(id)),
        }
    }

    fn buffer_of(&self, id: ResourceId) -> GpuResult<&wgpu::Buffer> {
        match self.resources.get(&id) {
            Some(Resource::Buffer { buffer, .. }) => Ok(buffer),
            Some(_) => Err(GpuError::InvalidCall(format!("{id} is not a buffer"))),
            None => Err(GpuError::UnknownResource(id)),
        }
    }

    fn bind_group(&mut self, root: RootSignatureId, texture: ResourceId) -> GpuResult<wgpu::BindGroup> {
        if let Some(group) = self.bind_groups.get(&(root, texture)) {
            return Ok(group.clone());
        }
        let device = self.gpu()?.device.clone();
        let view = match self.resources.get(&texture) {
            Some(Resource::Texture { view, .. }) => view.clone(),
            _ => return Err(GpuError::InvalidCall(format!("{texture} cannot be sampled"))),
        };
        let layout = self
            .root_signatures
            .get(&root)
            .and_then(|r| r.bind_group_layout.as_ref())
            .ok_or_else(|| GpuError::InvalidCall("root signature has no shader resource table".into()))?;
        let sampler = self
            .sampler
            .get_or_insert_with(|| pipeline::create_sampler(&device))
            .clone();

        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ember srv table"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&sampler) },
            ],
        });
        self.bind_groups.insert((root, texture), group.clone());
        Ok(group)
    }

    fn encode(&mut self, encoder: &mut wgpu::CommandEncoder, commands: &[Command]) -> GpuResult<()> {
        let mut state = PassState::default();
        for command in commands {
            match *command {
                Command::SetPipeline(id) => state.pipeline = Some(id),
                Command::SetRootSignature(id) => state.root_signature = Some(id),
                Command::SetShaderResource { resource, .. } => state.shader_resource = Some(resource),
                Command::SetViewport(vp) => state.viewport = Some(vp),
                Command::SetScissor(sc) => state.scissor = Some(sc),
                Command::Barrier(t) => {
                    if state.pending_clear.is_some_and(|(target, _)| target == t.resource) {
                        self.flush_clear(encoder, &mut state)?;
                    }
                }
                Command::SetRenderTarget(id) => state.render_target = Some(id),
                Command::ClearRenderTarget { target, color } => {
                    self.flush_clear(encoder, &mut state)?;
                    state.pending_clear = Some((target, color));
                }
                Command::SetVertexBuffer(view) => state.vertex_buffer = Some(view),
                Command::Draw { vertex_count, instance_count } => {
                    self.draw(encoder, &mut state, vertex_count, instance_count)?;
                }
                Command::CopyBuffer { src, dst, size } => {
                    self.flush_clear(encoder, &mut state)?;
                    let copy_size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
                    encoder.copy_buffer_to_buffer(self.buffer_of(src)?, 0, self.buffer_of(dst)?, 0, copy_size);
                }
                Command::CopyBufferToTexture { src, dst, row_pitch } => {
                    self.flush_clear(encoder, &mut state)?;
                    let texture = self.texture_of(dst)?;
                    let size = texture.size();
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: self.buffer_of(src)?,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(row_pitch),
                                rows_per_image: Some(size.height),
                            },
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture: &texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        size,
                    );
                }
                Command::CopyTextureToBuffer { src, dst, row_pitch } => {
                    self.flush_clear(encoder, &mut state)?;
                    let texture = self.texture_of(src)?;
                    let size = texture.size();
                    encoder.copy_texture_to_buffer(
                        wgpu::TexelCopyTextureInfo {
                            texture: &texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::TexelCopyBufferInfo {
                            buffer: self.buffer_of(dst)?,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(row_pitch),
                                rows_per_image: Some(size.height),
                            },
                        },
                        size,
                    );
                }
            }
        }
        self.flush_clear(encoder, &mut state)
    }

    /// Emits a clear-only pass for a clear no draw consumed.
    fn flush_clear(&mut self, encoder: &mut wgpu::CommandEncoder, state: &mut PassState) -> GpuResult<()> {
        let Some((target, color)) = state.pending_clear.take() else {
            return Ok(());
        };
        let view = self.texture_of(target)?.create_view(&wgpu::TextureViewDescriptor::default());
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ember clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(to_color(color)), store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }

    fn draw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        state: &mut PassState,
        vertex_count: u32,
        instance_count: u32,
    ) -> GpuResult<()> {
        let missing = |what: &str| GpuError::InvalidCall(format!("draw without a bound {what}"));
        let target = state.render_target.ok_or_else(|| missing("render target"))?;
        let pipeline_id = state.pipeline.ok_or_else(|| missing("pipeline"))?;
        let root_id = state.root_signature.ok_or_else(|| missing("root signature"))?;
        let vb = state.vertex_buffer.ok_or_else(|| missing("vertex buffer"))?;
        let viewport = state.viewport.ok_or_else(|| missing("viewport"))?;
        let scissor = state.scissor.ok_or_else(|| missing("scissor rect"))?;

        if state.pending_clear.is_some_and(|(t, _)| t != target) {
            self.flush_clear(encoder, state)?;
        }
        let load = match state.pending_clear.take() {
            Some((_, color)) => wgpu::LoadOp::Clear(to_color(color)),
            None => wgpu::LoadOp::Load,
        };

        let has_table = self
            .root_signatures
            .get(&root_id)
            .is_some_and(|r| r.bind_group_layout.is_some());
        let bind_group = match (has_table, state.shader_resource) {
            (true, Some(texture)) => Some(self.bind_group(root_id, texture)?),
            (true, None) => return Err(missing("shader resource")),
            (false, _) => None,
        };
        let view = self.texture_of(target)?.create_view(&wgpu::TextureViewDescriptor::default());
        let pipeline = self
            .pipelines
            .get(&pipeline_id)
            .ok_or_else(|| GpuError::InvalidCall(format!("unknown pipeline {pipeline_id:?}")))?;
        if pipeline.root_signature != root_id {
            return Err(GpuError::InvalidCall("pipeline was built for a different root signature".into()));
        }
        let buffer = self.buffer_of(vb.resource)?;

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ember draw pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        rpass.set_pipeline(&pipeline.pipeline);
        if let Some(group) = &bind_group {
            rpass.set_bind_group(0, group, &[]);
        }
        rpass.set_vertex_buffer(0, buffer.slice(0..vb.size as u64));
        rpass.set_viewport(
            viewport.x,
            viewport.y,
            viewport.width,
            viewport.height,
            viewport.min_depth,
            viewport.max_depth,
        );
        rpass.set_scissor_rect(
            scissor.left,
            scissor.top,
            scissor.right.saturating_sub(scissor.left),
            scissor.bottom.saturating_sub(scissor.top),
        );
        rpass.draw(0..vertex_count, 0..instance_count);
        Ok(())
    }
}

/// Bindings of the command list being translated.
#[derive(Default)]
struct PassState {
    pipeline: Option<PipelineId>,
    root_signature: Option<RootSignatureId>,
    shader_resource: Option<ResourceId>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    render_target: Option<ResourceId>,
    vertex_buffer: Option<VertexBufferView>,
    pending_clear: Option<(ResourceId, [f32; 4])>,
}

fn to_color(c: [f32; 4]) -> wgpu::Color {
    wgpu::Color { r: c[0] as f64, g: c[1] as f64, b: c[2] as f64, a: c[3] as f64 }
}

impl Backend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn enumerate_adapters(&mut self, preference: PowerPreference) -> Vec<AdapterInfo> {
        let order: &[(wgpu::PowerPreference, bool)] = match preference {
            PowerPreference::HighPerformance => &[
                (wgpu::PowerPreference::HighPerformance, false),
                (wgpu::PowerPreference::LowPower, false),
                (wgpu::PowerPreference::None, true),
            ],
            PowerPreference::Unspecified => &[
                (wgpu::PowerPreference::None, false),
                (wgpu::PowerPreference::LowPower, false),
                (wgpu::PowerPreference::HighPerformance, false),
                (wgpu::PowerPreference::None, true),
            ],
        };

        let mut listed = Vec::new();
        for &(power_preference, force_fallback_adapter) in order {
            let request = self.instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            });
            let Ok(adapter) = pollster::block_on(request) else {
                continue;
            };

            let info = adapter.get_info();
            let index = match self.adapters.iter().position(|a| a.get_info() == info) {
                Some(i) => i,
                None => {
                    self.adapters.push(adapter);
                    self.adapters.len() - 1
                }
            };
            if !listed.contains(&index) {
                listed.push(index);
            }
        }

        listed
            .into_iter()
            .map(|i| Self::describe(i, &self.adapters[i]))
            .collect()
    }

    fn probe_device(&mut self, adapter: &AdapterInfo, level: FeatureLevel) -> bool {
        self.adapters
            .get(adapter.index)
            .is_some_and(|a| Self::describe(adapter.index, a).max_feature_level >= level)
    }

    fn open_device(&mut self, adapter: &AdapterInfo, level: FeatureLevel) -> GpuResult<()> {
        if self.gpu.is_some() {
            return Err(GpuError::InvalidCall("device already opened".into()));
        }
        let wgpu_adapter = self
            .adapters
            .get(adapter.index)
            .cloned()
            .ok_or_else(|| GpuError::DeviceCreation {
                adapter: adapter.name.clone(),
                reason: "adapter was not enumerated".into(),
            })?;

        let required_limits = if level >= FeatureLevel::Level12_0 {
            wgpu::Limits::default()
        } else {
            wgpu::Limits::downlevel_defaults()
        };
        let (device, queue) = pollster::block_on(wgpu_adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("ember device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GpuError::DeviceCreation { adapter: adapter.name.clone(), reason: e.to_string() })?;

        let lost = self.lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("wgpu device lost ({reason:?}): {message}");
            *lost.lock() = Some(message);
        });

        log::debug!("wgpu device opened on `{}` at feature level {level}", adapter.name);
        self.gpu = Some(Gpu { adapter: wgpu_adapter, device, queue });
        Ok(())
    }

    fn descriptor_increment(&self, kind: DescriptorKind) -> u32 {
        match kind {
            DescriptorKind::RenderTarget => 32,
            DescriptorKind::ShaderResource => 64,
        }
    }

    fn create_resource(&mut self, desc: &ResourceDesc) -> GpuResult<ResourceId> {
        let device = self.gpu()?.device.clone();
        let resource = match desc.kind {
            ResourceKind::Buffer { size } => {
                let usage = match desc.heap {
                    HeapKind::Upload => wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                    HeapKind::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    HeapKind::Default => {
                        wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
                    }
                };
                let mapped = desc.heap == HeapKind::Upload;
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&desc.label),
                    size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
                    usage,
                    mapped_at_creation: mapped,
                });
                Resource::Buffer { buffer, heap: desc.heap, mapped }
            }
            ResourceKind::Texture2d { width, height, format } => {
                if desc.heap != HeapKind::Default {
                    return Err(GpuError::Creation {
                        what: "resource",
                        reason: format!("`{}`: textures live in the default heap", desc.label),
                    });
                }
                let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC;
                if desc.render_target {
                    usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
                }
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&desc.label),
                    size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: pipeline::texture_format(format),
                    usage,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Resource::Texture { texture, view }
            }
        };

        let id = ResourceId(self.next_id());
        self.resources.insert(id, resource);
        Ok(id)
    }

    fn destroy_resource(&mut self, id: ResourceId) -> GpuResult<()> {
        match self.resources.remove(&id) {
            Some(Resource::BackBuffer { .. }) => Ok(()),
            Some(_) => {
                self.bind_groups.retain(|(_, texture), _| *texture != id);
                Ok(())
            }
            None => Err(GpuError::UnknownResource(id)),
        }
    }

    fn write_mapped(&mut self, id: ResourceId, offset: u64, bytes: &[u8]) -> GpuResult<()> {
        let gpu = self.gpu.as_ref().ok_or_else(|| GpuError::InvalidCall("device not opened".into()))?;
        let Some(Resource::Buffer { buffer, heap: HeapKind::Upload, mapped }) = self.resources.get_mut(&id) else {
            return Err(GpuError::Map { resource: id, reason: "not an upload-heap buffer".into() });
        };
        if !*mapped {
            Self::map_blocking(gpu, id, buffer, wgpu::MapMode::Write)?;
            *mapped = true;
        }

        let start = offset as usize;
        let mut view = buffer.slice(..).get_mapped_range_mut();
        let dst = view
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| GpuError::Map { resource: id, reason: "write past the end".into() })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn read_mapped(&mut self, id: ResourceId, offset: u64, len: u64) -> GpuResult<Vec<u8>> {
        let gpu = self.gpu()?;
        let Some(Resource::Buffer { buffer, heap: HeapKind::Readback, .. }) = self.resources.get(&id) else {
            return Err(GpuError::Map { resource: id, reason: "not a readback-heap buffer".into() });
        };
        Self::map_blocking(gpu, id, buffer, wgpu::MapMode::Read)?;

        let start = offset as usize;
        let out = {
            let view = buffer.slice(..).get_mapped_range();
            view.get(start..start + len as usize).map(<[u8]>::to_vec)
        };
        buffer.unmap();
        out.ok_or_else(|| GpuError::Map { resource: id, reason: "read past the end".into() })
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId> {
        let root = pipeline::create_root_signature(&self.gpu()?.device, desc);
        let id = RootSignatureId(self.next_id());
        self.root_signatures.insert(id, root);
        Ok(id)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineId> {
        let id = PipelineId(self.next_id());
        let device = &self.gpu()?.device;
        let root = self.root_signatures.get(&desc.root_signature).ok_or_else(|| GpuError::Creation {
            what: "pipeline state",
            reason: format!("`{}` references an unknown root signature", desc.label),
        })?;
        let pipeline = pipeline::create_pipeline(device, desc, root);
        self.pipelines.insert(id, Pipeline { pipeline, root_signature: desc.root_signature });
        Ok(id)
    }

    fn create_swap_chain(
        &mut self,
        surface: Option<&SurfaceHandle>,
        desc: &SwapChainDesc,
    ) -> GpuResult<TextureFormat> {
        if self.swap_chain.is_some() {
            return Err(GpuError::InvalidCall("swap chain already created".into()));
        }
        if desc.buffer_count < 2 {
            return Err(GpuError::Creation {
                what: "swap chain",
                reason: format!("flip model needs at least 2 buffers, got {}", desc.buffer_count),
            });
        }
        let gpu = self.gpu()?;

        let surface = match surface {
            Some(handle) => Some(
                self.instance
                    .create_surface(handle.clone())
                    .map_err(|e| GpuError::Creation { what: "surface", reason: e.to_string() })?,
            ),
            None => None,
        };
        let chain = SwapChain::new(&gpu.device, surface.map(|s| (s, &gpu.adapter)), desc)?;
        let format = chain.format;

        for index in 0..desc.buffer_count {
            let id = ResourceId(self.next_id());
            self.resources.insert(id, Resource::BackBuffer { index });
        }
        self.swap_chain = Some(chain);
        Ok(format)
    }

    fn swap_chain_buffer(&mut self, index: u32) -> GpuResult<ResourceId> {
        self.resources
            .iter()
            .find_map(|(id, r)| match r {
                Resource::BackBuffer { index: i } if *i == index => Some(*id),
                _ => None,
            })
            .ok_or_else(|| GpuError::InvalidCall(format!("no swap chain buffer {index}")))
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swap_chain.as_ref().map_or(0, SwapChain::current_index)
    }

    fn create_fence(&mut self, initial: u64) -> GpuResult<Fence> {
        let device = self.gpu()?.device.clone();
        Ok(Fence::with_driver(initial, move || {
            if let Err(e) = device.poll(wgpu::PollType::wait_indefinitely()) {
                log::error!("wgpu poll failed: {e}");
            }
        }))
    }

    fn execute(&mut self, lists: &[&[Command]]) -> GpuResult<()> {
        let device = self.gpu()?.device.clone();

        // Upload buffers must be unmapped before the GPU reads them.
        for id in lists.iter().flat_map(|l| l.iter()).flat_map(Command::resources) {
            if let Some(Resource::Buffer { buffer, heap: HeapKind::Upload, mapped }) = self.resources.get_mut(&id) {
                if *mapped {
                    buffer.unmap();
                    *mapped = false;
                }
            }
        }

        let mut buffers = Vec::with_capacity(lists.len());
        for list in lists {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ember command list"),
            });
            self.encode(&mut encoder, list)?;
            buffers.push(encoder.finish());
        }
        self.gpu()?.queue.submit(buffers);
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> GpuResult<()> {
        let device = self.gpu()?.device.clone();
        let chain = self
            .swap_chain
            .as_mut()
            .ok_or_else(|| GpuError::InvalidCall("present without a swap chain".into()))?;
        chain.present(&device, sync_interval);
        Ok(())
    }

    fn signal(&mut self, fence: &Fence, value: u64) -> GpuResult<()> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| GpuError::InvalidCall("device not opened".into()))?;
        let fence = fence.clone();
        gpu.queue.on_submitted_work_done(move || fence.complete(value));
        Ok(())
    }
}
