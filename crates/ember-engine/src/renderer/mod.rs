//! Renderer facade: initialization, the per-frame loop and shutdown.
//!
//! `initialize` is the constructor and `shutdown` consumes the renderer, so a
//! frame can never be rendered before initialization or after teardown.

mod config;
pub mod scene;

use std::sync::Arc;

use crate::command::{CommandAllocator, CommandList, CommandRecorder, FrameInputs};
use crate::device::{Device, DeviceContext, GpuInit, GpuResource};
use crate::hal::{
    Backend, GpuResult, PipelineDesc, ResourceDesc, RootSignatureDesc, ScissorRect, SurfaceHandle,
    VertexBufferView, VertexLayout, Viewport,
};
use crate::present::{Descriptor, FrameResources, SwapChain, BUFFER_COUNT};
use crate::sync::{FrameSynchronizer, Present, SyncStats};
use crate::upload::{read_back, UploadPipeline};

pub use config::{RendererConfig, SceneKind};

/// Outcome of a clean shutdown.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ShutdownReport {
    pub frames_rendered: u64,
    pub final_back_buffer_index: u32,
    pub last_fence_value: u64,
    pub sync: SyncStats,
    /// Resources still tracked by the device after teardown.
    pub leaked_resources: usize,
}

/// GPU objects that only exist for the textured scene.
#[derive(Debug)]
struct SceneTexture {
    texture: GpuResource,
}

/// Owns every GPU object needed to draw the scene into the swap chain.
pub struct Renderer {
    config: RendererConfig,
    ctx: DeviceContext,
    swap_chain: SwapChain,
    frames: FrameResources,
    recorder: CommandRecorder,
    sync: FrameSynchronizer,
    uploads: UploadPipeline,
    vertex_buffer: GpuResource,
    vertex_view: VertexBufferView,
    vertex_count: u32,
    texture: Option<SceneTexture>,
    size: (u32, u32),
    frames_rendered: u64,
}

impl Renderer {
    /// Creates the device, swap chain and pipeline, and uploads the scene.
    ///
    /// Returns once the uploaded data is resident on the GPU.
    pub fn initialize(
        backend: Box<dyn Backend>,
        surface: Option<SurfaceHandle>,
        width: u32,
        height: u32,
        init: &GpuInit,
        config: RendererConfig,
    ) -> GpuResult<Self> {
        let ctx = DeviceContext::new(backend, init)?;
        let device = ctx.device().clone();

        let vsync = config.vsync_interval > 0;
        let mut swap_chain = SwapChain::create(ctx.queue(), surface.as_ref(), width, height, BUFFER_COUNT, vsync)?;
        let textured = config.scene == SceneKind::Textured;
        let mut frames = FrameResources::create(&device, &mut swap_chain, u32::from(textured))?;

        let root_signature = device.create_root_signature(&RootSignatureDesc {
            label: "scene root signature".into(),
            shader_resource_table: textured,
        })?;
        let vertex_layout = if textured { VertexLayout::PositionUv } else { VertexLayout::PositionColor };
        let pipeline = device.create_pipeline(&PipelineDesc {
            label: format!("{:?} pipeline", config.scene),
            root_signature,
            vertex_layout,
            target_format: swap_chain.format(),
        })?;

        let sync = FrameSynchronizer::new(
            &device,
            config.sync_mode,
            swap_chain.buffer_count(),
            swap_chain.current_back_buffer_index(),
        )?;
        let recorder = CommandRecorder::new(
            &device,
            pipeline,
            root_signature,
            Viewport::from_size(width, height),
            ScissorRect::from_size(width, height),
            sync.allocator_count(),
        )?;

        let aspect_ratio = width as f32 / height as f32;
        let vertices: Vec<u8> = match config.scene {
            SceneKind::Triangle => bytemuck::cast_slice(&scene::triangle(aspect_ratio)).to_vec(),
            SceneKind::Textured => bytemuck::cast_slice(&scene::textured_quad(aspect_ratio)).to_vec(),
        };
        let vertex_count = vertices.len() as u32 / vertex_layout.stride();
        let vertex_buffer = device.create_resource(&ResourceDesc::buffer("vertex buffer", vertices.len() as u64))?;

        let setup_allocator = CommandAllocator::new("setup allocator");
        let mut setup = CommandList::new(&device, &setup_allocator, "setup", None)?;
        let mut uploads = UploadPipeline::new(&device);
        let len = vertices.len() as u32;
        uploads.upload(&mut setup, &vertex_buffer, &vertices, len, len)?;

        let texture = if textured {
            let size = scene::TEXTURE_SIZE;
            let texture =
                device.create_resource(&ResourceDesc::texture2d("checkerboard", size, size, scene::TEXTURE_FORMAT))?;
            let pixels = scene::checkerboard(size, scene::CHECKER_CELLS);
            let row_pitch = size * scene::TEXTURE_FORMAT.bytes_per_pixel();
            uploads.upload(&mut setup, &texture, &pixels, row_pitch, row_pitch * size)?;
            frames.write_srv(0, Descriptor::ShaderResourceView(texture.id()))?;
            Some(SceneTexture { texture })
        } else {
            None
        };
        setup.close()?;

        let mut renderer = Self {
            config,
            ctx,
            swap_chain,
            frames,
            recorder,
            sync,
            uploads,
            vertex_view: VertexBufferView {
                resource: vertex_buffer.id(),
                stride: vertex_layout.stride(),
                size: len,
            },
            vertex_buffer,
            vertex_count,
            texture,
            size: (width, height),
            frames_rendered: 0,
        };

        let value = renderer.sync.submit_and_wait(renderer.ctx.queue(), &[&setup], None)?;
        renderer.uploads.mark_submitted(value);
        renderer.uploads.release_completed(renderer.sync.completed_value())?;
        log::info!(
            "renderer initialized: {width}x{height}, {:?} scene, {:?}, {} bytes uploaded",
            renderer.config.scene,
            renderer.config.sync_mode,
            renderer.uploads.uploaded_bytes()
        );
        Ok(renderer)
    }

    /// Per-frame CPU-side update. The scene is static.
    pub fn update(&mut self) {}

    /// Records, submits and presents one frame, then waits as the sync mode requires.
    pub fn render(&mut self) -> GpuResult<()> {
        let back_buffer = *self.frames.back_buffer(self.sync.frame_index())?;
        let srv = match (&self.texture, self.frames.srv_heap()) {
            (Some(_), Some(heap)) => Some((heap, heap.handle(0)?)),
            _ => None,
        };
        let inputs = FrameInputs {
            allocator_index: self.sync.allocator_index(),
            back_buffer,
            rtv_heap: self.frames.rtv_heap(),
            srv,
            vertex_buffer: self.vertex_view,
            vertex_count: self.vertex_count,
            clear_color: self.config.clear_color,
        };

        let list = self.recorder.record_frame(&inputs)?;
        let present = Present { swap_chain: &self.swap_chain, sync_interval: self.config.vsync_interval };
        self.sync.submit_and_wait(self.ctx.queue(), &[list], Some(present))?;

        if self.uploads.pending_count() > 0 {
            self.uploads.release_completed(self.sync.completed_value())?;
        }
        self.frames_rendered += 1;
        Ok(())
    }

    /// Copies back buffer `index` to the CPU, tightly packed.
    ///
    /// Submits its own list and waits for it; call between frames.
    pub fn capture_back_buffer(&mut self, index: u32) -> GpuResult<Vec<u8>> {
        let target = self.frames.back_buffer(index)?.resource;
        let device = self.ctx.device().clone();
        let allocator = CommandAllocator::new("capture allocator");
        let mut list = CommandList::new(&device, &allocator, "capture", None)?;
        let readback = read_back(&device, &mut list, target)?;
        list.close()?;

        self.sync.submit_and_wait(self.ctx.queue(), &[&list], None)?;
        let bytes = readback.bytes(&device)?;
        readback.release(&device)?;
        Ok(bytes)
    }

    /// Drains the queue, then releases every GPU resource.
    pub fn shutdown(mut self) -> GpuResult<ShutdownReport> {
        let queue = self.ctx.queue().clone();
        let last_fence_value = self.sync.drain(&queue)?;
        let device = self.ctx.device().clone();

        self.uploads.release_all()?;
        device.release(self.vertex_buffer)?;
        if let Some(scene) = self.texture {
            device.release(scene.texture)?;
        }
        let final_back_buffer_index = self.sync.frame_index();
        self.swap_chain.release();
        let sync = self.sync.close();

        let report = ShutdownReport {
            frames_rendered: self.frames_rendered,
            final_back_buffer_index,
            last_fence_value,
            sync,
            leaked_resources: device.live_resources(),
        };
        if report.leaked_resources > 0 {
            log::warn!("{} GPU resource(s) still tracked after shutdown", report.leaked_resources);
        }
        log::info!(
            "renderer shut down after {} frame(s), fence at {}",
            report.frames_rendered,
            report.last_fence_value
        );
        Ok(report)
    }

    pub fn device(&self) -> &Arc<Device> {
        self.ctx.device()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Back buffer the next frame renders into.
    pub fn frame_index(&self) -> u32 {
        self.sync.frame_index()
    }

    pub fn next_fence_value(&self) -> u64 {
        self.sync.next_fence_value()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::SoftBackend;

    fn soft() -> Box<dyn Backend> {
        Box::new(SoftBackend::default())
    }

    #[test]
    fn zero_sized_surfaces_fail_initialization() {
        let result = Renderer::initialize(soft(), None, 0, 16, &GpuInit::default(), RendererConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn staging_is_released_during_initialization() {
        let renderer =
            Renderer::initialize(soft(), None, 64, 64, &GpuInit::default(), RendererConfig::default()).unwrap();
        assert_eq!(renderer.uploads.pending_count(), 0);
        assert_eq!(renderer.next_fence_value(), 2);
        renderer.shutdown().unwrap();
    }

    #[test]
    fn textured_scene_allocates_a_shader_resource_heap() {
        let config = RendererConfig { scene: SceneKind::Textured, ..RendererConfig::default() };
        let mut renderer = Renderer::initialize(soft(), None, 64, 64, &GpuInit::default(), config).unwrap();
        assert!(renderer.frames.srv_heap().is_some());
        renderer.render().unwrap();
        let report = renderer.shutdown().unwrap();
        assert_eq!(report.leaked_resources, 0);
    }
}
