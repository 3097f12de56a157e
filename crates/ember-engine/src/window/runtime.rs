use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::device::GpuInit;
use crate::hal::soft::SoftBackend;
use crate::hal::wgpu::WgpuBackend;
use crate::hal::{Backend, SurfaceHandle};
use crate::input::{translate_window_event, InputState};
use crate::renderer::{Renderer, RendererConfig, ShutdownReport};
use crate::time::{format_title, FpsCounter};

/// GPU implementation to drive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BackendKind {
    #[default]
    Wgpu,
    /// Reference GPU on a worker thread; needs no graphics hardware.
    Soft,
}

/// Creates the backend selected by `kind`.
pub fn create_backend(kind: BackendKind, init: &GpuInit) -> Box<dyn Backend> {
    match kind {
        BackendKind::Wgpu => Box::new(WgpuBackend::new(init.debug_layer)),
        BackendKind::Soft => Box::new(SoftBackend::default()),
    }
}

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    /// Client area size in logical pixels.
    pub width: u32,
    pub height: u32,
    /// Outer window position in physical pixels.
    pub position: (i32, i32),
    pub backend: BackendKind,
    pub gpu: GpuInit,
    pub renderer: RendererConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "ember".to_string(),
            width: 1280,
            height: 720,
            position: (100, 100),
            backend: BackendKind::default(),
            gpu: GpuInit::default(),
            renderer: RendererConfig::default(),
        }
    }
}

/// Entry point for the windowed runtime.
pub struct Runtime;

impl Runtime {
    /// Opens the window and renders until it is closed or Escape is pressed.
    ///
    /// A renderer error stops the loop and is returned.
    pub fn run(config: RuntimeConfig) -> Result<Option<ShutdownReport>> {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(config);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        // The loop can also end without a close request (platform teardown).
        state.shutdown_renderer();
        state.input.shutdown();

        match state.error {
            Some(err) => Err(err),
            None => Ok(state.report),
        }
    }
}

struct AppState {
    config: RuntimeConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    input: InputState,
    fps: FpsCounter,
    report: Option<ShutdownReport>,
    error: Option<anyhow::Error>,
}

impl AppState {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            input: InputState::init(),
            fps: FpsCounter::new(),
            report: None,
            error: None,
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let (x, y) = self.config.position;
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width as f64, self.config.height as f64))
            .with_position(PhysicalPosition::new(x, y));

        let window = Arc::new(event_loop.create_window(attrs).context("failed to create window")?);
        let size = window.inner_size();
        log::info!("window created: {}x{} physical pixels", size.width, size.height);

        let backend = create_backend(self.config.backend, &self.config.gpu);
        let surface = SurfaceHandle::new(window.clone());
        let renderer = Renderer::initialize(
            backend,
            Some(surface),
            size.width,
            size.height,
            &self.config.gpu,
            self.config.renderer.clone(),
        )
        .context("renderer initialization failed")?;

        self.renderer = Some(renderer);
        self.fps = FpsCounter::new();
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };
        renderer.update();
        renderer.render().context("frame rendering failed")?;

        if let Some(fps) = self.fps.tick(Instant::now()) {
            let (width, height) = renderer.size();
            window.set_title(&format_title(&self.config.title, width, height, fps));
        }
        self.input.end_frame();
        Ok(())
    }

    fn shutdown_renderer(&mut self) {
        let Some(renderer) = self.renderer.take() else {
            return;
        };
        match renderer.shutdown() {
            Ok(report) => self.report = Some(report),
            Err(err) => self.record_error(anyhow::Error::new(err).context("renderer shutdown failed")),
        }
    }

    fn record_error(&mut self, err: anyhow::Error) {
        log::error!("{err:#}");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        self.shutdown_renderer();
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.record_error(err);
        self.exit(event_loop);
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.create_window(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_none_or(|w| w.id() != window_id) {
            return;
        }

        if let Some(ev) = translate_window_event(&event) {
            self.input.apply_event(&ev);
        }
        if self.input.quit_requested() {
            self.exit(event_loop);
            return;
        }

        if let WindowEvent::RedrawRequested = event {
            if let Err(err) = self.redraw() {
                self.fail(event_loop, err);
            }
        }
    }
}
