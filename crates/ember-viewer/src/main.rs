//! Ember viewer: draws the built-in scene in a window, or renders a fixed
//! number of frames headless.

use anyhow::Result;
use clap::{Parser, ValueEnum};

use ember_engine::logging::{Logging, LoggingConfig};
use ember_engine::renderer::{RendererConfig, SceneKind};
use ember_engine::sync::SyncMode;
use ember_engine::window::{headless, BackendKind, Runtime, RuntimeConfig};

#[derive(Debug, Copy, Clone, ValueEnum)]
enum BackendArg {
    Wgpu,
    Soft,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum SceneArg {
    Triangle,
    Textured,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum SyncArg {
    /// Wait for the GPU after every frame.
    Stall,
    /// Wait only before reusing a back buffer that is still in flight.
    Pipelined,
}

#[derive(Parser, Debug)]
#[command(name = "ember-viewer")]
#[command(about = "Explicit frame submission renderer")]
struct Args {
    /// Client area width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Client area height
    #[arg(long, default_value = "720")]
    height: u32,

    #[arg(long, value_enum, default_value = "wgpu")]
    backend: BackendArg,

    #[arg(long, value_enum, default_value = "triangle")]
    scene: SceneArg,

    #[arg(long, value_enum, default_value = "stall")]
    sync: SyncArg,

    /// Vertical blanks per present (0 = immediate)
    #[arg(long, default_value = "1")]
    vsync: u32,

    /// Render offscreen without opening a window
    #[arg(long)]
    headless: bool,

    /// Frames to render in headless mode
    #[arg(long, default_value = "120")]
    frames: u64,

    /// Use a software adapter
    #[arg(long)]
    warp: bool,

    /// Enumerate adapters in GPU-preference order
    #[arg(long)]
    high_performance: bool,

    /// Enable backend validation
    #[arg(long)]
    debug_layer: bool,

    /// Log filter, env_logger syntax (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

impl Args {
    fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig {
            title: "Ember".to_string(),
            width: self.width,
            height: self.height,
            backend: match self.backend {
                BackendArg::Wgpu => BackendKind::Wgpu,
                BackendArg::Soft => BackendKind::Soft,
            },
            renderer: RendererConfig {
                scene: match self.scene {
                    SceneArg::Triangle => SceneKind::Triangle,
                    SceneArg::Textured => SceneKind::Textured,
                },
                sync_mode: match self.sync {
                    SyncArg::Stall => SyncMode::FullStall,
                    SyncArg::Pipelined => SyncMode::PerBuffer,
                },
                vsync_interval: self.vsync,
                ..RendererConfig::default()
            },
            ..RuntimeConfig::default()
        };
        config.gpu.use_warp = self.warp;
        config.gpu.prefer_high_performance = self.high_performance;
        config.gpu.debug_layer |= self.debug_layer;
        config
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logging = Logging::init(LoggingConfig { env_filter: args.log.clone(), ..LoggingConfig::default() });
    let config = args.runtime_config();

    let result = if args.headless {
        headless::run(&config, args.frames).map(|summary| {
            log::info!(
                "{} frame(s) rendered, final back buffer {}, fence {}",
                summary.frames,
                summary.final_back_buffer_index,
                summary.last_fence_value
            );
        })
    } else {
        Runtime::run(config).map(|report| {
            if let Some(report) = report {
                log::info!("{} frame(s) rendered", report.frames_rendered);
            }
        })
    };

    if let Err(err) = &result {
        log::error!("fatal: {err:#}");
    }
    logging.shutdown();
    result
}
