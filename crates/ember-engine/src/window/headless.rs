use anyhow::{Context, Result};

use crate::renderer::Renderer;

use super::{create_backend, RuntimeConfig};

/// What a headless run produced.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeadlessSummary {
    pub frames: u64,
    pub final_back_buffer_index: u32,
    pub last_fence_value: u64,
    pub presents: u64,
}

/// Renders `frames` frames into offscreen back buffers and shuts down.
pub fn run(config: &RuntimeConfig, frames: u64) -> Result<HeadlessSummary> {
    let backend = create_backend(config.backend, &config.gpu);
    let mut renderer = Renderer::initialize(
        backend,
        None,
        config.width,
        config.height,
        &config.gpu,
        config.renderer.clone(),
    )
    .context("renderer initialization failed")?;

    for frame in 0..frames {
        renderer.update();
        renderer
            .render()
            .with_context(|| format!("frame {frame} failed"))?;
    }

    let report = renderer.shutdown().context("renderer shutdown failed")?;
    log::info!(
        "headless run finished: {} frame(s), back buffer {}, fence {}",
        report.frames_rendered,
        report.final_back_buffer_index,
        report.last_fence_value
    );
    Ok(HeadlessSummary {
        frames: report.frames_rendered,
        final_back_buffer_index: report.final_back_buffer_index,
        last_fence_value: report.last_fence_value,
        presents: report.sync.presents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::BackendKind;

    #[test]
    fn soft_run_reports_every_frame() {
        let config = RuntimeConfig { width: 64, height: 48, backend: BackendKind::Soft, ..RuntimeConfig::default() };
        let summary = run(&config, 5).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.presents, 5);
        assert_eq!(summary.final_back_buffer_index, 1);
        // One setup submission, five frames, one drain.
        assert_eq!(summary.last_fence_value, 7);
    }
}
