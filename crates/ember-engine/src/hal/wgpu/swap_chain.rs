use crate::hal::{GpuError, GpuResult, SwapChainDesc, TextureFormat};

use super::pipeline::texture_format;

/// High-level response after a surface acquisition error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum SurfaceErrorAction {
    /// Surface was reconfigured; acquisition may be retried.
    Reconfigured,
    /// Transient error; render this frame offscreen.
    SkipFrame,
    /// Commonly OOM; the device is unusable.
    Fatal,
}

/// Picks the back buffer format: the requested one if the surface supports
/// it, otherwise the other 8-bit UNORM layout.
pub(super) fn choose_surface_format(
    caps: &wgpu::SurfaceCapabilities,
    requested: TextureFormat,
) -> Option<TextureFormat> {
    let fallback = match requested {
        TextureFormat::Rgba8Unorm => TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8Unorm => TextureFormat::Rgba8Unorm,
    };
    [requested, fallback]
        .into_iter()
        .find(|f| caps.formats.contains(&texture_format(*f)))
}

pub(super) fn choose_alpha_mode(caps: &wgpu::SurfaceCapabilities) -> wgpu::CompositeAlphaMode {
    [wgpu::CompositeAlphaMode::Opaque]
        .into_iter()
        .find(|m| caps.alpha_modes.contains(m))
        .or_else(|| caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

/// Fifo waits for the vertical blank; the fallback tears if it must.
pub(super) fn present_mode(vsync: bool) -> wgpu::PresentMode {
    if vsync { wgpu::PresentMode::Fifo } else { wgpu::PresentMode::AutoNoVsync }
}

pub(super) fn map_surface_error(
    surface: &wgpu::Surface,
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    err: wgpu::SurfaceError,
) -> SurfaceErrorAction {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
            surface.configure(device, config);
            SurfaceErrorAction::Reconfigured
        }
        wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::Fatal,
        wgpu::SurfaceError::Timeout => SurfaceErrorAction::SkipFrame,
        wgpu::SurfaceError::Other => SurfaceErrorAction::SkipFrame,
    }
}

struct Presentable {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    acquired: Option<wgpu::SurfaceTexture>,
}

/// Flip-model swap chain over a wgpu surface.
///
/// Surface textures are acquired lazily, the first time a command list
/// touches the current back buffer. Offscreen stand-ins exist for every
/// buffer and are used when there is no surface or acquisition is skipped.
pub(super) struct SwapChain {
    presentable: Option<Presentable>,
    offscreen: Vec<wgpu::Texture>,
    current: u32,
    pub format: TextureFormat,
}

impl SwapChain {
    pub fn new(
        device: &wgpu::Device,
        surface: Option<(wgpu::Surface<'static>, &wgpu::Adapter)>,
        desc: &SwapChainDesc,
    ) -> GpuResult<Self> {
        let mut format = desc.format;
        let presentable = match surface {
            Some((surface, adapter)) => {
                let caps = surface.get_capabilities(adapter);
                format = choose_surface_format(&caps, desc.format).ok_or_else(|| GpuError::Creation {
                    what: "swap chain",
                    reason: "surface supports no 8-bit UNORM format".into(),
                })?;

                let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
                if caps.usages.contains(wgpu::TextureUsages::COPY_SRC) {
                    usage |= wgpu::TextureUsages::COPY_SRC;
                }
                let config = wgpu::SurfaceConfiguration {
                    usage,
                    format: texture_format(format),
                    width: desc.width.max(1),
                    height: desc.height.max(1),
                    present_mode: present_mode(desc.vsync),
                    alpha_mode: choose_alpha_mode(&caps),
                    view_formats: vec![],
                    desired_maximum_frame_latency: desc.buffer_count,
                };
                surface.configure(device, &config);
                Some(Presentable { surface, config, acquired: None })
            }
            None => None,
        };

        let offscreen = (0..desc.buffer_count)
            .map(|i| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("ember back buffer {i}")),
                    size: wgpu::Extent3d {
                        width: desc.width.max(1),
                        height: desc.height.max(1),
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(format),
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .collect();

        Ok(Self { presentable, offscreen, current: 0, format })
    }

    pub fn buffer_count(&self) -> u32 {
        self.offscreen.len() as u32
    }

    pub fn current_index(&self) -> u32 {
        self.current
    }

    /// Texture backing back buffer `index` for this frame.
    pub fn texture(&mut self, device: &wgpu::Device, index: u32) -> GpuResult<wgpu::Texture> {
        let offscreen = self
            .offscreen
            .get(index as usize)
            .cloned()
            .ok_or_else(|| GpuError::InvalidCall(format!("no swap chain buffer {index}")))?;

        let Some(p) = self.presentable.as_mut() else {
            return Ok(offscreen);
        };
        if index != self.current {
            return Ok(offscreen);
        }
        if let Some(acquired) = &p.acquired {
            return Ok(acquired.texture.clone());
        }

        for _ in 0..2 {
            match p.surface.get_current_texture() {
                Ok(frame) => {
                    let texture = frame.texture.clone();
                    p.acquired = Some(frame);
                    return Ok(texture);
                }
                Err(err) => match map_surface_error(&p.surface, device, &p.config, err.clone()) {
                    SurfaceErrorAction::Reconfigured => continue,
                    SurfaceErrorAction::SkipFrame => {
                        log::debug!("surface acquisition skipped: {err}");
                        return Ok(offscreen);
                    }
                    SurfaceErrorAction::Fatal => {
                        return Err(GpuError::DeviceRemoved(format!("surface: {err}")));
                    }
                },
            }
        }
        Ok(offscreen)
    }

    /// Presents the acquired surface texture, if any, and flips.
    ///
    /// A sync interval of 0 presents immediately, anything else waits for
    /// vertical blank. wgpu fixes the present mode per configuration, so a
    /// changed interval reconfigures the surface and applies from the next
    /// frame.
    pub fn present(&mut self, device: &wgpu::Device, sync_interval: u32) {
        if let Some(p) = self.presentable.as_mut() {
            if let Some(frame) = p.acquired.take() {
                frame.present();
            }
            let mode = present_mode(sync_interval > 0);
            if p.config.present_mode != mode {
                log::debug!("present mode {:?} -> {mode:?}", p.config.present_mode);
                p.config.present_mode = mode;
                p.surface.configure(device, &p.config);
            }
        }
        self.current = (self.current + 1) % self.buffer_count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_interval_waits_for_vblank() {
        assert_eq!(present_mode(true), wgpu::PresentMode::Fifo);
        assert_eq!(present_mode(false), wgpu::PresentMode::AutoNoVsync);
    }
}
