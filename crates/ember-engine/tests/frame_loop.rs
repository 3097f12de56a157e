use std::time::Duration;

use ember_engine::command::{CommandAllocator, CommandList};
use ember_engine::device::{DeviceContext, GpuInit};
use ember_engine::hal::soft::{SoftBackend, SoftConfig, SoftProbe};
use ember_engine::hal::{ResourceDesc, TextureFormat};
use ember_engine::renderer::{scene, Renderer, RendererConfig, SceneKind};
use ember_engine::sync::{FrameSynchronizer, SyncMode};
use ember_engine::upload::{read_back, UploadPipeline};

fn soft_renderer(width: u32, height: u32, config: RendererConfig, latency: Duration) -> (Renderer, SoftProbe) {
    let backend = SoftBackend::new(SoftConfig { execution_latency: latency, ..SoftConfig::default() });
    let probe = backend.probe();
    let renderer =
        Renderer::initialize(Box::new(backend), None, width, height, &GpuInit::default(), config).unwrap();
    (renderer, probe)
}

#[test]
fn hundred_twenty_frames_end_on_buffer_zero() {
    let (mut renderer, probe) = soft_renderer(1280, 720, RendererConfig::default(), Duration::ZERO);
    let initial = renderer.frame_index();

    for k in 0..120u32 {
        assert_eq!(renderer.frame_index(), (initial + k) % 2);
        renderer.update();
        renderer.render().unwrap();
    }

    let report = renderer.shutdown().unwrap();
    assert_eq!(report.frames_rendered, 120);
    assert_eq!(report.final_back_buffer_index, 0);
    assert_eq!(report.sync.presents, 120);
    assert_eq!(report.leaked_resources, 0);
    assert_eq!(probe.removed_reason(), None);
    assert_eq!(probe.stats().presents, 120);
    assert_eq!(probe.stats().draws, 120);
}

#[test]
fn shutdown_right_after_initialize_is_clean() {
    let (renderer, probe) = soft_renderer(1280, 720, RendererConfig::default(), Duration::ZERO);
    let report = renderer.shutdown().unwrap();

    assert_eq!(report.frames_rendered, 0);
    assert_eq!(report.final_back_buffer_index, 0);
    // Setup submission, then the drain.
    assert_eq!(report.last_fence_value, 2);
    assert_eq!(report.leaked_resources, 0);
    assert_eq!(probe.removed_reason(), None);
    // Only the backend-owned back buffers remain.
    assert_eq!(probe.live_resources(), 2);
}

#[test]
fn fence_values_increase_by_one_per_frame() {
    let (mut renderer, _probe) = soft_renderer(64, 64, RendererConfig::default(), Duration::from_millis(1));
    let mut previous = renderer.next_fence_value();
    for _ in 0..10 {
        renderer.render().unwrap();
        let next = renderer.next_fence_value();
        assert_eq!(next, previous + 1);
        previous = next;
    }
    renderer.shutdown().unwrap();
}

#[test]
fn pipelined_mode_keeps_the_index_sequence() {
    let config = RendererConfig { sync_mode: SyncMode::PerBuffer, ..RendererConfig::default() };
    let (mut renderer, probe) = soft_renderer(64, 64, config, Duration::from_millis(2));

    for k in 0..21u32 {
        assert_eq!(renderer.frame_index(), k % 2);
        renderer.render().unwrap();
    }
    let report = renderer.shutdown().unwrap();
    assert_eq!(report.final_back_buffer_index, 1);
    assert_eq!(report.leaked_resources, 0);
    assert_eq!(probe.stats().presents, 21);
    assert_eq!(probe.removed_reason(), None);
}

#[test]
fn uploads_read_back_bit_identical() {
    let ctx = DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap();
    let device = ctx.device();
    let mut sync = FrameSynchronizer::new(device, SyncMode::FullStall, 2, 0).unwrap();
    let mut uploads = UploadPipeline::new(device);

    for len in [36usize, 48, 262_144] {
        let source: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let dest = device.create_resource(&ResourceDesc::buffer("dest", len as u64)).unwrap();

        let allocator = CommandAllocator::new("upload");
        let mut list = CommandList::new(device, &allocator, "upload", None).unwrap();
        uploads.upload(&mut list, &dest, &source, len as u32, len as u32).unwrap();
        let readback = read_back(device, &mut list, dest.id()).unwrap();
        list.close().unwrap();

        let value = sync.submit_and_wait(ctx.queue(), &[&list], None).unwrap();
        uploads.mark_submitted(value);
        assert_eq!(uploads.release_completed(sync.completed_value()).unwrap(), 1);

        assert_eq!(readback.bytes(device).unwrap(), source, "{len}-byte buffer");
        readback.release(device).unwrap();
        device.release(dest).unwrap();
    }
    sync.drain(ctx.queue()).unwrap();
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn checkerboard_texture_reads_back_bit_identical() {
    let ctx = DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap();
    let device = ctx.device();
    let mut sync = FrameSynchronizer::new(device, SyncMode::FullStall, 2, 0).unwrap();
    let mut uploads = UploadPipeline::new(device);

    let pixels = scene::checkerboard(256, 8);
    assert_eq!(pixels.len(), 262_144);
    let texture = device
        .create_resource(&ResourceDesc::texture2d("checker", 256, 256, TextureFormat::Rgba8Unorm))
        .unwrap();

    let allocator = CommandAllocator::new("upload");
    let mut list = CommandList::new(device, &allocator, "upload", None).unwrap();
    uploads.upload(&mut list, &texture, &pixels, 1024, 262_144).unwrap();
    let readback = read_back(device, &mut list, texture.id()).unwrap();
    list.close().unwrap();

    let value = sync.submit_and_wait(ctx.queue(), &[&list], None).unwrap();
    uploads.mark_submitted(value);
    uploads.release_completed(sync.completed_value()).unwrap();

    assert_eq!(readback.bytes(device).unwrap(), pixels);
    readback.release(device).unwrap();
    device.release(texture).unwrap();
}

#[test]
fn triangle_is_drawn_over_the_clear_color() {
    let (mut renderer, probe) = soft_renderer(128, 128, RendererConfig::default(), Duration::ZERO);
    renderer.render().unwrap();

    let image = probe.last_present().unwrap();
    assert_eq!(image.buffer_index, 0);
    let corner = image.pixel(0, 0).unwrap();
    for c in &corner[..3] {
        assert!((c - 0.2).abs() < 0.01, "corner {corner:?}");
    }
    let center = image.pixel(64, 64).unwrap();
    let sum = center[0] + center[1] + center[2];
    assert!((sum - 1.0).abs() < 0.05, "center {center:?}");

    let captured = renderer.capture_back_buffer(0).unwrap();
    assert_eq!(captured, image.bytes);
    renderer.shutdown().unwrap();
}

#[test]
fn textured_quad_samples_the_checkerboard() {
    let config = RendererConfig { scene: SceneKind::Textured, ..RendererConfig::default() };
    let (mut renderer, probe) = soft_renderer(256, 256, config, Duration::ZERO);
    renderer.render().unwrap();

    let image = probe.last_present().unwrap();
    let row: Vec<[f32; 4]> = (70..186).map(|x| image.pixel(x, 100).unwrap()).collect();
    assert!(row.iter().any(|p| p[0] < 0.01 && p[1] < 0.01 && p[2] < 0.01));
    assert!(row.iter().any(|p| p[0] > 0.99 && p[1] > 0.99 && p[2] > 0.99));

    let outside = image.pixel(10, 10).unwrap();
    assert!((outside[0] - 0.2).abs() < 0.01);
    renderer.shutdown().unwrap();
}

#[test]
fn present_carries_the_configured_vsync_interval() {
    let immediate = RendererConfig { vsync_interval: 0, ..RendererConfig::default() };
    let (mut renderer, probe) = soft_renderer(64, 64, immediate, Duration::ZERO);
    for _ in 0..3 {
        renderer.render().unwrap();
    }
    renderer.shutdown().unwrap();
    assert_eq!(probe.stats().presents, 3);
    assert_eq!(probe.stats().vsync_presents, 0);
    assert_eq!(probe.stats().last_sync_interval, 0);

    let (mut renderer, probe) = soft_renderer(64, 64, RendererConfig::default(), Duration::ZERO);
    for _ in 0..3 {
        renderer.render().unwrap();
    }
    renderer.shutdown().unwrap();
    assert_eq!(probe.stats().vsync_presents, 3);
    assert_eq!(probe.stats().last_sync_interval, 1);
}
