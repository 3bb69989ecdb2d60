use std::time::Duration;

use wgpu_3dgs_mask_select::{
    ProjectedSplatPod, SplatSource, buffer::ProjectedSplatsBuffer, glam::*,
};

use crate::common::{TestContext, given};

const TIMEOUT: Duration = Duration::from_secs(10);

fn pods() -> Vec<ProjectedSplatPod> {
    (0..5)
        .map(|i| given::splat_at_pixel(uvec2(i * 3, i), 0.1 * i as f32))
        .collect()
}

#[test]
fn test_projected_splats_buffer_new_should_report_length() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };

    let buffer = ProjectedSplatsBuffer::new(&ctx.device, 4);
    let empty = ProjectedSplatsBuffer::new(&ctx.device, 0);

    assert_eq!(buffer.len(), 4);
    assert_eq!(
        buffer.buffer().size(),
        4 * std::mem::size_of::<ProjectedSplatPod>() as wgpu::BufferAddress
    );
    assert!(empty.is_empty());
    assert!(buffer.buffer().usage().contains(wgpu::BufferUsages::COPY_SRC));
}

#[test]
fn test_projected_splats_buffer_download_should_return_uploaded_pods() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };
    let pods = pods();

    let buffer = ProjectedSplatsBuffer::new_with_pods(&ctx.device, &pods);
    let downloaded =
        pollster::block_on(buffer.download(&ctx.device, &ctx.queue, 3)).expect("download");

    assert_eq!(downloaded, pods[..3].to_vec());
}

#[test]
fn test_projected_splats_buffer_update_should_drop_splats_past_length() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };
    let pods = pods();

    let buffer = ProjectedSplatsBuffer::new(&ctx.device, 2);
    buffer.update(&ctx.queue, &pods);
    let downloaded =
        pollster::block_on(buffer.download(&ctx.device, &ctx.queue, 10)).expect("download");

    assert_eq!(downloaded, pods[..2].to_vec());
}

#[test]
fn test_projected_splats_buffer_read_source_should_build_splat_source() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };
    let pods = pods();

    let buffer = ProjectedSplatsBuffer::new_with_pods(&ctx.device, &pods);
    let source = buffer
        .read_source(&ctx.device, &ctx.queue, pods.len(), given::VIEWPORT, TIMEOUT)
        .expect("read source");
    let empty = ProjectedSplatsBuffer::new(&ctx.device, 0)
        .read_source(&ctx.device, &ctx.queue, 3, given::VIEWPORT, TIMEOUT)
        .expect("read source");

    assert_eq!(source.projected_splats(), pods.as_slice());
    assert_eq!(source.viewport_size(), given::VIEWPORT);
    assert_eq!(empty.splat_count(), 0);
}
