use std::time::Duration;

use glam::*;
use wgpu::util::DeviceExt;

use crate::{Error, ProjectedSplatPod, ProjectedSplats, buffer::PendingReadback};

/// The projected splats storage buffer written by the preprocessing pass.
#[derive(Debug)]
pub struct ProjectedSplatsBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

impl ProjectedSplatsBuffer {
    /// Create a new projected splats buffer for `len` splats.
    pub fn new(device: &wgpu::Device, len: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Projected Splats Buffer"),
            size: (len.max(1) * std::mem::size_of::<ProjectedSplatPod>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self { buffer, len }
    }

    /// Create a new projected splats buffer with initial contents.
    pub fn new_with_pods(device: &wgpu::Device, splats: &[ProjectedSplatPod]) -> Self {
        if splats.is_empty() {
            return Self::new(device, 0);
        }

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Projected Splats Buffer"),
            contents: bytemuck::cast_slice(splats),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            buffer,
            len: splats.len(),
        }
    }

    /// Update the projected splats, splats past the buffer are dropped.
    pub fn update(&self, queue: &wgpu::Queue, splats: &[ProjectedSplatPod]) {
        let len = splats.len().min(self.len());
        if len < splats.len() {
            log::warn!(
                "Dropping {} projected splats past the buffer length {}",
                splats.len() - len,
                self.len()
            );
        }

        if len > 0 {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&splats[..len]));
        }
    }

    /// Get the buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Get the number of splats the buffer holds.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start downloading the first `count` projected splats.
    ///
    /// `count` is bound by the buffer length.
    pub fn begin_download(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        count: usize,
    ) -> Option<PendingReadback<ProjectedSplatPod>> {
        let count = count.min(self.len());
        (count > 0).then(|| {
            PendingReadback::begin(
                device,
                queue,
                &self.buffer,
                (count * std::mem::size_of::<ProjectedSplatPod>()) as wgpu::BufferAddress,
            )
        })
    }

    /// Download the first `count` projected splats.
    pub async fn download(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        count: usize,
    ) -> Result<Vec<ProjectedSplatPod>, Error> {
        match self.begin_download(device, queue, count) {
            Some(pending) => pending.wait_async(device).await,
            None => Ok(Vec::new()),
        }
    }

    /// Download the first `count` projected splats as a [`crate::SplatSource`].
    ///
    /// Fails with [`Error::ReadbackTimeout`] if the download does not finish in time.
    pub fn read_source(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        count: usize,
        viewport: UVec2,
        timeout: Duration,
    ) -> Result<ProjectedSplats, Error> {
        let splats = match self.begin_download(device, queue, count) {
            Some(pending) => pending.wait(device, timeout)?,
            None => Vec::new(),
        };

        log::debug!("Read back {} projected splats", splats.len());

        Ok(ProjectedSplats::new(splats, viewport))
    }
}
