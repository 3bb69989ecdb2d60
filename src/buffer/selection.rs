use std::time::Duration;

use wgpu::util::DeviceExt;

use crate::{Error, SelectionBitset, buffer::PendingReadback};

/// The selection storage buffer for storing selected splats as a bitvec.
#[derive(Debug)]
pub struct SelectionBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

impl SelectionBuffer {
    /// Create a new empty selection buffer for `len` splats.
    pub fn new(device: &wgpu::Device, len: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Selection Buffer"),
            size: Self::word_count(len) as wgpu::BufferAddress
                * std::mem::size_of::<u32>() as wgpu::BufferAddress,
            usage: Self::usage(),
            mapped_at_creation: false,
        });

        Self { buffer, len }
    }

    /// Create a new selection buffer with the contents of a bitset.
    pub fn new_with_bitset(device: &wgpu::Device, bitset: &SelectionBitset) -> Self {
        let mut words = bitset.words().to_vec();
        words.resize(Self::word_count(bitset.len()), 0);

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Selection Buffer"),
            contents: bytemuck::cast_slice(&words),
            usage: Self::usage(),
        });

        Self {
            buffer,
            len: bitset.len(),
        }
    }

    /// Upload a bitset.
    ///
    /// Only the splats covered by both the buffer and the bitset are written.
    pub fn update(&self, queue: &wgpu::Queue, bitset: &SelectionBitset) {
        if bitset.len() != self.len {
            log::warn!(
                "Selection of {} splats uploaded to a buffer of {} splats",
                bitset.len(),
                self.len
            );
        }

        let resized = SelectionBitset::from_words(bitset.words().to_vec(), self.len);
        let words = resized.words();
        if !words.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(words));
        }
    }

    /// Get the buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Get the number of splats.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer covers no splats.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start downloading the selection.
    pub fn begin_download(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> PendingReadback<u32> {
        PendingReadback::begin(device, queue, &self.buffer, self.buffer.size())
    }

    /// Download the selection.
    pub async fn download(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<SelectionBitset, Error> {
        let words = self.begin_download(device, queue).wait_async(device).await?;
        Ok(SelectionBitset::from_words(words, self.len))
    }

    /// Download the selection, failing with [`Error::ReadbackTimeout`] if it does not finish in
    /// time.
    pub fn download_blocking(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        timeout: Duration,
    ) -> Result<SelectionBitset, Error> {
        let words = self.begin_download(device, queue).wait(device, timeout)?;
        Ok(SelectionBitset::from_words(words, self.len))
    }

    fn word_count(len: usize) -> usize {
        len.div_ceil(32).max(1)
    }

    fn usage() -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
    }
}
