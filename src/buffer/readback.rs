use std::time::{Duration, Instant};

use crate::Error;

/// A buffer copy to the CPU that has been submitted but not read yet.
///
/// The staging buffer lives only as long as this value, it is released whether or not the
/// readback succeeds.
pub struct PendingReadback<T: bytemuck::Pod> {
    staging: wgpu::Buffer,
    receiver: oneshot::Receiver<Result<(), wgpu::BufferAsyncError>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: bytemuck::Pod> std::fmt::Debug for PendingReadback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReadback")
            .field("staging", &self.staging)
            .finish_non_exhaustive()
    }
}

impl<T: bytemuck::Pod> PendingReadback<T> {
    /// Copy `size` bytes of `source` into a new staging buffer and request mapping it.
    pub fn begin(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &wgpu::Buffer,
        size: wgpu::BufferAddress,
    ) -> Self {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        queue.submit(Some(encoder.finish()));

        let (tx, rx) = oneshot::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if let Err(e) = tx.send(result) {
                    log::error!("Error occurred while sending readback result: {e:?}");
                }
            });

        Self {
            staging,
            receiver: rx,
            _marker: std::marker::PhantomData,
        }
    }

    /// Wait for the readback without a bound.
    pub async fn wait_async(self, device: &wgpu::Device) -> Result<Vec<T>, Error> {
        if let Err(e) = device.poll(wgpu::PollType::wait_indefinitely()) {
            log::error!("Error occurred while polling device: {e:?}");
        }

        let Self {
            staging, receiver, ..
        } = self;
        receiver.await??;

        Ok(Self::read(&staging))
    }

    /// Wait for the readback, polling the device until the timeout elapses.
    pub fn wait(self, device: &wgpu::Device, timeout: Duration) -> Result<Vec<T>, Error> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Err(e) = device.poll(wgpu::PollType::Poll) {
                log::error!("Error occurred while polling device: {e:?}");
            }

            match self.receiver.try_recv() {
                Ok(result) => {
                    result?;
                    return Ok(Self::read(&self.staging));
                }
                Err(oneshot::TryRecvError::Empty) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(oneshot::TryRecvError::Empty) => {
                    log::warn!("Readback timed out after {timeout:?}");
                    self.staging.destroy();
                    return Err(Error::ReadbackTimeout(timeout));
                }
                Err(oneshot::TryRecvError::Disconnected) => {
                    return Err(oneshot::RecvError.into());
                }
            }
        }
    }

    fn read(staging: &wgpu::Buffer) -> Vec<T> {
        let data = bytemuck::allocation::pod_collect_to_vec(&staging.slice(..).get_mapped_range());
        staging.unmap();
        data
    }
}
