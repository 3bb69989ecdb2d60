pub struct TestContext {
    #[allow(dead_code)]
    pub instance: wgpu::Instance,
    #[allow(dead_code)]
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl TestContext {
    /// Create a context, [`None`] if the machine has no usable adapter.
    pub fn try_new() -> Option<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

            let Ok(adapter) = instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
            else {
                eprintln!("No adapter available, skipping GPU test");
                return None;
            };

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("Device"),
                    required_limits: adapter.limits(),
                    ..Default::default()
                })
                .await
                .expect("device");

            Some(Self {
                instance,
                adapter,
                device,
                queue,
            })
        })
    }
}
