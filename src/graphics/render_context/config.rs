use {ash::vk, std::time::Duration};

/// Tunables for a [super::RenderContext].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Initial size of the staging scratch buffer in bytes. The scratch
    /// buffer grows on demand.
    pub staging_capacity: u32,

    /// Memory properties for the scratch buffer. HOST_VISIBLE is always
    /// added.
    pub staging_memory: vk::MemoryPropertyFlags,

    pub staging_usage: vk::BufferUsageFlags,

    /// Scheduler passes slower than this are logged as warnings.
    pub slow_tick_threshold: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            staging_capacity: 8 * 1024,
            staging_memory: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            staging_usage: vk::BufferUsageFlags::TRANSFER_SRC,
            slow_tick_threshold: Duration::from_millis(16),
        }
    }
}
