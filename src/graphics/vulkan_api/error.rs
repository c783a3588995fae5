use {ash::vk, thiserror::Error};

/// Failures reported by the native Vulkan api.
#[derive(Debug, Error)]
pub enum VulkanError {
    #[error("Unable to create a buffer of {} bytes with usage {:?}", .0, .1)]
    UnableToCreateBuffer(u64, vk::BufferUsageFlags, #[source] vk::Result),

    #[error("No memory type could be found for flags {:?} and requirements {:?}", .0, .1)]
    MemoryTypeNotFound(vk::MemoryPropertyFlags, vk::MemoryRequirements),

    #[error("Unable to allocate {} bytes of device memory", .0)]
    UnableToAllocateMemory(u64, #[source] vk::Result),

    #[error("Unable to bind device memory to the buffer")]
    UnableToBindBufferMemory(#[source] vk::Result),

    #[error("Unable to map device memory")]
    UnableToMapDeviceMemory(#[source] vk::Result),

    #[error("Unable to create the command pool")]
    UnableToCreateCommandPool(#[source] vk::Result),

    #[error("Unable to allocate command buffers")]
    UnableToAllocateCommandBuffers(#[source] vk::Result),

    #[error("Unable to begin the command buffer")]
    UnableToBeginCommandBuffer(#[source] vk::Result),

    #[error("Unable to end the command buffer")]
    UnableToEndCommandBuffer(#[source] vk::Result),

    #[error("Unable to create a fence")]
    UnableToCreateFence(#[source] vk::Result),

    #[error("Unable to submit transfer commands to the device queue")]
    UnableToSubmitTransferCommands(#[source] vk::Result),

    #[error("Unexpected error while waiting for a fence")]
    UnexpectedFenceWaitError(#[source] vk::Result),

    #[error("Unexpected error while resetting a fence")]
    UnexpectedFenceResetError(#[source] vk::Result),
}

/// Failures reported by a SubAllocator.
#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("Unable to create the device resource backing the buffer")]
    AllocationFailed(#[source] VulkanError),

    #[error(
        "No allocated range at offset {} with size {}, was it already freed?",
        .offset,
        .size
    )]
    RangeNotFound { offset: u32, size: u32 },

    #[error(
        "Range at offset {} with size {} exceeds the buffer capacity of {}",
        .offset,
        .size,
        .capacity
    )]
    OutOfBounds { offset: u32, size: u32, capacity: u32 },

    #[error("Unable to write host data into the buffer's memory")]
    UnableToWriteMemory(#[source] VulkanError),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Failures reported by the StagingPipeline.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Unsupported image layout transition from {:?} to {:?}", .old, .new)]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("Unable to submit staged transfer commands")]
    SubmissionFailed(#[source] VulkanError),
}
