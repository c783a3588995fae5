use {crate::graphics::vulkan_api::VulkanError, ash::vk};

/// The raw handles for a Vulkan buffer and the memory bound to it.
///
/// Ownership of the handles is tracked by whoever holds this value. It is
/// `Copy` so it can be captured by deferred cleanup closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,

    /// The size of the buffer in bytes.
    pub size: u64,

    /// The property flags of the memory type which was actually selected.
    /// This can be a superset of the requested flags.
    pub memory_properties: vk::MemoryPropertyFlags,
}

impl RawBuffer {
    /// True when the host can write the buffer memory through a mapping.
    pub fn is_host_visible(&self) -> bool {
        self.memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

/// The subset of the native api used by the sub-allocator and staging
/// pipeline.
///
/// Implementations must be safe to share between threads, but command
/// recording and submission are only ever invoked from the designated owner
/// thread.
pub trait DeviceApi: Send + Sync {
    /// Create a buffer and bind it to a fresh piece of device memory.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must destroy the buffer with
    /// [DeviceApi::destroy_buffer] before the device is dropped.
    unsafe fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<RawBuffer, VulkanError>;

    /// Destroy the buffer and free its memory.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must ensure no device operations still
    /// reference the buffer.
    unsafe fn destroy_buffer(&self, buffer: RawBuffer);

    /// Map the buffer memory, copy the bytes at offset, then unmap.
    ///
    /// # Safety
    ///
    /// Unsafe because the memory must be host visible and the range must be
    /// within the memory's size.
    unsafe fn write_memory(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), VulkanError>;

    /// Map the buffer memory, copy bytes at offset into data, then unmap.
    ///
    /// # Safety
    ///
    /// Unsafe because the memory must be host visible, the range must be
    /// within the memory's size, and the device must not be writing it.
    unsafe fn read_memory(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), VulkanError>;

    /// Allocate a primary command buffer usable with the transfer queue.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must free the command buffer before the
    /// device is dropped.
    unsafe fn allocate_transfer_command_buffer(
        &self,
    ) -> Result<vk::CommandBuffer, VulkanError>;

    /// # Safety
    ///
    /// Unsafe because the command buffer must not be pending execution.
    unsafe fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);

    /// Begin recording a one-time-submit command buffer.
    ///
    /// # Safety
    ///
    /// Unsafe because the command buffer must not be pending execution.
    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError>;

    /// # Safety
    ///
    /// Unsafe because every referenced buffer must live until the copy has
    /// executed on the device.
    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    );

    /// # Safety
    ///
    /// Unsafe because the image must live until the barrier has executed on
    /// the device.
    unsafe fn cmd_image_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier<'static>,
    );

    /// Copy from an image in TRANSFER_SRC_OPTIMAL layout to an image in
    /// TRANSFER_DST_OPTIMAL layout.
    ///
    /// # Safety
    ///
    /// Unsafe because both images must live until the copy has executed on
    /// the device.
    unsafe fn cmd_copy_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: vk::ImageCopy,
    );

    /// End the command buffer, submit it to the transfer queue, and block
    /// until the device has finished executing it.
    ///
    /// # Safety
    ///
    /// Unsafe because the command buffer must be in the recording state.
    unsafe fn submit_and_wait(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError>;
}
