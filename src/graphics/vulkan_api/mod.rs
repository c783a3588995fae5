mod device_api;
mod error;
mod render_device;
mod staging;
mod sub_allocator;

#[cfg(test)]
pub(crate) mod fake_device;

pub use self::{
    device_api::{DeviceApi, RawBuffer},
    error::{AllocatorError, StagingError, VulkanError},
    render_device::RenderDevice,
    staging::{FlushCallback, LayoutTransition, StagingPipeline},
    sub_allocator::{BufferRange, Range, RangeSet, SharedBuffer, SubAllocator},
};
