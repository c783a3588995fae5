mod api;

use {
    crate::graphics::vulkan_api::VulkanError,
    ash::vk,
    indoc::indoc,
};

/// The Vulkan logical device, the transfer queue, and the resources needed
/// to submit staged transfer commands.
///
/// Device and queue selection happen elsewhere. The RenderDevice takes the
/// resulting handles and owns the logical device from then on.
pub struct RenderDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    transfer_queue: vk::Queue,
    transfer_queue_family_index: u32,
    command_pool: vk::CommandPool,
    submit_fence: vk::Fence,
    logical_device: ash::Device,
}

impl RenderDevice {
    /// Wrap an already-created logical device.
    ///
    /// # Params
    ///
    /// * `instance` - the instance used to create the device, only needed to
    ///   query memory properties
    /// * `physical_device` - the physical device backing `logical_device`
    /// * `logical_device` - ownership is transferred, the device is destroyed
    ///   when the RenderDevice is dropped
    /// * `transfer_queue_family_index` - a queue family which supports
    ///   transfer operations, queue 0 of this family is used
    ///
    /// # Safety
    ///
    /// Unsafe because the instance must outlive the RenderDevice.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        logical_device: ash::Device,
        transfer_queue_family_index: u32,
    ) -> Result<Self, VulkanError> {
        let memory_properties =
            instance.get_physical_device_memory_properties(physical_device);
        let transfer_queue =
            logical_device.get_device_queue(transfer_queue_family_index, 0);

        let command_pool = {
            let create_info = vk::CommandPoolCreateInfo {
                queue_family_index: transfer_queue_family_index,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            logical_device
                .create_command_pool(&create_info, None)
                .map_err(VulkanError::UnableToCreateCommandPool)?
        };
        let command_pool = scopeguard::guard(command_pool, |pool| {
            logical_device.destroy_command_pool(pool, None)
        });

        let submit_fence = logical_device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(VulkanError::UnableToCreateFence)?;

        log::debug!(
            indoc!(
                "
                Created RenderDevice
                  - transfer queue family {}
                  - memory types {}"
            ),
            transfer_queue_family_index,
            memory_properties.memory_type_count,
        );

        Ok(Self {
            memory_properties,
            transfer_queue,
            transfer_queue_family_index,
            command_pool: scopeguard::ScopeGuard::into_inner(command_pool),
            submit_fence,
            logical_device,
        })
    }

    /// The queue family index used for staged transfers.
    pub fn transfer_queue_family_index(&self) -> u32 {
        self.transfer_queue_family_index
    }

    /// Stall the thread until the GPU is done with all operations.
    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        unsafe {
            self.logical_device
                .device_wait_idle()
                .map_err(VulkanError::UnexpectedFenceWaitError)
        }
    }

    /// Find the first memory type which is allowed by the requirements and
    /// has every requested property.
    ///
    /// # Returns
    ///
    /// The memory type index and the full property flags of that type.
    pub fn find_memory_type(
        &self,
        memory_requirements: vk::MemoryRequirements,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Result<(u32, vk::MemoryPropertyFlags), VulkanError> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(i, memory_type)| {
                let type_supported =
                    memory_requirements.memory_type_bits & (1 << i) != 0;
                let properties_supported =
                    memory_type.property_flags.contains(property_flags);
                type_supported & properties_supported
            })
            .map(|(i, memory_type)| (i as u32, memory_type.property_flags))
            .ok_or(VulkanError::MemoryTypeNotFound(
                property_flags,
                memory_requirements,
            ))
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            self.logical_device
                .device_wait_idle()
                .expect("Error while idling the device before destruction!");
            self.logical_device.destroy_fence(self.submit_fence, None);
            self.logical_device
                .destroy_command_pool(self.command_pool, None);
            self.logical_device.destroy_device(None);
        }
    }
}
