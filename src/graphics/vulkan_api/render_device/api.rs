use {
    super::RenderDevice,
    crate::graphics::vulkan_api::{DeviceApi, RawBuffer, VulkanError},
    ash::vk,
};

impl DeviceApi for RenderDevice {
    unsafe fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<RawBuffer, VulkanError> {
        let create_info = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = self
            .logical_device
            .create_buffer(&create_info, None)
            .map_err(|err| VulkanError::UnableToCreateBuffer(size, usage, err))?;
        let buffer = scopeguard::guard(buffer, |buffer| {
            self.logical_device.destroy_buffer(buffer, None)
        });

        let memory_requirements =
            self.logical_device.get_buffer_memory_requirements(*buffer);
        let (memory_type_index, selected_properties) =
            self.find_memory_type(memory_requirements, memory_properties)?;
        let allocate_info = vk::MemoryAllocateInfo {
            allocation_size: memory_requirements.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = self
            .logical_device
            .allocate_memory(&allocate_info, None)
            .map_err(|err| {
                VulkanError::UnableToAllocateMemory(
                    memory_requirements.size,
                    err,
                )
            })?;

        if let Err(err) =
            self.logical_device.bind_buffer_memory(*buffer, memory, 0)
        {
            self.logical_device.free_memory(memory, None);
            return Err(VulkanError::UnableToBindBufferMemory(err));
        }

        Ok(RawBuffer {
            buffer: scopeguard::ScopeGuard::into_inner(buffer),
            memory,
            size,
            memory_properties: selected_properties,
        })
    }

    unsafe fn destroy_buffer(&self, buffer: RawBuffer) {
        self.logical_device.destroy_buffer(buffer.buffer, None);
        self.logical_device.free_memory(buffer.memory, None);
    }

    unsafe fn write_memory(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), VulkanError> {
        let ptr = self
            .logical_device
            .map_memory(
                buffer.memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )
            .map_err(VulkanError::UnableToMapDeviceMemory)?;
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            (ptr as *mut u8).add(offset as usize),
            data.len(),
        );

        let coherent = buffer
            .memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        let flushed = if coherent {
            Ok(())
        } else {
            let range = vk::MappedMemoryRange {
                memory: buffer.memory,
                offset: 0,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            };
            self.logical_device
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::UnableToMapDeviceMemory)
        };
        self.logical_device.unmap_memory(buffer.memory);
        flushed
    }

    unsafe fn read_memory(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), VulkanError> {
        let ptr = self
            .logical_device
            .map_memory(
                buffer.memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )
            .map_err(VulkanError::UnableToMapDeviceMemory)?;

        let coherent = buffer
            .memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        if !coherent {
            let range = vk::MappedMemoryRange {
                memory: buffer.memory,
                offset: 0,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            };
            if let Err(err) =
                self.logical_device.invalidate_mapped_memory_ranges(&[range])
            {
                self.logical_device.unmap_memory(buffer.memory);
                return Err(VulkanError::UnableToMapDeviceMemory(err));
            }
        }

        std::ptr::copy_nonoverlapping(
            (ptr as *const u8).add(offset as usize),
            data.as_mut_ptr(),
            data.len(),
        );
        self.logical_device.unmap_memory(buffer.memory);
        Ok(())
    }

    unsafe fn allocate_transfer_command_buffer(
        &self,
    ) -> Result<vk::CommandBuffer, VulkanError> {
        let allocate_info = vk::CommandBufferAllocateInfo {
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = self
            .logical_device
            .allocate_command_buffers(&allocate_info)
            .map_err(VulkanError::UnableToAllocateCommandBuffers)?;
        Ok(buffers[0])
    }

    unsafe fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.logical_device
            .free_command_buffers(self.command_pool, &[command_buffer])
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        let begin_info = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        self.logical_device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(VulkanError::UnableToBeginCommandBuffer)
    }

    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        // every staged copy observes the transfer writes recorded before it
        let barrier = vk::MemoryBarrier {
            src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
            dst_access_mask: vk::AccessFlags::TRANSFER_READ
                | vk::AccessFlags::TRANSFER_WRITE,
            ..Default::default()
        };
        self.logical_device.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
        self.logical_device
            .cmd_copy_buffer(command_buffer, src, dst, &[region]);
    }

    unsafe fn cmd_image_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier<'static>,
    ) {
        self.logical_device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }

    unsafe fn cmd_copy_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: vk::ImageCopy,
    ) {
        self.logical_device.cmd_copy_image(
            command_buffer,
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    unsafe fn submit_and_wait(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        self.logical_device
            .end_command_buffer(command_buffer)
            .map_err(VulkanError::UnableToEndCommandBuffer)?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo {
            command_buffer_count: 1,
            p_command_buffers: command_buffers.as_ptr(),
            ..Default::default()
        };
        self.logical_device
            .queue_submit(self.transfer_queue, &[submit_info], self.submit_fence)
            .map_err(VulkanError::UnableToSubmitTransferCommands)?;

        self.logical_device
            .wait_for_fences(&[self.submit_fence], true, u64::MAX)
            .map_err(VulkanError::UnexpectedFenceWaitError)?;
        self.logical_device
            .reset_fences(&[self.submit_fence])
            .map_err(VulkanError::UnexpectedFenceResetError)
    }
}
