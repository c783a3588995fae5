//! A host-memory DeviceApi used by unit tests.
//!
//! Buffers are plain byte vectors. Recorded commands are kept in a list and
//! executed in order by submit_and_wait, so tests can observe exactly when
//! staged copies land and when buffers are destroyed.

use {
    crate::graphics::vulkan_api::{DeviceApi, RawBuffer, VulkanError},
    ash::vk::{self, Handle},
    std::{collections::HashMap, sync::Mutex},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CopyBuffer {
        src: vk::Buffer,
        src_offset: u64,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
    },
    ImageBarrier {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    CopyImage {
        src: vk::Image,
        dst: vk::Image,
        width: u32,
        height: u32,
    },
}

#[derive(Default)]
struct State {
    next_handle: u64,
    memories: HashMap<vk::Buffer, Vec<u8>>,
    destroyed: Vec<vk::Buffer>,
    recording: Vec<Command>,
    executed: Vec<Command>,
    is_recording: bool,
    submissions: usize,
    fail_next_create: bool,
}

#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<State>,
}

impl FakeDevice {
    /// Make the next create_buffer call fail with out of device memory.
    pub fn fail_next_create(&self) {
        self.state.lock().unwrap().fail_next_create = true;
    }

    /// A copy of the buffer's current contents.
    pub fn contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.state.lock().unwrap().memories[&buffer].clone()
    }

    pub fn is_alive(&self, buffer: vk::Buffer) -> bool {
        self.state.lock().unwrap().memories.contains_key(&buffer)
    }

    pub fn destroyed_count(&self) -> usize {
        self.state.lock().unwrap().destroyed.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().unwrap().memories.len()
    }

    pub fn submissions(&self) -> usize {
        self.state.lock().unwrap().submissions
    }

    /// Commands recorded since the last submission.
    pub fn recorded(&self) -> Vec<Command> {
        self.state.lock().unwrap().recording.clone()
    }

    /// Every command executed by a submission so far.
    pub fn executed(&self) -> Vec<Command> {
        self.state.lock().unwrap().executed.clone()
    }

    fn record(&self, command: Command) {
        let mut state = self.state.lock().unwrap();
        assert!(state.is_recording, "command recorded outside begin/submit");
        state.recording.push(command);
    }
}

impl DeviceApi for FakeDevice {
    unsafe fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<RawBuffer, VulkanError> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_create) {
            return Err(VulkanError::UnableToCreateBuffer(
                size,
                usage,
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        state.next_handle += 1;
        let handle = state.next_handle;
        let buffer = vk::Buffer::from_raw(handle);
        state.memories.insert(buffer, vec![0; size as usize]);
        Ok(RawBuffer {
            buffer,
            memory: vk::DeviceMemory::from_raw(handle),
            size,
            memory_properties,
        })
    }

    unsafe fn destroy_buffer(&self, buffer: RawBuffer) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.memories.remove(&buffer.buffer).is_some(),
            "buffer {:?} destroyed twice",
            buffer.buffer
        );
        state.destroyed.push(buffer.buffer);
    }

    unsafe fn write_memory(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), VulkanError> {
        assert!(buffer.is_host_visible());
        let mut state = self.state.lock().unwrap();
        let memory = state.memories.get_mut(&buffer.buffer).unwrap();
        let start = offset as usize;
        memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    unsafe fn read_memory(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), VulkanError> {
        assert!(buffer.is_host_visible());
        let state = self.state.lock().unwrap();
        let memory = &state.memories[&buffer.buffer];
        let start = offset as usize;
        data.copy_from_slice(&memory[start..start + data.len()]);
        Ok(())
    }

    unsafe fn allocate_transfer_command_buffer(
        &self,
    ) -> Result<vk::CommandBuffer, VulkanError> {
        Ok(vk::CommandBuffer::from_raw(1))
    }

    unsafe fn free_command_buffer(&self, _command_buffer: vk::CommandBuffer) {}

    unsafe fn begin_command_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock().unwrap();
        assert!(!state.is_recording, "command buffer begun twice");
        state.is_recording = true;
        Ok(())
    }

    unsafe fn cmd_copy_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        self.record(Command::CopyBuffer {
            src,
            src_offset: region.src_offset,
            dst,
            dst_offset: region.dst_offset,
            size: region.size,
        });
    }

    unsafe fn cmd_image_barrier(
        &self,
        _command_buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier<'static>,
    ) {
        self.record(Command::ImageBarrier {
            image: barrier.image,
            old: barrier.old_layout,
            new: barrier.new_layout,
        });
    }

    unsafe fn cmd_copy_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: vk::ImageCopy,
    ) {
        self.record(Command::CopyImage {
            src,
            dst,
            width: region.extent.width,
            height: region.extent.height,
        });
    }

    unsafe fn submit_and_wait(
        &self,
        _command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock().unwrap();
        assert!(state.is_recording, "submitted a command buffer twice");
        state.is_recording = false;
        state.submissions += 1;

        let commands = std::mem::take(&mut state.recording);
        for command in &commands {
            if let Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } = command
            {
                let src_start = *src_offset as usize;
                let dst_start = *dst_offset as usize;
                let size = *size as usize;
                let bytes = state
                    .memories
                    .get(src)
                    .unwrap_or_else(|| panic!("copy from destroyed {:?}", src))
                    [src_start..src_start + size]
                    .to_vec();
                state
                    .memories
                    .get_mut(dst)
                    .unwrap_or_else(|| panic!("copy into destroyed {:?}", dst))
                    [dst_start..dst_start + size]
                    .copy_from_slice(&bytes);
            }
        }
        state.executed.extend(commands);
        Ok(())
    }
}
