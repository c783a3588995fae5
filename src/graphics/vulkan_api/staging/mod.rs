mod layout_transition;

use {
    crate::graphics::{
        vulkan_api::{
            AllocatorError, DeviceApi, StagingError, SubAllocator,
        },
        RenderContext,
    },
    ash::vk,
    std::sync::{Arc, Weak},
};

pub use self::layout_transition::LayoutTransition;

/// A one-shot closure which runs after the next successful flush.
pub type FlushCallback = Box<dyn FnOnce() + Send + 'static>;

/// Batches transfer commands into a single reusable command buffer.
///
/// Uploads to device-local memory are written into a host-visible scratch
/// buffer, then copied on the device when the pipeline is flushed. Closures
/// registered with [StagingPipeline::on_flushed] run once the device has
/// finished every recorded command, which makes them the place to release
/// resources that recorded commands still reference.
///
/// Recording and flushing touch the command buffer and must only happen on
/// the scheduler's owner thread. Use [RenderContext::staging] to access the
/// pipeline.
pub struct StagingPipeline {
    scratch: SubAllocator,
    command_buffer: vk::CommandBuffer,

    /// True when a command has been recorded since the last flush.
    dirty: bool,

    /// Scratch uploads which were written but not yet recorded. The scratch
    /// range set is only reset when this is zero.
    pending_uploads: usize,

    on_flushed: Vec<FlushCallback>,
    device: Arc<dyn DeviceApi>,
}

impl StagingPipeline {
    /// Create the scratch buffer and open the command buffer for recording.
    pub fn new(
        device: Arc<dyn DeviceApi>,
        scratch_capacity: u32,
        scratch_memory: vk::MemoryPropertyFlags,
        scratch_usage: vk::BufferUsageFlags,
    ) -> Result<Self, AllocatorError> {
        // uploads write the scratch buffer through a host mapping
        let scratch = SubAllocator::with_device(
            device.clone(),
            Weak::new(),
            scratch_capacity,
            scratch_memory | vk::MemoryPropertyFlags::HOST_VISIBLE,
            scratch_usage,
        )?;
        let command_buffer = unsafe {
            // SAFE because the command buffer is freed when the pipeline is
            // dropped.
            let command_buffer = device
                .allocate_transfer_command_buffer()
                .map_err(AllocatorError::AllocationFailed)?;
            if let Err(err) = device.begin_command_buffer(command_buffer) {
                device.free_command_buffer(command_buffer);
                return Err(AllocatorError::AllocationFailed(err));
            }
            command_buffer
        };
        Ok(Self {
            scratch,
            command_buffer,
            dirty: false,
            pending_uploads: 0,
            on_flushed: vec![],
            device,
        })
    }

    /// True when at least one command is waiting for the next flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The host-visible scratch buffer used for uploads.
    pub fn scratch(&self) -> &SubAllocator {
        &self.scratch
    }

    /// The number of scratch uploads whose device copy is not recorded yet.
    pub fn pending_uploads(&self) -> usize {
        self.pending_uploads
    }

    /// Record a buffer-to-buffer copy.
    ///
    /// Both buffers must stay alive until the next flush completes.
    pub fn record_copy(
        &mut self,
        src: vk::Buffer,
        src_offset: u32,
        dst: vk::Buffer,
        dst_offset: u32,
        size: u32,
    ) {
        let region = vk::BufferCopy {
            src_offset: src_offset as u64,
            dst_offset: dst_offset as u64,
            size: size as u64,
        };
        unsafe {
            // SAFE because flush waits for the device to finish with the
            // buffers before anything registered with on_flushed can destroy
            // them.
            self.device
                .cmd_copy_buffer(self.command_buffer, src, dst, region)
        };
        self.dirty = true;
    }

    /// Record an image layout transition barrier.
    ///
    /// Only the transitions known to [LayoutTransition] are supported.
    pub fn record_layout_transition(
        &mut self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<(), StagingError> {
        let transition = LayoutTransition::for_layouts(old, new)?;
        unsafe {
            self.device.cmd_image_barrier(
                self.command_buffer,
                transition.src_stage,
                transition.dst_stage,
                transition.image_barrier(image, old, new),
            )
        };
        self.dirty = true;
        Ok(())
    }

    /// Record a full copy of the first mip level of a color image.
    ///
    /// The source must be in TRANSFER_SRC_OPTIMAL layout and the destination
    /// in TRANSFER_DST_OPTIMAL layout when the copy executes.
    pub fn record_image_copy(
        &mut self,
        src: vk::Image,
        dst: vk::Image,
        width: u32,
        height: u32,
    ) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy {
            src_subresource: subresource,
            src_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            dst_subresource: subresource,
            dst_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        unsafe {
            self.device
                .cmd_copy_image(self.command_buffer, src, dst, region)
        };
        self.dirty = true;
    }

    /// Run the closure once, after the next flush has completed on the
    /// device.
    pub fn on_flushed<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_flushed.push(Box::new(callback));
    }

    /// Submit every recorded command and block until the device is done.
    ///
    /// Does nothing when no command has been recorded, callbacks registered
    /// with on_flushed keep waiting for a flush which submits. Otherwise the
    /// scratch buffer is reset, the command buffer is reopened, and the
    /// callbacks are returned. The caller runs them after releasing the
    /// pipeline so they are free to post jobs or record again.
    pub fn flush(&mut self) -> Result<Vec<FlushCallback>, StagingError> {
        if !self.dirty {
            return Ok(vec![]);
        }

        unsafe {
            // SAFE because the command buffer is in the recording state
            // whenever the pipeline is dirty.
            self.device
                .submit_and_wait(self.command_buffer)
                .map_err(StagingError::SubmissionFailed)?;
        }
        self.dirty = false;

        if self.pending_uploads == 0 {
            self.scratch.reset();
        } else {
            log::debug!(
                "{} scratch uploads are still queued, keeping scratch ranges",
                self.pending_uploads
            );
        }

        unsafe {
            // SAFE because submit_and_wait returns after the device finished
            // executing the command buffer.
            self.device
                .begin_command_buffer(self.command_buffer)
                .map_err(StagingError::SubmissionFailed)?;
        }

        Ok(std::mem::take(&mut self.on_flushed))
    }
}

// Crate API
// ---------

impl StagingPipeline {
    /// Tie the scratch buffer to the context which owns this pipeline.
    pub(crate) fn attach_context(&mut self, context: Weak<RenderContext>) {
        self.scratch.attach_context(context);
    }

    /// Write data into freshly allocated scratch memory.
    ///
    /// The upload stays pending, and the scratch memory reserved, until
    /// [StagingPipeline::finish_upload] is called.
    ///
    /// # Returns
    ///
    /// The scratch buffer handle and the offset the data was written to.
    /// The handle is captured here because the scratch buffer can be
    /// replaced when it grows.
    pub(crate) fn stage_upload(
        &mut self,
        context: &Arc<RenderContext>,
        data: &[u8],
    ) -> Result<(vk::Buffer, u32), AllocatorError> {
        let range = self.scratch.allocate(context, data.len() as u32)?;
        self.scratch.update(context, range.offset, data)?;
        self.pending_uploads += 1;
        Ok((self.scratch.raw_buffer().buffer, range.offset))
    }

    /// Mark a staged upload as recorded.
    pub(crate) fn finish_upload(&mut self) {
        debug_assert!(self.pending_uploads > 0);
        self.pending_uploads = self.pending_uploads.saturating_sub(1);
    }
}

impl Drop for StagingPipeline {
    /// # Safety
    ///
    /// The application must ensure the device is idle when the pipeline is
    /// dropped. Callbacks still waiting for a flush are run here.
    fn drop(&mut self) {
        if !self.on_flushed.is_empty() {
            log::debug!(
                "running {} flush callbacks while dropping the staging pipeline",
                self.on_flushed.len()
            );
        }
        for callback in self.on_flushed.drain(..) {
            callback();
        }
        unsafe { self.device.free_command_buffer(self.command_buffer) }
    }
}
