use {crate::graphics::vulkan_api::StagingError, ash::vk};

/// The access masks and pipeline stages for a supported image layout
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Look up the synchronization for moving an image between layouts.
    pub fn for_layouts(
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<Self, StagingError> {
        use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

        let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
            (L::PREINITIALIZED, L::TRANSFER_SRC_OPTIMAL) => {
                (A::HOST_WRITE, A::TRANSFER_READ, S::HOST, S::TRANSFER)
            }
            (L::PREINITIALIZED, L::TRANSFER_DST_OPTIMAL) => {
                (A::HOST_WRITE, A::TRANSFER_WRITE, S::HOST, S::TRANSFER)
            }
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
                (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
            }
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
                A::TRANSFER_WRITE,
                A::SHADER_READ,
                S::TRANSFER,
                S::FRAGMENT_SHADER,
            ),
            _ => return Err(StagingError::UnsupportedTransition { old, new }),
        };

        Ok(Self {
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }

    /// A color image barrier covering the first mip level and array layer.
    pub fn image_barrier(
        &self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier {
            old_layout: old,
            new_layout: new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_access_mask: self.src_access,
            dst_access_mask: self.dst_access,
            ..Default::default()
        }
    }
}
