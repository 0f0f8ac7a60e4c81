use crate::context::Gpu;
use crate::error::{EngineError, Result, VkResultExt};
use ash::{vk, Device};
use vk_mem::Alloc;

pub(crate) const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Image whose memory is owned by the `vk-mem` allocator.
pub(crate) struct AllocatedImage {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) allocation: vk_mem::Allocation,
    pub(crate) extent: vk::Extent3D,
    pub(crate) format: vk::Format,
}

impl AllocatedImage {
    /// Creates the offscreen image every frame is rendered into before being copied to the
    /// swapchain.
    pub(crate) fn create_draw_image(gpu: &Gpu, extent: vk::Extent2D) -> Result<Self> {
        let extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };
        let usage = vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::COLOR_ATTACHMENT;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DRAW_IMAGE_FORMAT)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage);

        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };

        let allocator = gpu.allocator();
        let (image, mut allocation) = unsafe { allocator.create_image(&image_info, &alloc_info) }
            .check("vmaCreateImage")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .image(image)
            .format(DRAW_IMAGE_FORMAT)
            .subresource_range(
                subresource_range(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        let view = match unsafe { gpu.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(result) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(EngineError::Vulkan {
                    what: "vkCreateImageView",
                    result,
                });
            }
        };

        log::debug!(
            "Draw image created: {}x{} {:?}",
            extent.width,
            extent.height,
            DRAW_IMAGE_FORMAT
        );

        Ok(Self {
            image,
            view,
            allocation,
            extent,
            format: DRAW_IMAGE_FORMAT,
        })
    }

    pub(crate) fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    /// The caller guarantees the GPU no longer uses the image.
    pub(crate) fn destroy(&mut self, gpu: &Gpu) {
        unsafe {
            gpu.device.destroy_image_view(self.view, None);
            gpu.allocator().destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Full-image subresource range: all mip levels and array layers.
pub(crate) fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

fn aspect_for(new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn transition_image(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    current_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    // ALL_COMMANDS stalls the whole pipeline; fine for a handful of transitions per frame.
    let image_barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(current_layout)
        .new_layout(new_layout)
        .subresource_range(subresource_range(aspect_for(new_layout)))
        .image(image);

    let barriers = [image_barrier];
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) }
}

/// Far corner of a blit region covering the whole extent.
fn blit_offsets(extent: vk::Extent2D) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D::default(),
        vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        },
    ]
}

/// Scaled copy with linear filtering. `src` must be in TRANSFER_SRC_OPTIMAL and `dst` in
/// TRANSFER_DST_OPTIMAL.
pub(crate) fn copy_image_to_image(
    device: &Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_size: vk::Extent2D,
    dst_size: vk::Extent2D,
) {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_array_layer(0)
        .layer_count(1)
        .mip_level(0);

    let region = vk::ImageBlit2::default()
        .src_offsets(blit_offsets(src_size))
        .dst_offsets(blit_offsets(dst_size))
        .src_subresource(layers)
        .dst_subresource(layers);
    let regions = [region];

    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);

    unsafe { device.cmd_blit_image2(cmd, &blit_info) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_region_spans_the_extent() {
        let [min, max] = blit_offsets(vk::Extent2D {
            width: 1700,
            height: 900,
        });
        assert_eq!((min.x, min.y, min.z), (0, 0, 0));
        assert_eq!((max.x, max.y, max.z), (1700, 900, 1));
    }

    #[test]
    fn depth_targets_use_depth_aspect() {
        assert_eq!(
            aspect_for(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(aspect_for(vk::ImageLayout::GENERAL), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn subresource_range_covers_everything() {
        let range = subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.base_array_layer, 0);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }
}
