use crate::error::{Result, VkResultExt};
use ash::{vk, Device};
use itertools::Itertools;

pub(crate) struct LayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl LayoutBuilder<'_> {
    pub(crate) fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub(crate) fn add_binding(&mut self, binding: u32, descriptor_type: vk::DescriptorType) {
        let layout_binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(1);
        self.bindings.push(layout_binding);
    }

    pub(crate) fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Every binding becomes visible to `stage_flags`.
    pub(crate) fn build(
        &mut self,
        device: &Device,
        stage_flags: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        self.bindings
            .iter_mut()
            .for_each(|binding| binding.stage_flags |= stage_flags);

        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        unsafe { device.create_descriptor_set_layout(&info, None) }
            .check("vkCreateDescriptorSetLayout")
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct PoolSizeRatio {
    pub(crate) descriptor_type: vk::DescriptorType,
    pub(crate) ratio: f32,
}

fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|p| {
            vk::DescriptorPoolSize::default()
                .ty(p.descriptor_type)
                .descriptor_count((max_sets as f32 * p.ratio) as u32)
        })
        .collect_vec()
}

/// Single fixed-size descriptor pool.
#[derive(Clone, Copy)]
pub(crate) struct DescriptorAllocator {
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    pub(crate) fn init_pool(
        device: &Device,
        max_sets: u32,
        pool_ratios: &[PoolSizeRatio],
    ) -> Result<Self> {
        let pool_sizes = pool_sizes(max_sets, pool_ratios);

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .check("vkCreateDescriptorPool")?;

        Ok(Self { pool })
    }

    pub(crate) fn allocate(
        &self,
        device: &Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(core::slice::from_ref(&layout));

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .check("vkAllocateDescriptorSets")?;
        Ok(sets[0])
    }

    pub(crate) fn clear_descriptors(&self, device: &Device) -> Result<()> {
        unsafe { device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty()) }
            .check("vkResetDescriptorPool")
    }

    pub(crate) fn destroy_pool(&self, device: &Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) }
    }
}

/// Collects image writes and applies them to a set in one `vkUpdateDescriptorSets`.
pub(crate) struct DescriptorWriter<'a> {
    image_infos: Vec<(vk::DescriptorImageInfo, vk::WriteDescriptorSet<'a>)>,
}

impl DescriptorWriter<'_> {
    pub(crate) fn new() -> Self {
        Self {
            image_infos: Vec::new(),
        }
    }

    pub(crate) fn write_image(
        &mut self,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        descriptor_type: vk::DescriptorType,
    ) {
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout: layout,
        };

        let write = vk::WriteDescriptorSet::default()
            .dst_binding(binding)
            .descriptor_count(1)
            .descriptor_type(descriptor_type);

        self.image_infos.push((image_info, write));
    }

    pub(crate) fn clear(&mut self) {
        self.image_infos.clear();
    }

    pub(crate) fn update_set(&mut self, device: &Device, desc_set: vk::DescriptorSet) {
        let writes = self
            .image_infos
            .iter_mut()
            .map(|(image_info, write)| {
                write.dst_set = desc_set;
                write.p_image_info = image_info;
                *write
            })
            .collect_vec();

        unsafe { device.update_descriptor_sets(&writes, &[]) }
    }
}

/// Storage-image set the background compute effects write the draw image through.
#[derive(Clone, Copy)]
pub(crate) struct DrawImageDescriptors {
    allocator: DescriptorAllocator,
    pub(crate) layout: vk::DescriptorSetLayout,
    pub(crate) set: vk::DescriptorSet,
}

impl DrawImageDescriptors {
    pub(crate) fn create(device: &Device, draw_image_view: vk::ImageView) -> Result<Self> {
        let ratios = [PoolSizeRatio {
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            ratio: 1.0,
        }];
        let allocator = DescriptorAllocator::init_pool(device, 10, &ratios)?;

        let mut builder = LayoutBuilder::new();
        builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
        let layout = builder.build(device, vk::ShaderStageFlags::COMPUTE)?;
        builder.clear();

        let set = allocator.allocate(device, layout)?;

        let descriptors = Self {
            allocator,
            layout,
            set,
        };
        descriptors.point_at(device, draw_image_view);

        log::debug!("Draw image descriptors created");
        Ok(descriptors)
    }

    /// Rewrites binding 0 after the draw image was recreated.
    pub(crate) fn point_at(&self, device: &Device, draw_image_view: vk::ImageView) {
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            draw_image_view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        writer.update_set(device, self.set);
        writer.clear();
    }

    pub(crate) fn destroy(&self, device: &Device) {
        if let Err(err) = self.allocator.clear_descriptors(device) {
            log::warn!("{err}");
        }
        self.allocator.destroy_pool(device);
        unsafe { device.destroy_descriptor_set_layout(self.layout, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_scale_with_max_sets() {
        let ratios = [
            PoolSizeRatio {
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            },
            PoolSizeRatio {
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 0.5,
            },
        ];
        let sizes = pool_sizes(10, &ratios);

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 5);
    }

    #[test]
    fn fractional_counts_round_down() {
        let ratios = [PoolSizeRatio {
            descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
            ratio: 0.25,
        }];
        assert_eq!(pool_sizes(7, &ratios)[0].descriptor_count, 1);
        assert!(pool_sizes(7, &[]).is_empty());
    }

    #[test]
    fn layout_builder_collects_and_clears_bindings() {
        let mut builder = LayoutBuilder::new();
        builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
        builder.add_binding(1, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(builder.bindings.len(), 2);
        assert_eq!(builder.bindings[1].binding, 1);
        assert_eq!(builder.bindings[0].descriptor_count, 1);
        builder.clear();
        assert!(builder.bindings.is_empty());
    }

    #[test]
    fn writer_queues_image_writes() {
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            vk::ImageView::null(),
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        assert_eq!(writer.image_infos.len(), 1);
        assert_eq!(writer.image_infos[0].0.image_layout, vk::ImageLayout::GENERAL);
        writer.clear();
        assert!(writer.image_infos.is_empty());
    }
}
