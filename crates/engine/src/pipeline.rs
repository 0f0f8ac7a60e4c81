use crate::context::Gpu;
use crate::deletion::DeletionQueue;
use crate::error::{EngineError, Result, VkResultExt};
use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};
use std::path::{Path, PathBuf};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Push constants shared by every background effect. Layout matches the
/// `layout(push_constant)` block of the compute shaders.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: [f32; 4],
    pub data2: [f32; 4],
    pub data3: [f32; 4],
    pub data4: [f32; 4],
}

impl ComputePushConstants {
    pub fn rows_mut(&mut self) -> [&mut [f32; 4]; 4] {
        [
            &mut self.data1,
            &mut self.data2,
            &mut self.data3,
            &mut self.data4,
        ]
    }
}

/// A compute pipeline that paints the draw image, plus its tweakable inputs.
pub struct ComputeEffect {
    pub name: &'static str,
    pub(crate) pipeline: vk::Pipeline,
    pub data: ComputePushConstants,
}

/// Background effects sharing one pipeline layout. May be empty when no shader could be loaded,
/// in which case the frame is only cleared.
pub struct BackgroundEffects {
    pub(crate) layout: vk::PipelineLayout,
    effects: Vec<ComputeEffect>,
    selected: usize,
}

impl BackgroundEffects {
    pub(crate) fn load(
        device: &Device,
        shader_dir: &Path,
        draw_image_layout: vk::DescriptorSetLayout,
        deletion_queue: &mut DeletionQueue<Gpu>,
    ) -> Result<Self> {
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<ComputePushConstants>() as u32)];
        let set_layouts = [draw_image_layout];

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .check("vkCreatePipelineLayout")?;
        deletion_queue.push(move |gpu: &Gpu| unsafe {
            gpu.device.destroy_pipeline_layout(layout, None)
        });

        let candidates = [
            (
                "gradient",
                ComputePushConstants {
                    data1: [1.0, 0.0, 0.0, 1.0],
                    data2: [0.0, 0.0, 1.0, 1.0],
                    ..Default::default()
                },
            ),
            (
                "sky",
                ComputePushConstants {
                    data1: [0.1, 0.2, 0.4, 0.97],
                    ..Default::default()
                },
            ),
        ];

        let mut effects = Vec::with_capacity(candidates.len());
        for (name, data) in candidates {
            let path = shader_path(shader_dir, name);
            let module = match load_shader_module(device, &path) {
                Ok(module) => module,
                Err(err) => {
                    log::warn!("Skipping background effect '{name}': {err}");
                    continue;
                }
            };

            let pipeline = create_compute_pipeline(device, layout, module);
            unsafe { device.destroy_shader_module(module, None) };
            let pipeline = pipeline?;

            deletion_queue.push(move |gpu: &Gpu| unsafe {
                gpu.device.destroy_pipeline(pipeline, None)
            });
            effects.push(ComputeEffect {
                name,
                pipeline,
                data,
            });
        }

        if effects.is_empty() {
            log::warn!(
                "No background effects loaded from {shader_dir:?}, drawing clear colour only"
            );
        } else {
            log::debug!("Loaded {} background effects", effects.len());
        }

        Ok(Self {
            layout,
            effects,
            selected: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_effects(effects: Vec<ComputeEffect>) -> Self {
        Self {
            layout: vk::PipelineLayout::null(),
            effects,
            selected: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    /// Out of range indices are clamped to the last effect.
    pub fn select(&mut self, index: usize) {
        self.selected = clamp_index(index, self.effects.len());
    }

    pub fn current(&self) -> Option<&ComputeEffect> {
        self.effects.get(self.selected)
    }

    pub fn current_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(self.selected)
    }
}

fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

fn shader_path(shader_dir: &Path, name: &str) -> PathBuf {
    shader_dir.join(format!("{name}.comp.spv"))
}

fn create_compute_pipeline(
    device: &Device,
    layout: vk::PipelineLayout,
    module: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(c"main");

    let info = vk::ComputePipelineCreateInfo::default()
        .layout(layout)
        .stage(stage);

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
    }
    .map_err(|(_, result)| EngineError::Vulkan {
        what: "vkCreateComputePipelines",
        result,
    })?;
    Ok(pipelines[0])
}

/// Splits raw bytes into SPIR-V words, checking size and magic number.
fn parse_spirv(bytes: &[u8]) -> std::result::Result<Vec<u32>, &'static str> {
    if bytes.is_empty() {
        return Err("file is empty");
    }
    if bytes.len() % 4 != 0 {
        return Err("size is not a multiple of 4");
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words[0] {
        SPIRV_MAGIC => Ok(words),
        magic if magic.swap_bytes() == SPIRV_MAGIC => Err("big-endian SPIR-V is not supported"),
        _ => Err("bad magic number"),
    }
}

pub(crate) fn load_shader_module(device: &Device, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path).map_err(|source| EngineError::ShaderIo {
        path: path.to_path_buf(),
        source,
    })?;
    let code = parse_spirv(&bytes).map_err(|reason| EngineError::InvalidSpirv {
        path: path.to_path_buf(),
        reason,
    })?;

    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    let module =
        unsafe { device.create_shader_module(&info, None) }.check("vkCreateShaderModule")?;
    log::trace!("Loaded shader module {path:?}");
    Ok(module)
}

/// Workgroups needed to cover `extent` with 16x16 local groups.
pub(crate) fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width.div_ceil(16), extent.height.div_ceil(16))
}
