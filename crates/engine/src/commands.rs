use crate::context::QueueData;
use crate::error::{Result, VkResultExt};
use crate::frame::command_buffer_submit_info;
use ash::{vk, Device};

pub(crate) fn create_command_pool(device: &Device, family_index: u32) -> Result<vk::CommandPool> {
    let info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&info, None) }.check("vkCreateCommandPool")
}

pub(crate) fn allocate_primary_buffer(
    device: &Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .command_buffer_count(1)
        .level(vk::CommandBufferLevel::PRIMARY);

    let buffers =
        unsafe { device.allocate_command_buffers(&info) }.check("vkAllocateCommandBuffers")?;
    Ok(buffers[0])
}

/// One-off GPU work outside the frame loop. Blocks until the work completes.
#[derive(Clone, Copy)]
pub(crate) struct ImmediateSubmit {
    pub(crate) command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    timeout_ns: u64,
}

impl ImmediateSubmit {
    pub(crate) fn create(device: &Device, queue: &QueueData, timeout_ns: u64) -> Result<Self> {
        let command_pool = create_command_pool(device, queue.family_index)?;
        let command_buffer = allocate_primary_buffer(device, command_pool)?;

        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe { device.create_fence(&fence_info, None) }.check("vkCreateFence")?;

        log::debug!("Immediate submit structures created");
        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            timeout_ns,
        })
    }

    pub(crate) fn submit<F>(&self, device: &Device, queue: &QueueData, record: F) -> Result<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        let cmd = self.command_buffer;
        unsafe {
            device
                .reset_fences(&[self.fence])
                .check("vkResetFences")?;
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .check("vkResetCommandBuffer")?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .check("vkBeginCommandBuffer")?;
        }

        record(device, cmd);

        let cmd_infos = [command_buffer_submit_info(cmd)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);

        unsafe {
            device
                .end_command_buffer(cmd)
                .check("vkEndCommandBuffer")?;
            device
                .queue_submit2(queue.queue, &[submit], self.fence)
                .check("vkQueueSubmit2")?;
            device
                .wait_for_fences(&[self.fence], true, self.timeout_ns)
                .check("vkWaitForFences")?;
        }
        Ok(())
    }

    pub(crate) fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_fence(self.fence, None);
        }
    }
}
