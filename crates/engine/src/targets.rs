use crate::context::{DeviceCore, Gpu, VkContext};
use crate::error::Result;
use crate::frame::FrameData;
use crate::image::AllocatedImage;
use crate::swapchain::Swapchain;
use ash::vk;

/// Everything sized by or cycled with the swapchain.
///
/// Owns a handle to the device so it can release itself; declared before the `DeviceCore`
/// it was created from, it is always dropped first.
pub(crate) struct RenderTargets {
    pub(crate) frames: Vec<FrameData>,
    pub(crate) draw_image: AllocatedImage,
    pub(crate) swapchain: Swapchain,
    gpu: Gpu,
}

impl RenderTargets {
    pub(crate) fn create(
        core: &DeviceCore,
        dimensions: [u32; 2],
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let gpu = core.gpu.clone();
        let mut swapchain = Swapchain::create(&core.context, dimensions, present_mode)?;

        let mut frames = Vec::new();
        let draw_image = FrameData::create_all(&gpu.device, &core.graphics_queue).and_then(|f| {
            frames = f;
            log::debug!("Frame sync structures created");
            AllocatedImage::create_draw_image(&gpu, swapchain.extent())
        });

        match draw_image {
            Ok(draw_image) => Ok(Self {
                frames,
                draw_image,
                swapchain,
                gpu,
            }),
            Err(err) => {
                frames.iter_mut().for_each(|frame| frame.destroy(&gpu));
                unsafe { swapchain.destroy(&gpu.device) };
                Err(err)
            }
        }
    }

    /// Rebuilds the swapchain and the draw image for a new window size. The GPU must be idle.
    ///
    /// The previous draw image is retired on `slot`, which releases it after its next fence
    /// wait.
    pub(crate) fn rebuild(
        &mut self,
        context: &VkContext,
        dimensions: [u32; 2],
        slot: usize,
    ) -> Result<()> {
        self.swapchain.recreate(context, dimensions)?;

        let draw_image = AllocatedImage::create_draw_image(&self.gpu, self.swapchain.extent())?;
        let mut retired = std::mem::replace(&mut self.draw_image, draw_image);
        self.frames[slot].pending.defer(move |gpu: &Gpu| retired.destroy(gpu));
        Ok(())
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        log::debug!("Start: Dropping render targets");
        if let Err(err) = unsafe { self.gpu.device.device_wait_idle() } {
            log::error!("vkDeviceWaitIdle failed: {err}, destroying resources anyway");
        }

        for frame in self.frames.iter_mut() {
            frame.destroy(&self.gpu);
        }
        self.draw_image.destroy(&self.gpu);
        unsafe { self.swapchain.destroy(&self.gpu.device) }
        log::debug!("End: Dropping render targets");
    }
}
