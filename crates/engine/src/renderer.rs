use crate::commands::ImmediateSubmit;
use crate::config::Config;
use crate::context::{DeviceCore, Gpu};
use crate::descriptor::DrawImageDescriptors;
use crate::error::{EngineError, Result, VkResultExt};
use crate::frame::{command_buffer_submit_info, semaphore_submit_info, FrameCounter};
use crate::image::{copy_image_to_image, subresource_range, transition_image};
use crate::pipeline::{dispatch_size, BackgroundEffects};
use crate::stats::FrameStats;
use crate::targets::RenderTargets;
use crate::ui::{OverlayInfo, UiContext, UiFrame};
use ash::vk;
use std::time::Instant;
use winit::window::Window;

// Fields drop in declaration order: the UI renderer and the render targets go before
// `core`, which flushes the engine deletion queue and then releases the allocator and device.
pub(crate) struct VulkanRenderer {
    frame_counter: FrameCounter,
    stats: FrameStats,
    started: Instant,
    frame_timeout_ns: u64,
    pending_resize: Option<[u32; 2]>,

    ui: UiContext,
    effects: BackgroundEffects,
    draw_descriptors: DrawImageDescriptors,
    immediate: ImmediateSubmit,
    targets: RenderTargets,
    core: DeviceCore,
}

impl VulkanRenderer {
    pub(crate) fn initialize(window: &Window, config: &Config) -> Result<Self> {
        // Every early return below drops `targets` and then `core`, which releases what was
        // built so far.
        let mut core = DeviceCore::initialize(window, config.validation_enabled())?;

        let size = window.inner_size();
        let targets =
            RenderTargets::create(&core, [size.width, size.height], config.present_mode())?;

        let device = core.gpu.device.clone();
        let immediate =
            ImmediateSubmit::create(&device, &core.graphics_queue, config.frame_timeout_ns())?;
        core.deletion_queue.push(move |gpu: &Gpu| immediate.destroy(&gpu.device));

        let draw_descriptors = DrawImageDescriptors::create(&device, targets.draw_image.view)?;
        core.deletion_queue.push(move |gpu: &Gpu| draw_descriptors.destroy(&gpu.device));

        let effects = BackgroundEffects::load(
            &device,
            &config.graphics.shader_dir,
            draw_descriptors.layout,
            &mut core.deletion_queue,
        )?;

        let ui = UiContext::initialize(
            window,
            &device,
            &core.gpu.allocator,
            targets.swapchain.format(),
            config.ui.enabled,
        )?;

        let renderer = Self {
            frame_counter: FrameCounter::default(),
            stats: FrameStats::new(),
            started: Instant::now(),
            frame_timeout_ns: config.frame_timeout_ns(),
            pending_resize: None,
            ui,
            effects,
            draw_descriptors,
            immediate,
            targets,
            core,
        };
        renderer.clear_draw_image()?;

        log::info!("Renderer initialized");
        Ok(renderer)
    }

    /// Records and presents one frame.
    ///
    /// Returns `Ok` without presenting when the swapchain is out of date; it is rebuilt at the
    /// start of the next call.
    pub(crate) fn draw(&mut self, window: &Window) -> Result<()> {
        if let Some(size) = self.pending_resize.take() {
            self.rebuild_swapchain(size)?;
        }

        let slot = self.frame_counter.slot();
        let device = &self.core.gpu.device;
        let render_fence = self.targets.frames[slot].render_fence;

        // Past this wait nothing submitted from this slot is in use by the GPU.
        unsafe { device.wait_for_fences(&[render_fence], true, self.frame_timeout_ns) }
            .check("vkWaitForFences")?;

        let released = self.targets.frames[slot].pending.release(&self.core.gpu);
        self.ui.free_textures(&released)?;

        let info = OverlayInfo {
            stats: &self.stats,
            frame_number: self.frame_counter.frame_number(),
            extent: self.targets.swapchain.extent(),
            present_mode: self.targets.swapchain.present_mode(),
        };
        let ui_frame = self.ui.build(window, &mut self.effects, &info);

        // Uploads happen before acquire so an out-of-date swapchain cannot drop them.
        if let Some(ui_frame) = &ui_frame {
            self.ui.upload_textures(
                self.core.graphics_queue.queue,
                self.immediate.command_pool,
                &ui_frame.textures_delta.set,
            )?;
            self.targets.frames[slot].pending.defer_textures(&ui_frame.textures_delta.free);
        }

        let swapchain_semaphore = self.targets.frames[slot].swapchain_semaphore;
        let acquired = unsafe {
            self.targets.swapchain.swapchain_fn.acquire_next_image(
                self.targets.swapchain.swapchain,
                self.frame_timeout_ns,
                swapchain_semaphore,
                vk::Fence::null(),
            )
        };

        let image_index = match acquired {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    self.request_resize(window.inner_size().into());
                }
                image_index as usize
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                self.request_resize(window.inner_size().into());
                return Ok(());
            }
            Err(result) => {
                return Err(EngineError::Vulkan {
                    what: "vkAcquireNextImageKHR",
                    result,
                })
            }
        };

        // Only reset once work is guaranteed to be submitted, or the next wait never returns.
        let device = &self.core.gpu.device;
        unsafe { device.reset_fences(&[render_fence]) }.check("vkResetFences")?;

        let cmd = self.targets.frames[slot].main_command_buffer;
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .check("vkResetCommandBuffer")?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .check("vkBeginCommandBuffer")?;
        }

        self.record_frame(cmd, image_index, ui_frame.as_ref())?;

        let device = &self.core.gpu.device;
        unsafe { device.end_command_buffer(cmd) }.check("vkEndCommandBuffer")?;

        let render_semaphore = self.targets.swapchain.render_semaphores[image_index];
        let cmd_infos = [command_buffer_submit_info(cmd)];
        let wait_infos = [semaphore_submit_info(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            swapchain_semaphore,
        )];
        let signal_infos = [semaphore_submit_info(
            vk::PipelineStageFlags2::ALL_GRAPHICS,
            render_semaphore,
        )];

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&cmd_infos);

        let queue = self.core.graphics_queue.queue;
        unsafe { device.queue_submit2(queue, &[submit_info], render_fence) }
            .check("vkQueueSubmit2")?;

        let swapchains = [self.targets.swapchain.swapchain];
        let wait_semaphores = [render_semaphore];
        let image_indices = [image_index as u32];

        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices);

        let presented = unsafe {
            self.targets.swapchain
                .swapchain_fn
                .queue_present(self.core.graphics_queue.queue, &present_info)
        };
        match presented {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain suboptimal or out of date on present");
                self.request_resize(window.inner_size().into());
            }
            Err(result) => {
                return Err(EngineError::Vulkan {
                    what: "vkQueuePresentKHR",
                    result,
                })
            }
        }

        self.frame_counter.advance();
        self.stats.tick(Instant::now());
        Ok(())
    }

    fn record_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        ui_frame: Option<&UiFrame>,
    ) -> Result<()> {
        let device = &self.core.gpu.device;
        let swapchain_image = self.targets.swapchain.images[image_index];
        let swapchain_extent = self.targets.swapchain.extent();
        let draw_extent = self.targets.draw_image.extent_2d();

        // Previous contents are discarded, the background overwrites every pixel.
        transition_image(
            device,
            cmd,
            self.targets.draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        self.draw_background(cmd);

        transition_image(
            device,
            cmd,
            self.targets.draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        transition_image(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        copy_image_to_image(
            device,
            cmd,
            self.targets.draw_image.image,
            swapchain_image,
            draw_extent,
            swapchain_extent,
        );

        match ui_frame {
            Some(ui_frame) => {
                transition_image(
                    device,
                    cmd,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                );
                self.draw_ui(cmd, image_index, ui_frame)?;
                transition_image(
                    &self.core.gpu.device,
                    cmd,
                    swapchain_image,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                );
            }
            None => transition_image(
                device,
                cmd,
                swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        }
        Ok(())
    }

    fn draw_background(&self, cmd: vk::CommandBuffer) {
        let device = &self.core.gpu.device;

        let blue = (self.started.elapsed().as_secs_f32().sin() + 1.0) / 2.0;
        let clear_color = vk::ClearColorValue {
            float32: [0.0, 0.0, blue, 1.0],
        };
        let ranges = [subresource_range(vk::ImageAspectFlags::COLOR)];
        unsafe {
            device.cmd_clear_color_image(
                cmd,
                self.targets.draw_image.image,
                vk::ImageLayout::GENERAL,
                &clear_color,
                &ranges,
            )
        }

        let Some(effect) = self.effects.current() else {
            return;
        };
        let (groups_x, groups_y) = dispatch_size(self.targets.draw_image.extent_2d());
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, effect.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.effects.layout,
                0,
                &[self.draw_descriptors.set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.effects.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&effect.data),
            );
            device.cmd_dispatch(cmd, groups_x, groups_y, 1);
        }
    }

    fn draw_ui(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        ui_frame: &UiFrame,
    ) -> Result<()> {
        let extent = self.targets.swapchain.extent();
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(self.targets.swapchain.image_views[image_index])
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe { self.core.gpu.device.cmd_begin_rendering(cmd, &rendering_info) };
        let drawn = self.ui.render(cmd, extent, ui_frame);
        unsafe { self.core.gpu.device.cmd_end_rendering(cmd) };
        drawn
    }

    /// Clears a freshly created draw image and leaves it in GENERAL layout.
    fn clear_draw_image(&self) -> Result<()> {
        let image = self.targets.draw_image.image;
        self.immediate
            .submit(&self.core.gpu.device, &self.core.graphics_queue, |device, cmd| {
                transition_image(
                    device,
                    cmd,
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                );
                let black = vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                };
                let ranges = [subresource_range(vk::ImageAspectFlags::COLOR)];
                unsafe {
                    device.cmd_clear_color_image(
                        cmd,
                        image,
                        vk::ImageLayout::GENERAL,
                        &black,
                        &ranges,
                    )
                }
            })
    }

    fn rebuild_swapchain(&mut self, size: [u32; 2]) -> Result<()> {
        self.wait_gpu_idle()?;
        self.targets.rebuild(&self.core.context, size, self.frame_counter.slot())?;

        self.draw_descriptors.point_at(&self.core.gpu.device, self.targets.draw_image.view);
        self.clear_draw_image()?;
        self.stats.reset();

        log::info!(
            "Swapchain rebuilt: {}x{}, draw image {:?}",
            self.targets.swapchain.extent().width,
            self.targets.swapchain.extent().height,
            self.targets.draw_image.format
        );
        Ok(())
    }

    /// The swapchain is rebuilt at the start of the next draw.
    pub(crate) fn request_resize(&mut self, size: [u32; 2]) {
        self.pending_resize = Some(size);
    }

    pub(crate) fn on_window_event(
        &mut self,
        window: &Window,
        event: &winit::event::WindowEvent,
    ) -> bool {
        self.ui.on_window_event(window, event)
    }

    pub(crate) fn toggle_ui(&mut self) {
        self.ui.toggle();
    }

    pub(crate) fn is_ui_visible(&self) -> bool {
        self.ui.is_visible()
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub(crate) fn wait_gpu_idle(&self) -> Result<()> {
        self.core.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::debug!("Start: Dropping renderer");
        if let Err(err) = self.wait_gpu_idle() {
            log::error!("{err}, destroying resources anyway");
        }

        // The UI renderer is dropped before the render targets, so hand it its textures now.
        for frame in self.targets.frames.iter_mut() {
            let textures = frame.pending.release(&self.core.gpu);
            if let Err(err) = self.ui.free_textures(&textures) {
                log::warn!("Failed to free UI textures: {err}");
            }
        }
        log::debug!("End: Dropping renderer");
    }
}
