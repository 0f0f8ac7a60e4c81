use crate::error::Result;
use crate::frame::FRAME_OVERLAP;
use crate::pipeline::BackgroundEffects;
use crate::stats::FrameStats;
use ash::{vk, Device};
use egui::{ClippedPrimitive, TextureId, TexturesDelta};
use egui_ash_renderer::Renderer;
use std::sync::{Arc, Mutex};
use vk_mem::Allocator;
use winit::event::WindowEvent;
use winit::window::Window;

/// Read-only frame facts shown in the "Frame" window.
pub(crate) struct OverlayInfo<'a> {
    pub(crate) stats: &'a FrameStats,
    pub(crate) frame_number: u64,
    pub(crate) extent: vk::Extent2D,
    pub(crate) present_mode: vk::PresentModeKHR,
}

/// Output of one egui pass, consumed by the frame that produced it.
pub(crate) struct UiFrame {
    pub(crate) primitives: Vec<ClippedPrimitive>,
    pub(crate) textures_delta: TexturesDelta,
    pub(crate) pixels_per_point: f32,
}

pub(crate) struct UiContext {
    renderer: Renderer,
    state: egui_winit::State,
    visible: bool,
}

impl UiContext {
    pub(crate) fn initialize(
        window: &Window,
        device: &Device,
        allocator: &Arc<Mutex<Allocator>>,
        color_attachment_format: vk::Format,
        visible: bool,
    ) -> Result<Self> {
        let gui_context = egui::Context::default();
        gui_context.set_pixels_per_point(window.scale_factor() as f32);

        let viewport_id = gui_context.viewport_id();
        let state = egui_winit::State::new(
            gui_context,
            viewport_id,
            window,
            Some(window.scale_factor() as f32),
            Some(winit::window::Theme::Dark),
            None,
        );

        let renderer = Renderer::with_vk_mem_allocator(
            allocator.clone(),
            device.clone(),
            egui_ash_renderer::DynamicRendering {
                color_attachment_format,
                depth_attachment_format: None,
            },
            egui_ash_renderer::Options {
                in_flight_frames: FRAME_OVERLAP,
                ..Default::default()
            },
        )?;

        log::debug!("UI overlay initialized ({color_attachment_format:?})");
        Ok(Self {
            renderer,
            state,
            visible,
        })
    }

    /// Returns true when egui consumed the event.
    pub(crate) fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        if !self.visible {
            return false;
        }
        self.state.on_window_event(window, event).consumed
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn toggle(&mut self) {
        self.visible = !self.visible;
        log::debug!("UI overlay visible: {}", self.visible);
    }

    /// Runs one egui pass. Returns `None` while the overlay is hidden.
    pub(crate) fn build(
        &mut self,
        window: &Window,
        effects: &mut BackgroundEffects,
        info: &OverlayInfo,
    ) -> Option<UiFrame> {
        if !self.visible {
            return None;
        }

        let input = self.state.take_egui_input(window);
        let ctx = self.state.egui_ctx().clone();

        let egui::FullOutput {
            platform_output,
            shapes,
            textures_delta,
            pixels_per_point,
            ..
        } = ctx.run(input, |ctx| draw_panels(ctx, effects, info));

        self.state.handle_platform_output(window, platform_output);

        Some(UiFrame {
            primitives: ctx.tessellate(shapes, pixels_per_point),
            textures_delta,
            pixels_per_point,
        })
    }

    /// Uploads new and changed textures. Must run before recording the draw.
    pub(crate) fn upload_textures(
        &mut self,
        queue: vk::Queue,
        command_pool: vk::CommandPool,
        textures: &[(TextureId, egui::epaint::ImageDelta)],
    ) -> Result<()> {
        if !textures.is_empty() {
            self.renderer.set_textures(queue, command_pool, textures)?;
        }
        Ok(())
    }

    /// The GPU must be done with every frame that may have sampled `textures`.
    pub(crate) fn free_textures(&mut self, textures: &[TextureId]) -> Result<()> {
        if !textures.is_empty() {
            log::trace!("Freeing {} UI textures", textures.len());
            self.renderer.free_textures(textures)?;
        }
        Ok(())
    }

    pub(crate) fn render(
        &mut self,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
        frame: &UiFrame,
    ) -> Result<()> {
        self.renderer
            .cmd_draw(cmd, extent, frame.pixels_per_point, &frame.primitives)?;
        Ok(())
    }
}

fn draw_panels(ctx: &egui::Context, effects: &mut BackgroundEffects, info: &OverlayInfo) {
    egui::Window::new("Background")
        .resizable(false)
        .show(ctx, |ui| {
            if effects.is_empty() {
                ui.label("No background effects loaded");
                return;
            }

            let mut index = effects.selected_index();
            let last = effects.len() - 1;
            ui.horizontal(|ui| {
                ui.label("Effect index:");
                ui.add(egui::Slider::new(&mut index, 0..=last));
            });
            effects.select(index);

            let Some(effect) = effects.current_mut() else {
                return;
            };
            ui.horizontal(|ui| {
                ui.label("Selected background:");
                ui.label(effect.name);
            });

            ui.add(egui::Separator::default().spacing(12.0));
            ui.heading("Push constants");
            for (i, row) in effect.data.rows_mut().into_iter().enumerate() {
                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    ui.label(format!("Data{}:", i + 1));
                    row.iter_mut().for_each(|v| {
                        ui.add(egui::DragValue::new(v).range(0.0..=1.0).speed(0.005));
                    });
                });
            }
        });

    egui::Window::new("Frame")
        .resizable(false)
        .default_pos([12.0, 400.0])
        .show(ctx, |ui| {
            ui.label(format!("FPS: {:.1}", info.stats.fps()));
            ui.label(format!("Frame time: {:.2} ms", info.stats.frame_time_ms()));
            ui.label(format!("Frame: {}", info.frame_number));
            ui.label(format!(
                "Extent: {}x{}",
                info.extent.width, info.extent.height
            ));
            ui.label(format!("Present mode: {}", present_mode_name(info.present_mode)));
        });
}

fn present_mode_name(mode: vk::PresentModeKHR) -> &'static str {
    match mode {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO relaxed",
        vk::PresentModeKHR::MAILBOX => "Mailbox",
        vk::PresentModeKHR::IMMEDIATE => "Immediate",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ComputeEffect, ComputePushConstants};

    fn info(stats: &FrameStats) -> OverlayInfo<'_> {
        OverlayInfo {
            stats,
            frame_number: 42,
            extent: vk::Extent2D {
                width: 1700,
                height: 900,
            },
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }

    #[test]
    fn panels_build_without_effects() {
        let ctx = egui::Context::default();
        let stats = FrameStats::new();
        let mut effects = BackgroundEffects::from_effects(Vec::new());

        let output = ctx.run(egui::RawInput::default(), |ctx| {
            draw_panels(ctx, &mut effects, &info(&stats))
        });
        assert!(!output.shapes.is_empty());
        assert_eq!(effects.selected_index(), 0);
    }

    #[test]
    fn panels_keep_selection_in_range() {
        let ctx = egui::Context::default();
        let stats = FrameStats::new();
        let effect = |name| ComputeEffect {
            name,
            pipeline: vk::Pipeline::null(),
            data: ComputePushConstants::default(),
        };
        let mut effects = BackgroundEffects::from_effects(vec![effect("gradient"), effect("sky")]);
        effects.select(1);

        ctx.run(egui::RawInput::default(), |ctx| {
            draw_panels(ctx, &mut effects, &info(&stats))
        });
        assert_eq!(effects.selected_index(), 1);
        assert_eq!(effects.current().map(|e| e.name), Some("sky"));
    }

    #[test]
    fn present_modes_have_readable_names() {
        assert_eq!(present_mode_name(vk::PresentModeKHR::MAILBOX), "Mailbox");
        assert_eq!(present_mode_name(vk::PresentModeKHR::SHARED_DEMAND_REFRESH), "Other");
    }
}
