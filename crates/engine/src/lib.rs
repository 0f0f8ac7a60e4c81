use crate::renderer::VulkanRenderer;
use winit::event::WindowEvent;
use winit::window::Window;

mod commands;
mod context;
mod debug;
mod deletion;
mod descriptor;
mod frame;
mod image;
mod pipeline;
mod renderer;
mod stats;
mod swapchain;
mod targets;
mod ui;

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use deletion::DeletionQueue;
pub use error::{EngineError, Result};
pub use frame::{FrameCounter, FRAME_OVERLAP};
pub use pipeline::ComputePushConstants;
pub use stats::FrameStats;

pub struct Engine {
    renderer: VulkanRenderer,
    minimized: bool,
}

impl Engine {
    pub fn initialize(window: &Window, config: &Config) -> Result<Self> {
        let renderer = VulkanRenderer::initialize(window, config)?;
        let size = window.inner_size();
        Ok(Self {
            renderer,
            minimized: size.width == 0 || size.height == 0,
        })
    }

    /// Forwards input to the overlay. Returns true when the overlay consumed the event.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.renderer.on_window_event(window, event)
    }

    /// A zero-sized window counts as minimised; drawing pauses until it has an area again.
    pub fn resize(&mut self, size: [u32; 2]) {
        if size[0] == 0 || size[1] == 0 {
            self.set_minimized(true);
            return;
        }
        self.set_minimized(false);
        self.renderer.request_resize(size);
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        if self.minimized != minimized {
            log::debug!("Minimized: {minimized}");
            if !minimized {
                self.renderer.reset_stats();
            }
        }
        self.minimized = minimized;
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn toggle_ui(&mut self) {
        self.renderer.toggle_ui();
    }

    pub fn is_ui_visible(&self) -> bool {
        self.renderer.is_ui_visible()
    }

    /// Draws one frame unless minimised.
    pub fn draw(&mut self, window: &Window) -> Result<()> {
        if self.minimized {
            return Ok(());
        }
        self.renderer.draw(window)
    }

    /// Waits until the GPU has finished all submitted work.
    pub fn stop(&mut self) -> Result<()> {
        self.renderer.wait_gpu_idle()
    }
}
