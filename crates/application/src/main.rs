use anyhow::Context;
use std::path::PathBuf;
use std::time::Instant;
use vx_engine::config::ConfigError;
use vx_engine::logging::init_logging;
use vx_engine::{Config, Engine};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowId};

const DEFAULT_CONFIG: &str = "vx.toml";

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let (config, load_error) = match Config::load_from_path(&config_path) {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    init_logging(&config.logging);

    match load_error {
        Some(ConfigError::Io { .. }) if !config_path.exists() => {
            log::info!("No config at {config_path:?}, using defaults")
        }
        Some(err) => log::warn!("{err}. Using defaults."),
        None => log::info!("Loaded configuration from {config_path:?}"),
    }

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = Application::new(config);
    event_loop
        .run_app(&mut app)
        .context("event loop terminated with an error")?;
    Ok(())
}

struct Application {
    config: Config,
    // Declared before `window`: the engine holds a surface created from it.
    engine: Option<Engine>,
    window: Option<Window>,
}

impl Application {
    fn new(config: Config) -> Self {
        Self {
            config,
            engine: None,
            window: None,
        }
    }

    fn toggle_fullscreen(&self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.fullscreen().is_some() {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        } else {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let PhysicalKey::Code(key) = event.physical_key else {
            return;
        };

        match key {
            KeyCode::Escape => {
                log::info!("Escape pressed, exiting");
                event_loop.exit();
            }
            KeyCode::F11 => self.toggle_fullscreen(),
            KeyCode::F1 => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.toggle_ui();
                }
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for Application {
    fn new_events(&mut self, _: &ActiveEventLoop, cause: StartCause) {
        // periodic wake-up while minimised
        if let StartCause::ResumeTimeReached { .. } = cause {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_config = &self.config.window;
        let mut attributes = Window::default_attributes()
            .with_title(window_config.title.clone())
            .with_inner_size(PhysicalSize::new(window_config.width, window_config.height));
        if window_config.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(err) => {
                log::error!("Failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };
        log::debug!("Window created");

        match Engine::initialize(&window, &self.config) {
            Ok(engine) => self.engine = Some(engine),
            Err(err) => {
                log::error!("Failed to initialize engine: {err}");
                event_loop.exit();
                return;
            }
        }

        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let (Some(engine), Some(window)) = (self.engine.as_mut(), self.window.as_ref()) else {
            return;
        };

        let consumed = engine.on_window_event(window, &event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                engine.resize(size.into());
                if !engine.is_minimized() {
                    window.request_redraw();
                }
            }
            WindowEvent::Occluded(occluded) => {
                let size = window.inner_size();
                engine.set_minimized(occluded || size.width == 0 || size.height == 0);
                if !engine.is_minimized() {
                    window.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if !consumed => {
                self.handle_key(event_loop, &event);
            }
            WindowEvent::RedrawRequested => {
                if engine.is_minimized() {
                    return;
                }

                window.pre_present_notify();
                if let Err(err) = engine.draw(window) {
                    log::error!("Frame failed: {err}");
                    event_loop.exit();
                    return;
                }
                window.request_redraw();
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let minimized = self.engine.as_ref().is_some_and(Engine::is_minimized);
        if minimized {
            let interval = self.config.unfocused_frame_interval();
            event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + interval));
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
        }
    }

    fn exiting(&mut self, _: &ActiveEventLoop) {
        // Last code to run before the event loop exits; the engine must be gone by then.
        if let Some(mut engine) = self.engine.take() {
            if let Err(err) = engine.stop() {
                log::error!("Failed to wait for the GPU: {err}");
            }
            drop(engine);
        }
        log::info!("Shut down");
    }
}
