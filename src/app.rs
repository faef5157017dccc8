use std::sync::Arc;

use log::{error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop},
    window::WindowAttributes,
};

use crate::driver::{DriverState, FrameDriver};
use crate::error::Error;
use crate::hot::ShaderHotReload;
use crate::keyinputs::{KeyCommand, KeyInputHandler};
use crate::mouse::MouseTracker;
use crate::Core;

type DriverCreator = Box<dyn FnOnce(&Core) -> Result<FrameDriver, Error>>;

/// Windowed host: owns the event loop side and feeds a [`FrameDriver`].
pub struct ShaderApp {
    window_title: String,
    window_size: (u32, u32),
    hot_reload: Option<ShaderHotReload>,
}

impl ShaderApp {
    pub fn new(window_title: &str, width: u32, height: u32) -> Result<(Self, EventLoop<()>), Error> {
        let event_loop = EventLoop::builder()
            .build()
            .map_err(|e| Error::Initialization(format!("event loop: {e}")))?;
        // the window is created in `resumed`
        let app = Self {
            window_title: String::from(window_title),
            window_size: (width, height),
            hot_reload: None,
        };
        Ok((app, event_loop))
    }

    /// Reloads the driver's source whenever the watched file changes.
    pub fn with_hot_reload(mut self, hot_reload: ShaderHotReload) -> Self {
        self.hot_reload = Some(hot_reload);
        self
    }

    pub fn run(
        self,
        event_loop: EventLoop<()>,
        driver_creator: impl FnOnce(&Core) -> Result<FrameDriver, Error> + 'static,
    ) -> Result<(), Error> {
        let mut handler = ShaderAppHandler {
            app: self,
            driver_creator: Some(Box::new(driver_creator)),
            core: None,
            driver: None,
            mouse: MouseTracker::new(),
            keys: KeyInputHandler::new(),
            failure: None,
        };
        event_loop
            .run_app(&mut handler)
            .map_err(|e| Error::Runtime(format!("event loop: {e}")))?;
        match handler.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct ShaderAppHandler {
    app: ShaderApp,
    driver_creator: Option<DriverCreator>,
    core: Option<Core>,
    driver: Option<FrameDriver>,
    mouse: MouseTracker,
    keys: KeyInputHandler,
    failure: Option<Error>,
}

impl ShaderAppHandler {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: Error) {
        error!("{e}");
        if let Some(driver) = &mut self.driver {
            driver.stop();
        }
        self.failure = Some(e);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(core), Some(driver)) = (&mut self.core, &mut self.driver) else {
            return;
        };
        if let Some(source) = self.app.hot_reload.as_mut().and_then(ShaderHotReload::check) {
            // a broken edit keeps the running instance, the sink already reported it
            if let Err(e) = driver.set_source(core, source) {
                warn!("hot reload rejected: {e}");
            }
        }
        driver.set_mouse(self.mouse.state);
        let Some(surface) = &core.surface else {
            return;
        };
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = core.size;
                core.resize(size);
                return;
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                let e = Error::Runtime("out of memory acquiring the surface texture".to_string());
                return self.fail(event_loop, e);
            }
            Err(e) => {
                warn!("surface: {e:?}");
                return;
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let result = driver.tick(core, Some(&view));
        frame.present();
        self.mouse.reset_wheel();
        if let Err(e) = result {
            if driver.state() == DriverState::Destroyed {
                self.fail(event_loop, e);
            }
        }
    }
}

impl ApplicationHandler for ShaderAppHandler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.core.is_some() {
            return;
        }
        let window_attributes = WindowAttributes::default()
            .with_inner_size(LogicalSize::new(self.app.window_size.0, self.app.window_size.1))
            .with_title(&self.app.window_title)
            .with_resizable(true);
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, Error::Initialization(format!("window: {e}"))),
        };
        let core = match pollster::block_on(Core::new(window)) {
            Ok(core) => core,
            Err(e) => return self.fail(event_loop, e),
        };
        if let Some(creator) = self.driver_creator.take() {
            let driver = creator(&core).and_then(|mut driver| driver.start(&core).map(|_| driver));
            match driver {
                Ok(driver) => self.driver = Some(driver),
                Err(e) => {
                    self.core = Some(core);
                    return self.fail(event_loop, e);
                }
            }
        }
        info!("ShaderApp resumed: {}x{}", core.size.width, core.size.height);
        self.core = Some(core);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: winit::window::WindowId, event: WindowEvent) {
        let Some(core) = &mut self.core else {
            return;
        };
        if core.window().map(|w| w.id()) != Some(window_id) {
            return;
        }
        if self.mouse.handle_mouse_input(&event) {
            if let Some(driver) = &mut self.driver {
                let [x, y] = self.mouse.state.position;
                driver.pointer(x, y);
            }
        }
        match event {
            WindowEvent::CloseRequested => {
                if let Some(driver) = &mut self.driver {
                    driver.stop();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if core.size == size {
                    return;
                }
                core.resize(size);
                if let Some(driver) = &mut self.driver {
                    driver.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let command = match core.window() {
                    Some(window) => self.keys.handle_keyboard_input(window, &event),
                    None => None,
                };
                let Some(driver) = &mut self.driver else {
                    return;
                };
                match command {
                    Some(KeyCommand::TogglePlayPause) => {
                        driver.toggle_play_pause();
                    }
                    Some(KeyCommand::Reset) => {
                        if let Err(e) = driver.reset(core) {
                            warn!("reset rejected: {e}");
                        }
                    }
                    Some(KeyCommand::Exit) => {
                        driver.stop();
                        event_loop.exit();
                    }
                    None => {}
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.core.as_ref().and_then(Core::window) {
            window.request_redraw();
        }
    }
}
