// =============================================================================
// VKFORGE DEMO - spinning textured cube
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, FPS title)                           │
// │    └── Renderer (frame orchestration, caches)                   │
// │          └── Camera / Material / Mesh                           │
// │                └── backend (device, swapchain, buffers, ...)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. begin_frame  (wait on the ring slot, acquire swapchain image)
// 2. clear_screen + draw_mesh into the default color target
// 3. end_frame    (copy to the swapchain image, present)
//
// Keys: ESC quits, F11 toggles fullscreen, W toggles wireframe.
//
// =============================================================================

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use vkforge::backend::render_state::FillMode;
use vkforge::render::{Camera, Material, Mesh};
use vkforge::{Config, Renderer};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const DEMO_MATERIAL: &str = "assets/materials/checker.material";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vkforge demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// env_logger with RUST_LOG respected (default info), optionally into a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== vkforge log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

/// Two-tone checkerboard used when the demo material can't be loaded
fn checkerboard(size: u32, cell: u32) -> image::RgbaImage {
    image::RgbaImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            image::Rgba([235, 235, 235, 255])
        } else {
            image::Rgba([40, 40, 48, 255])
        }
    })
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct Scene {
    cube: Mesh,
    material: Rc<Material>,
    camera: Rc<RefCell<Camera>>,
}

impl Scene {
    fn new(renderer: &mut Renderer) -> Result<Self> {
        let cube = Mesh::unit_cube(renderer.device())?;

        let material = match renderer.create_or_get_material(DEMO_MATERIAL) {
            Ok(material) => material,
            Err(e) => {
                log::warn!("Falling back to the default material: {:?}", e);
                let mut material = Material::clone(renderer.default_material());
                material.set_texture(0, renderer.create_texture_from_image(&checkerboard(64, 8))?);
                Rc::new(material)
            }
        };

        let camera = renderer.default_camera().clone();
        renderer.set_camera(camera.clone());

        Ok(Self {
            cube,
            material,
            camera,
        })
    }

    fn toggle_wireframe(&mut self) {
        let mut material = Material::clone(&self.material);
        let shader = material.editable_shader();
        shader.state.fill = match shader.state.fill {
            FillMode::Solid => FillMode::Wireframe,
            FillMode::Wireframe => FillMode::Solid,
        };
        log::info!("Fill mode: {:?}", shader.state.fill);
        self.material = Rc::new(material);
    }
}

/// Field order matters for Drop: scene and renderer release GPU objects
/// before the window they present to goes away.
struct App {
    config: Config,
    scene: Option<Scene>,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    /// First error that ended the event loop
    fatal: Option<anyhow::Error>,

    start: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            scene: None,
            renderer: None,
            window: None,
            is_fullscreen,
            fatal: None,
            start: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        let mut renderer = Renderer::new(window, size.width, size.height, &self.config)
            .context("Failed to create renderer")?;
        self.scene = Some(Scene::new(&mut renderer)?);
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Returns false when the frame was skipped
    fn render_frame(&mut self) -> Result<bool> {
        let (Some(renderer), Some(scene)) = (self.renderer.as_mut(), self.scene.as_ref()) else {
            return Ok(false);
        };

        if !renderer.begin_frame()? {
            return Ok(false);
        }

        let t = self.start.elapsed().as_secs_f32();
        let eye = Vec3::new(2.5 * (t * 0.3).sin(), 1.5, 2.5 * (t * 0.3).cos());
        scene.camera.borrow_mut().look_at(eye, Vec3::ZERO, Vec3::Y);

        renderer.set_material(scene.material.clone());
        renderer.clear_screen(self.config.graphics.clear_color)?;

        let model = Mat4::from_rotation_y(t) * Mat4::from_rotation_x(t * 0.5);
        renderer.draw_mesh(&scene.cube, model)?;

        renderer.end_frame()?;
        Ok(true)
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            self.fail(event_loop, e);
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => self.fail(event_loop, e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            KeyCode::KeyW => {
                                if let Some(scene) = self.scene.as_mut() {
                                    scene.toggle_wireframe();
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
