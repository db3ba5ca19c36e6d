// src/app.rs

use std::time::Instant;

use log::{error, info};
use thiserror::Error;
use viewport_host::{
    BackendKind, DrawRoutine, DrawableSurface, NativeHandle, RenderBackend, RenderError, Renderer,
    RendererConfig, create_backend,
};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HandleError, HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowAttributes, WindowId},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("winit: {0}")]
    Winit(#[from] EventLoopError),
    #[error("window creation: {0}")]
    Window(#[from] OsError),
    #[error("native handle: {0}")]
    Handle(#[from] HandleError),
}

/// Clears the whole surface with a colour that slowly cycles through hues.
struct ClearColor {
    started: Instant,
}

impl ClearColor {
    fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn rgb(&self) -> [f32; 3] {
        let t = self.started.elapsed().as_secs_f32() * 0.5;
        let third = std::f32::consts::TAU / 3.0;
        [0.0, third, 2.0 * third].map(|phase| 0.5 + 0.5 * (t + phase).sin())
    }
}

impl DrawRoutine for ClearColor {
    fn draw(&mut self, surface: &mut DrawableSurface<'_>) -> viewport_host::Result<()> {
        let [r, g, b] = self.rgb();
        match surface {
            #[cfg(feature = "opengl")]
            DrawableSurface::Gl(target) => {
                use glow::HasContext;
                // SAFETY: the backend made the context current for this call.
                unsafe {
                    target.gl.clear_color(r, g, b, 1.0);
                    target.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
                }
            }
            #[cfg(feature = "vulkan")]
            DrawableSurface::Vulkan(target) => {
                use vulkanalia::prelude::v1_0::*;

                let clear_values = [vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [r, g, b, 1.0],
                    },
                }];
                let render_area = vk::Rect2D::builder()
                    .offset(vk::Offset2D::default())
                    .extent(target.extent);
                let info = vk::RenderPassBeginInfo::builder()
                    .render_pass(target.render_pass)
                    .framebuffer(target.framebuffer)
                    .render_area(render_area)
                    .clear_values(&clear_values);

                // SAFETY: the command buffer is recording and the framebuffer
                // wraps the acquired image.
                unsafe {
                    target.device.cmd_begin_render_pass(
                        target.command_buffer,
                        &info,
                        vk::SubpassContents::INLINE,
                    );
                    target.device.cmd_end_render_pass(target.command_buffer);
                }
            }
        }
        Ok(())
    }
}

pub struct App {
    kind: BackendKind,
    config: RendererConfig,
    renderer: Option<Renderer<Box<dyn RenderBackend>>>,
    window: Option<Window>,
    failure: Option<AppError>,
}

impl App {
    pub fn run(kind: BackendKind, config: RendererConfig) -> Result<(), AppError> {
        let mut app = App {
            kind,
            config,
            renderer: None,
            window: None,
            failure: None,
        };

        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Wait);
        event_loop.run_app(&mut app)?;
        app.teardown();

        match app.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn attach(&mut self, event_loop: &ActiveEventLoop) -> Result<(), AppError> {
        let attributes = WindowAttributes::default()
            .with_title(format!("viewport-host ({})", self.kind))
            .with_inner_size(PhysicalSize::new(800, 600));
        let window = event_loop.create_window(attributes)?;

        // SAFETY: the window outlives the renderer; `teardown` disposes the
        // renderer before dropping the window.
        let handle = unsafe {
            NativeHandle::new(
                window.window_handle()?.as_raw(),
                window.display_handle()?.as_raw(),
            )
        };
        let size = window.inner_size();
        self.window = Some(window);

        let backend = create_backend(self.kind, Box::new(ClearColor::new()), &self.config)?;
        let renderer = self.renderer.insert(Renderer::new(backend, self.config.clone()));
        renderer.resize(size.width as i32, size.height as i32);
        renderer.initialize(&handle)?;
        renderer.start()?;
        Ok(())
    }

    /// Dispose the renderer first, then release the window it drew into.
    fn teardown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            info!("{} frames presented", renderer.frames_presented());
            renderer.dispose();
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(err) = self.attach(event_loop) {
            error!("failed to start renderer: {err}");
            self.teardown();
            self.failure = Some(err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.teardown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &self.renderer {
                    renderer.resize(size.width as i32, size.height as i32);
                }
            }
            WindowEvent::Occluded(hidden) => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                if hidden {
                    renderer.stop();
                } else if !renderer.is_running() {
                    if let Err(err) = renderer.start() {
                        error!("could not restart renderer: {err}");
                    }
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}
