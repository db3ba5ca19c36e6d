// src/core/renderer/backend/gl/mod.rs
mod native;
mod target;

use glow::HasContext;
use log::{info, warn};

use crate::core::renderer::api::{NativeHandle, RenderBackend};
use crate::core::renderer::surface::{DrawRoutine, DrawableSurface};
use crate::error::{RenderError, Result};

pub use native::{GlApi, NativeGlContext};
pub use target::GlRenderTarget;

/// Thread-affine native GL context bound to one window.
///
/// `make_current` is repeatable; [`GlBackend`] calls it on the render thread
/// before every frame and every resize.
pub trait GlContext: Send + 'static {
    fn platform(&self) -> &'static str;

    /// Pick a double-buffered config with 24-bit depth and 8-bit stencil and
    /// create a context on it, leaving it current on the calling thread.
    fn create_context(&mut self, handle: &NativeHandle) -> Result<()>;

    /// Safe to call when nothing was created.
    fn destroy_context(&mut self);

    fn make_current(&mut self) -> Result<()>;

    /// Detach the context from the calling thread so another thread can take it.
    fn release_current(&mut self) -> Result<()> {
        Ok(())
    }

    /// No-op when no context was created.
    fn swap_buffers(&mut self) -> Result<()>;

    fn after_resize(&mut self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    /// Resolve the GL function table. The context must be current.
    fn load_functions(&self) -> Result<glow::Context>;
}

/// OpenGL implementation of [`RenderBackend`] over any [`GlContext`].
pub struct GlBackend<C: GlContext> {
    context: C,
    routine: Box<dyn DrawRoutine>,
    gl: Option<glow::Context>,
    target: GlRenderTarget,
}

// SAFETY: the function table is only used while the context is current on the
// thread that owns the backend, and the backend is owned by one thread at a time.
unsafe impl<C: GlContext> Send for GlBackend<C> {}

impl<C: GlContext> GlBackend<C> {
    pub fn new(context: C, routine: Box<dyn DrawRoutine>) -> Self {
        Self {
            context,
            routine,
            gl: None,
            target: GlRenderTarget::default(),
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn target(&self) -> GlRenderTarget {
        self.target
    }
}

impl<C: GlContext> RenderBackend for GlBackend<C> {
    fn name(&self) -> &'static str {
        "opengl"
    }

    fn initialize_context(&mut self, handle: &NativeHandle) -> Result<()> {
        if self.gl.is_some() {
            return Err(RenderError::AlreadyInitialized);
        }

        self.context.create_context(handle)?;
        self.context.make_current()?;
        let gl = self.context.load_functions()?;

        // SAFETY: the context is current.
        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        info!("OpenGL {version} via {}", self.context.platform());

        self.gl = Some(gl);
        // The render thread makes it current again.
        self.context.release_current()
    }

    fn resize_to(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.target.update(width, height) {
            return Ok(());
        }
        self.context.make_current()?;
        self.context.after_resize(width, height)
    }

    fn render_frame(&mut self) -> Result<bool> {
        self.context.make_current()?;
        let gl = self.gl.as_ref().ok_or(RenderError::NotInitialized)?;
        if self.target.is_empty() {
            return Ok(false);
        }

        let (width, height) = self.target.size();
        // SAFETY: the context is current and `gl` was loaded from it.
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.viewport(0, 0, width as i32, height as i32);
        }

        let mut surface = DrawableSurface::Gl(self.target.surface(gl));
        self.routine.draw(&mut surface)?;
        self.context.swap_buffers()?;
        Ok(true)
    }

    fn release_thread(&mut self) {
        if let Err(err) = self.context.release_current() {
            warn!("could not release GL context from the render thread: {err}");
        }
    }

    fn destroy_context(&mut self) {
        if let Err(err) = self.context.make_current() {
            warn!("could not make GL context current for teardown: {err}");
        }
        self.gl = None;
        self.target = GlRenderTarget::default();
        self.context.destroy_context();
    }
}

impl<C: GlContext> Drop for GlBackend<C> {
    fn drop(&mut self) {
        self.context.destroy_context();
    }
}
