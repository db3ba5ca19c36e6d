//! glutin-backed native GL contexts (WGL, GLX, CGL).

use std::ffi::CStr;
use std::num::NonZeroU32;

use glutin::config::{ConfigTemplateBuilder, GlConfig};
use glutin::context::{
    ContextAttributesBuilder, NotCurrentGlContext, PossiblyCurrentContext, PossiblyCurrentGlContext,
};
use glutin::display::{Display, DisplayApiPreference, GlDisplay};
use glutin::surface::{GlSurface, Surface, SurfaceAttributesBuilder, WindowSurface};
use log::{debug, info};
use raw_window_handle::RawWindowHandle;

use super::GlContext;
use crate::core::renderer::api::NativeHandle;
use crate::error::{RenderError, Result};

/// Native GL platform API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlApi {
    Wgl,
    Glx,
    Cgl,
}

impl GlApi {
    pub const fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::Wgl)
        } else if cfg!(target_os = "macos") {
            Some(Self::Cgl)
        } else if cfg!(target_os = "linux") {
            Some(Self::Glx)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Wgl => "wgl",
            Self::Glx => "glx",
            Self::Cgl => "cgl",
        }
    }

    /// Only CGL needs its backing store told about a new size.
    pub fn resizes_surface(self) -> bool {
        matches!(self, Self::Cgl)
    }
}

#[cfg(target_os = "windows")]
fn display_preference(window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Wgl(Some(window))
}

#[cfg(target_os = "macos")]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Cgl
}

#[cfg(all(unix, not(target_os = "macos")))]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Glx(Box::new(winit::platform::x11::register_xlib_error_hook))
}

struct Live {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    display: Display,
}

/// A GL context plus window surface created on a host-supplied native handle.
pub struct NativeGlContext {
    api: GlApi,
    live: Option<Live>,
}

// SAFETY: the context is released on the creating thread before the render
// thread makes it current, and the owning backend is only ever used by one
// thread at a time.
unsafe impl Send for NativeGlContext {}

impl NativeGlContext {
    pub fn new(api: GlApi) -> Self {
        Self { api, live: None }
    }

    pub fn api(&self) -> GlApi {
        self.api
    }

    fn live(&self) -> Result<&Live> {
        self.live.as_ref().ok_or(RenderError::NotInitialized)
    }
}

fn creation_failed(step: &str, err: glutin::error::Error) -> RenderError {
    RenderError::ContextCreationFailed(format!("{step}: {err}"))
}

impl GlContext for NativeGlContext {
    fn platform(&self) -> &'static str {
        self.api.name()
    }

    fn create_context(&mut self, handle: &NativeHandle) -> Result<()> {
        if self.live.is_some() {
            return Err(RenderError::AlreadyInitialized);
        }
        let window = handle.raw_window();

        // SAFETY: the handles stay valid for the renderer's lifetime.
        let display = unsafe { Display::new(handle.raw_display(), display_preference(window)) }
            .map_err(|err| creation_failed("open display", err))?;

        let template = ConfigTemplateBuilder::new()
            .with_depth_size(24)
            .with_stencil_size(8)
            .with_single_buffering(false)
            .compatible_with_native_window(window)
            .build();
        // SAFETY: the display is live.
        let config = unsafe { display.find_configs(template) }
            .map_err(|err| creation_failed("find configs", err))?
            .next()
            .ok_or_else(|| {
                RenderError::ContextCreationFailed(
                    "no double-buffered config with 24-bit depth and 8-bit stencil".into(),
                )
            })?;
        debug!(
            "GL config: depth {} stencil {} samples {}",
            config.depth_size(),
            config.stencil_size(),
            config.num_samples()
        );

        let attributes = ContextAttributesBuilder::new().build(Some(window));
        // SAFETY: `config` came from this display.
        let context = unsafe { display.create_context(&config, &attributes) }
            .map_err(|err| creation_failed("create context", err))?;

        // Window surfaces track the native window; the size is a placeholder.
        let surface_attributes = SurfaceAttributesBuilder::<WindowSurface>::new().build(
            window,
            NonZeroU32::MIN,
            NonZeroU32::MIN,
        );
        // SAFETY: `window` is the native window the config was matched against.
        let surface = unsafe { display.create_window_surface(&config, &surface_attributes) }
            .map_err(|err| creation_failed("create window surface", err))?;

        let context = context
            .make_current(&surface)
            .map_err(|err| creation_failed("make current", err))?;

        info!("{} context created", self.api.name());
        self.live = Some(Live {
            context,
            surface,
            display,
        });
        Ok(())
    }

    fn destroy_context(&mut self) {
        if let Some(live) = self.live.take() {
            drop(live);
            info!("{} context destroyed", self.api.name());
        }
    }

    fn make_current(&mut self) -> Result<()> {
        let live = self.live()?;
        live.context
            .make_current(&live.surface)
            .map_err(|err| RenderError::Gl(format!("make current: {err}")))
    }

    fn release_current(&mut self) -> Result<()> {
        let live = self.live()?;
        live.context
            .make_not_current_in_place()
            .map_err(|err| RenderError::Gl(format!("release context: {err}")))
    }

    fn swap_buffers(&mut self) -> Result<()> {
        let Some(live) = &self.live else {
            return Ok(());
        };
        live.surface
            .swap_buffers(&live.context)
            .map_err(|err| RenderError::Gl(format!("swap buffers: {err}")))
    }

    fn after_resize(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.api.resizes_surface() {
            return Ok(());
        }
        let (Some(width), Some(height)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            return Ok(());
        };
        let live = self.live()?;
        live.surface.resize(&live.context, width, height);
        Ok(())
    }

    fn load_functions(&self) -> Result<glow::Context> {
        let live = self.live()?;
        // SAFETY: the context is current on this thread.
        Ok(unsafe {
            glow::Context::from_loader_function_cstr(|name: &CStr| {
                live.display.get_proc_address(name)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cgl_resizes_its_surface() {
        assert!(GlApi::Cgl.resizes_surface());
        assert!(!GlApi::Wgl.resizes_surface());
        assert!(!GlApi::Glx.resizes_surface());
    }

    #[test]
    fn operations_before_creation() {
        let mut context = NativeGlContext::new(GlApi::Glx);
        assert!(matches!(context.make_current(), Err(RenderError::NotInitialized)));
        assert!(context.swap_buffers().is_ok());
        context.destroy_context();
    }
}
