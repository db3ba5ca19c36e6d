use std::fmt;
use std::str::FromStr;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle,
    RawWindowHandle, WindowHandle,
};

use crate::error::Result;

/// Capability set every platform/backend pair implements.
///
/// The lifecycle engine calls `initialize_context` and `destroy_context` on the
/// owning thread while no render thread exists; `resize_to` and `render_frame`
/// only ever run on the render thread.
pub trait RenderBackend: Send + 'static {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Create the native GPU context or presentation surface on `handle`.
    fn initialize_context(&mut self, handle: &NativeHandle) -> Result<()>;

    /// Apply a new drawable size. Never called with a zero dimension.
    fn resize_to(&mut self, width: u32, height: u32) -> Result<()>;

    /// Render one frame. Returns whether an image reached the screen; a frame
    /// dropped for a swapchain rebuild or an empty target is `Ok(false)`.
    fn render_frame(&mut self) -> Result<bool>;

    /// Called on the render thread right before it exits, after its last
    /// frame. Thread-affine contexts detach here so the next thread can take them.
    fn release_thread(&mut self) {}

    /// Release everything `initialize_context` created. Best-effort: failures
    /// are logged and the remaining steps still run. Must tolerate being
    /// called after a failed or partial initialization.
    fn destroy_context(&mut self);
}

impl<B: RenderBackend + ?Sized> RenderBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn initialize_context(&mut self, handle: &NativeHandle) -> Result<()> {
        (**self).initialize_context(handle)
    }

    fn resize_to(&mut self, width: u32, height: u32) -> Result<()> {
        (**self).resize_to(width, height)
    }

    fn render_frame(&mut self) -> Result<bool> {
        (**self).render_frame()
    }

    fn release_thread(&mut self) {
        (**self).release_thread()
    }

    fn destroy_context(&mut self) {
        (**self).destroy_context()
    }
}

/// Opaque native window/view reference plus its display connection.
///
/// Owned by the host; the renderer only borrows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle {
    window: RawWindowHandle,
    display: RawDisplayHandle,
}

impl NativeHandle {
    /// # Safety
    ///
    /// Both handles must stay valid from `Renderer::initialize` until
    /// `Renderer::dispose` returns.
    pub unsafe fn new(window: RawWindowHandle, display: RawDisplayHandle) -> Self {
        Self { window, display }
    }

    pub fn raw_window(&self) -> RawWindowHandle {
        self.window
    }

    pub fn raw_display(&self) -> RawDisplayHandle {
        self.display
    }
}

impl HasWindowHandle for NativeHandle {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        // SAFETY: validity is the contract of `NativeHandle::new`.
        Ok(unsafe { WindowHandle::borrow_raw(self.window) })
    }
}

impl HasDisplayHandle for NativeHandle {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        // SAFETY: validity is the contract of `NativeHandle::new`.
        Ok(unsafe { DisplayHandle::borrow_raw(self.display) })
    }
}

/// Drawable size in pixels as last reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: i32,
    pub height: i32,
}

impl Dimensions {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Frames with a non-positive dimension are skipped.
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Pixel size for the backend, `None` when not drawable.
    pub fn extent(&self) -> Option<(u32, u32)> {
        self.is_drawable()
            .then(|| (self.width as u32, self.height as u32))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Disposed,
}

/// Graphics API a renderer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    OpenGl,
    Vulkan,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenGl => f.write_str("OpenGL"),
            Self::Vulkan => f.write_str("Vulkan"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gl" | "opengl" => Ok(Self::OpenGl),
            "vk" | "vulkan" => Ok(Self::Vulkan),
            other => Err(format!("unknown backend {other:?} (expected gl or vulkan)")),
        }
    }
}

/// Operating system family, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Other,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => f.write_str("Windows"),
            Self::Linux => f.write_str("Linux"),
            Self::MacOs => f.write_str("macOS"),
            Self::Other => f.write_str("this platform"),
        }
    }
}
