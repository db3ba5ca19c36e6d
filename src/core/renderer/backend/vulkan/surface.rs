//! Per-platform Vulkan presentation surfaces.

use smallvec::SmallVec;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{self, KhrSurfaceExtension};

use crate::core::renderer::api::NativeHandle;
use crate::error::Result;

pub type ExtensionList = SmallVec<[vk::ExtensionName; 4]>;

/// Creates and destroys the `vk::SurfaceKHR` for one native window.
pub trait SurfacePlatform: Send + 'static {
    fn name(&self) -> &'static str;

    /// Instance extensions the surface needs for `handle`.
    fn instance_extensions(&self, handle: &NativeHandle) -> Result<ExtensionList>;

    /// Device extensions beyond `VK_KHR_swapchain`.
    fn device_extensions(&self) -> ExtensionList {
        ExtensionList::new()
    }

    fn create_surface(&mut self, instance: &Instance, handle: &NativeHandle) -> Result<vk::SurfaceKHR>;

    fn destroy_surface(&mut self, instance: &Instance, surface: vk::SurfaceKHR) {
        // SAFETY: the surface was created from `instance` and no swapchain uses it anymore.
        unsafe { instance.destroy_surface_khr(surface, None) };
    }
}

#[cfg(target_os = "windows")]
pub use self::win32::Win32Surface;

#[cfg(target_os = "windows")]
mod win32 {
    use raw_window_handle::RawWindowHandle;
    use vulkanalia::prelude::v1_0::*;
    use vulkanalia::vk;
    use vulkanalia::window as vk_window;

    use super::{ExtensionList, SurfacePlatform};
    use crate::core::renderer::api::NativeHandle;
    use crate::error::{RenderError, Result, VkResultExt};

    #[derive(Debug, Default)]
    pub struct Win32Surface;

    impl SurfacePlatform for Win32Surface {
        fn name(&self) -> &'static str {
            "win32"
        }

        fn instance_extensions(&self, handle: &NativeHandle) -> Result<ExtensionList> {
            match handle.raw_window() {
                RawWindowHandle::Win32(_) => Ok(ExtensionList::from_slice(&[
                    vk::KHR_SURFACE_EXTENSION.name,
                    vk::KHR_WIN32_SURFACE_EXTENSION.name,
                ])),
                other => Err(RenderError::ContextCreationFailed(format!(
                    "expected a Win32 window handle, got {other:?}"
                ))),
            }
        }

        fn create_surface(
            &mut self,
            instance: &Instance,
            handle: &NativeHandle,
        ) -> Result<vk::SurfaceKHR> {
            // SAFETY: the handle is valid for the renderer's lifetime.
            unsafe { vk_window::create_surface(instance, handle, handle) }
                .into_render_error("create win32 surface")
        }
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::LinuxSurface;

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::{c_char, c_int, c_void};
    use std::ptr::NonNull;

    use libloading::Library;
    use log::{debug, warn};
    use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
    use vulkanalia::prelude::v1_0::*;
    use vulkanalia::vk::{self, KhrSurfaceExtension, KhrXlibSurfaceExtension};
    use vulkanalia::window as vk_window;

    use super::{ExtensionList, SurfacePlatform};
    use crate::core::renderer::api::NativeHandle;
    use crate::error::{RenderError, Result, VkResultExt};

    type XOpenDisplay = unsafe extern "C" fn(*const c_char) -> *mut c_void;
    type XCloseDisplay = unsafe extern "C" fn(*mut c_void) -> c_int;

    /// An X display connection opened by the renderer, closed on drop.
    struct OwnedDisplay {
        lib: Library,
        display: NonNull<c_void>,
    }

    // SAFETY: the connection is only used by whichever thread owns the backend.
    unsafe impl Send for OwnedDisplay {}

    impl OwnedDisplay {
        fn open() -> Result<Self> {
            // SAFETY: libX11 has no load-time side effects we depend on.
            let lib = unsafe { Library::new("libX11.so.6") }
                .map_err(|err| RenderError::Loader(format!("libX11: {err}")))?;
            // SAFETY: the symbol matches Xlib's `XOpenDisplay` prototype.
            let display = unsafe {
                let open = lib
                    .get::<XOpenDisplay>(b"XOpenDisplay\0")
                    .map_err(|err| RenderError::Loader(format!("XOpenDisplay: {err}")))?;
                open(std::ptr::null())
            };
            let display = NonNull::new(display).ok_or_else(|| {
                RenderError::ContextCreationFailed("XOpenDisplay returned no display".into())
            })?;
            debug!("opened X display connection {display:p}");
            Ok(Self { lib, display })
        }
    }

    impl Drop for OwnedDisplay {
        fn drop(&mut self) {
            // SAFETY: the display came from `XOpenDisplay` on this library and is closed once.
            unsafe {
                match self.lib.get::<XCloseDisplay>(b"XCloseDisplay\0") {
                    Ok(close) => {
                        close(self.display.as_ptr());
                    }
                    Err(err) => warn!("could not close X display: {err}"),
                }
            }
        }
    }

    /// Xlib, XCB or Wayland surface depending on the handle kind.
    #[derive(Default)]
    pub struct LinuxSurface {
        owned_display: Option<OwnedDisplay>,
    }

    impl SurfacePlatform for LinuxSurface {
        fn name(&self) -> &'static str {
            "linux"
        }

        fn instance_extensions(&self, handle: &NativeHandle) -> Result<ExtensionList> {
            let platform = match handle.raw_window() {
                RawWindowHandle::Xlib(_) => vk::KHR_XLIB_SURFACE_EXTENSION.name,
                RawWindowHandle::Xcb(_) => vk::KHR_XCB_SURFACE_EXTENSION.name,
                RawWindowHandle::Wayland(_) => vk::KHR_WAYLAND_SURFACE_EXTENSION.name,
                other => {
                    return Err(RenderError::ContextCreationFailed(format!(
                        "unsupported window handle on Linux: {other:?}"
                    )));
                }
            };
            Ok(ExtensionList::from_slice(&[vk::KHR_SURFACE_EXTENSION.name, platform]))
        }

        fn create_surface(
            &mut self,
            instance: &Instance,
            handle: &NativeHandle,
        ) -> Result<vk::SurfaceKHR> {
            match (handle.raw_display(), handle.raw_window()) {
                (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window))
                    if display.display.is_none() =>
                {
                    let owned = OwnedDisplay::open()?;
                    // SAFETY: the connection stays open until the surface is destroyed.
                    let dpy = unsafe { &mut *owned.display.as_ptr().cast::<vk::Display>() };
                    let info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(dpy)
                        .window(window.window as vk::Window);
                    // SAFETY: both the display and the window outlive the surface.
                    let surface = unsafe { instance.create_xlib_surface_khr(&info, None) }
                        .into_render_error("create xlib surface")?;
                    self.owned_display = Some(owned);
                    Ok(surface)
                }
                // SAFETY: the handle is valid for the renderer's lifetime.
                _ => unsafe { vk_window::create_surface(instance, handle, handle) }
                    .into_render_error("create surface"),
            }
        }

        fn destroy_surface(&mut self, instance: &Instance, surface: vk::SurfaceKHR) {
            // SAFETY: the surface was created from `instance` and no swapchain uses it anymore.
            unsafe { instance.destroy_surface_khr(surface, None) };
            self.owned_display = None;
        }
    }
}

/// Always fails; Vulkan surfaces are not created on this platform.
#[derive(Debug, Default)]
pub struct UnsupportedSurface;

impl SurfacePlatform for UnsupportedSurface {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn instance_extensions(&self, _handle: &NativeHandle) -> Result<ExtensionList> {
        Err(unsupported())
    }

    fn create_surface(&mut self, _instance: &Instance, _handle: &NativeHandle) -> Result<vk::SurfaceKHR> {
        Err(unsupported())
    }
}

fn unsupported() -> crate::error::RenderError {
    use crate::core::renderer::api::{BackendKind, Platform};
    crate::error::RenderError::PlatformUnsupported {
        backend: BackendKind::Vulkan,
        platform: Platform::current(),
    }
}

/// Surface implementation for the platform this crate was built for.
#[cfg(target_os = "windows")]
pub type NativeSurface = Win32Surface;
#[cfg(target_os = "linux")]
pub type NativeSurface = LinuxSurface;
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub type NativeSurface = UnsupportedSurface;
