// src/core/renderer/backend/mod.rs
#[cfg(feature = "opengl")]
pub mod gl;
#[cfg(feature = "vulkan")]
pub mod vulkan;

use log::info;

use crate::config::RendererConfig;
use crate::core::renderer::api::{BackendKind, Platform, RenderBackend};
use crate::core::renderer::surface::DrawRoutine;
use crate::error::{RenderError, Result};

/// Whether `kind` can run on `platform` in this build.
pub fn ensure_supported(kind: BackendKind, platform: Platform) -> Result<()> {
    let supported = match kind {
        BackendKind::OpenGl => {
            cfg!(feature = "opengl")
                && matches!(platform, Platform::Windows | Platform::Linux | Platform::MacOs)
        }
        BackendKind::Vulkan => {
            cfg!(feature = "vulkan") && matches!(platform, Platform::Windows | Platform::Linux)
        }
    };

    if supported {
        Ok(())
    } else {
        Err(RenderError::PlatformUnsupported {
            backend: kind,
            platform,
        })
    }
}

/// Build the backend for `kind` on the running OS. Selected once; the
/// renderer never switches backends afterwards.
pub fn create_backend(
    kind: BackendKind,
    routine: Box<dyn DrawRoutine>,
    config: &RendererConfig,
) -> Result<Box<dyn RenderBackend>> {
    let platform = Platform::current();
    ensure_supported(kind, platform)?;
    info!("using {kind} backend on {platform}");

    match kind {
        #[cfg(feature = "opengl")]
        BackendKind::OpenGl => {
            let api = gl::GlApi::current().ok_or(RenderError::PlatformUnsupported {
                backend: kind,
                platform,
            })?;
            Ok(Box::new(gl::GlBackend::new(gl::NativeGlContext::new(api), routine)))
        }
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan => Ok(Box::new(
            vulkan::VulkanBackend::<vulkan::surface::NativeSurface>::new(routine, config.clone()),
        )),
        #[allow(unreachable_patterns)]
        _ => {
            let _ = (routine, config);
            Err(RenderError::PlatformUnsupported {
                backend: kind,
                platform,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_is_unsupported_on_macos() {
        let err = ensure_supported(BackendKind::Vulkan, Platform::MacOs).unwrap_err();
        assert!(matches!(
            err,
            RenderError::PlatformUnsupported {
                backend: BackendKind::Vulkan,
                platform: Platform::MacOs
            }
        ));
    }

    #[test]
    fn unknown_platforms_are_unsupported() {
        assert!(ensure_supported(BackendKind::OpenGl, Platform::Other).is_err());
        assert!(ensure_supported(BackendKind::Vulkan, Platform::Other).is_err());
    }

    #[cfg(feature = "opengl")]
    #[test]
    fn opengl_runs_on_every_desktop_platform() {
        for platform in [Platform::Windows, Platform::Linux, Platform::MacOs] {
            assert!(ensure_supported(BackendKind::OpenGl, platform).is_ok());
        }
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn vulkan_runs_on_windows_and_linux() {
        assert!(ensure_supported(BackendKind::Vulkan, Platform::Windows).is_ok());
        assert!(ensure_supported(BackendKind::Vulkan, Platform::Linux).is_ok());
    }
}
