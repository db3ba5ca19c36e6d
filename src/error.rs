use thiserror::Error;

#[cfg(feature = "vulkan")]
use vulkanalia::vk;

use crate::core::renderer::api::{BackendKind, Platform};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer is already initialized")]
    AlreadyInitialized,

    #[error("renderer is not initialized")]
    NotInitialized,

    #[error("renderer has been disposed")]
    Disposed,

    #[error("context creation failed: {0}")]
    ContextCreationFailed(String),

    #[error("no suitable GPU device found")]
    NoSuitableDevice,

    /// Recoverable; the swapchain manager rebuilds instead of returning it.
    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    #[error("{backend} rendering is not supported on {platform}")]
    PlatformUnsupported {
        backend: BackendKind,
        platform: Platform,
    },

    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {code:?} (context: {context})")]
    Vk {
        code: vk::ErrorCode,
        context: &'static str,
    },

    #[error("library loader: {0}")]
    Loader(String),

    #[error("OpenGL: {0}")]
    Gl(String),

    #[error("drawing routine failed: {0}")]
    Draw(String),

    #[error("failed to spawn render thread: {0}")]
    Thread(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// `?` conversion for raw Vulkan error codes.
#[cfg(feature = "vulkan")]
impl From<vk::ErrorCode> for RenderError {
    fn from(code: vk::ErrorCode) -> Self {
        Self::Vk {
            code,
            context: "unspecified", // fallback context
        }
    }
}

#[cfg(feature = "vulkan")]
pub trait VkResultExt<T> {
    fn into_render_error(self, context: &'static str) -> Result<T>;
}

#[cfg(feature = "vulkan")]
impl<T> VkResultExt<T> for std::result::Result<T, vk::ErrorCode> {
    fn into_render_error(self, context: &'static str) -> Result<T> {
        self.map_err(|code| RenderError::Vk { code, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_names_backend_and_platform() {
        let err = RenderError::PlatformUnsupported {
            backend: BackendKind::Vulkan,
            platform: Platform::MacOs,
        };
        assert_eq!(err.to_string(), "Vulkan rendering is not supported on macOS");
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn vk_codes_carry_context() {
        let failed: std::result::Result<(), vk::ErrorCode> =
            Err(vk::ErrorCode::DEVICE_LOST);
        let err = failed.into_render_error("queue submit").unwrap_err();
        assert!(matches!(
            err,
            RenderError::Vk {
                code: vk::ErrorCode::DEVICE_LOST,
                context: "queue submit"
            }
        ));
    }
}
