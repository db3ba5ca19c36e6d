// src/lib.rs
//! Continuous GPU rendering into a host-owned native window on a dedicated
//! thread, with OpenGL and Vulkan backends.

#[cfg(not(any(feature = "opengl", feature = "vulkan")))]
compile_error!("enable at least one of the `opengl` or `vulkan` features");

pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use crate::config::RendererConfig;
pub use crate::core::renderer::api::{
    BackendKind, Dimensions, LifecycleState, NativeHandle, Platform, RenderBackend,
};
pub use crate::core::renderer::backend::{create_backend, ensure_supported};
pub use crate::core::renderer::lifecycle::{Renderer, SizeHandle};
pub use crate::core::renderer::surface::{DrawRoutine, DrawableSurface};
pub use crate::error::{RenderError, Result};
