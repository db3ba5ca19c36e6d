// src/core/renderer/backend/vulkan/mod.rs
mod debug;
mod device;
pub mod layout;
pub mod select;
pub mod surface;
pub mod swapchain;
mod target;

use log::{debug, info};
use vulkanalia::vk;

use crate::config::RendererConfig;
use crate::core::renderer::api::{NativeHandle, RenderBackend};
use crate::core::renderer::surface::DrawRoutine;
use crate::error::{RenderError, Result};

pub use device::VulkanDevice;
pub use surface::{NativeSurface, SurfacePlatform};
pub use swapchain::{FrameStatus, SwapchainDevice, SwapchainManager};

/// Vulkan implementation of [`RenderBackend`] for one native window.
pub struct VulkanBackend<P: SurfacePlatform + Default = NativeSurface> {
    config: RendererConfig,
    routine: Box<dyn DrawRoutine>,
    manager: Option<SwapchainManager<VulkanDevice<P>>>,
}

impl<P: SurfacePlatform + Default> VulkanBackend<P> {
    pub fn new(routine: Box<dyn DrawRoutine>, config: RendererConfig) -> Self {
        Self {
            config,
            routine,
            manager: None,
        }
    }

    pub fn swapchain_rebuilds(&self) -> u64 {
        self.manager.as_ref().map_or(0, SwapchainManager::rebuilds)
    }
}

impl<P: SurfacePlatform + Default> RenderBackend for VulkanBackend<P> {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn initialize_context(&mut self, handle: &NativeHandle) -> Result<()> {
        if self.manager.is_some() {
            return Err(RenderError::AlreadyInitialized);
        }

        let mut device = VulkanDevice::new(P::default());
        if let Err(err) = device.open(handle, &self.config) {
            device.destroy();
            return Err(err);
        }

        // The surface reports its real size; the host's first resize follows.
        let manager = SwapchainManager::new(device, vk::Extent2D { width: 0, height: 0 })?;
        self.manager = Some(manager);
        info!("Vulkan context ready");
        Ok(())
    }

    fn resize_to(&mut self, width: u32, height: u32) -> Result<()> {
        let manager = self.manager.as_mut().ok_or(RenderError::NotInitialized)?;
        manager.resize(width, height)
    }

    fn render_frame(&mut self) -> Result<bool> {
        let manager = self.manager.as_mut().ok_or(RenderError::NotInitialized)?;
        match manager.render_frame(self.routine.as_mut())? {
            FrameStatus::Presented => Ok(true),
            FrameStatus::Recreated => {
                debug!("frame dropped; swapchain rebuilt");
                Ok(false)
            }
            FrameStatus::Skipped => Ok(false),
        }
    }

    fn destroy_context(&mut self) {
        if let Some(mut manager) = self.manager.take() {
            manager.shutdown();
            info!("Vulkan context destroyed");
        }
    }
}

impl<P: SurfacePlatform + Default> Drop for VulkanBackend<P> {
    fn drop(&mut self) {
        self.destroy_context();
    }
}
