//! Wraps an acquired swapchain image as a framebuffer the drawing routine can target.

use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk;

use super::swapchain::SwapchainImages;
use crate::error::{RenderError, Result, VkResultExt};

#[derive(Debug, Clone, Copy)]
struct Binding {
    image_index: u32,
    extent: vk::Extent2D,
    framebuffer: vk::Framebuffer,
}

/// Render pass per swapchain format plus one cached framebuffer for the most
/// recently bound image.
#[derive(Debug, Default)]
pub struct RenderTargetCache {
    render_pass: Option<(vk::RenderPass, vk::Format)>,
    bound: Option<Binding>,
}

/// Whether a cached binding can serve `image_index` at `extent`.
fn reusable(bound: Option<(u32, vk::Extent2D)>, image_index: u32, extent: vk::Extent2D) -> bool {
    bound == Some((image_index, extent))
}

impl RenderTargetCache {
    /// Render pass and framebuffer for image `index`, rebuilt when the image
    /// index or size differs from the cached one.
    pub fn bind(
        &mut self,
        device: &Device,
        chain: &SwapchainImages,
        index: u32,
    ) -> Result<(vk::RenderPass, vk::Framebuffer)> {
        let render_pass = self.render_pass_for(device, chain.format)?;

        if let Some(bound) = self.bound {
            if reusable(Some((bound.image_index, bound.extent)), index, chain.extent) {
                return Ok((render_pass, bound.framebuffer));
            }
        }

        self.release(device);

        let view = chain
            .views
            .get(index as usize)
            .copied()
            .ok_or(RenderError::SurfaceOutOfDate)?;
        let attachments = [view];
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(chain.extent.width)
            .height(chain.extent.height)
            .layers(1);

        // SAFETY: the view belongs to the live swapchain and matches the pass format.
        let framebuffer = unsafe { device.create_framebuffer(&info, None) }
            .into_render_error("create framebuffer")?;

        self.bound = Some(Binding {
            image_index: index,
            extent: chain.extent,
            framebuffer,
        });
        Ok((render_pass, framebuffer))
    }

    /// Drop the cached framebuffer. The render pass survives.
    pub fn release(&mut self, device: &Device) {
        if let Some(bound) = self.bound.take() {
            // SAFETY: callers wait for the queues before releasing.
            unsafe { device.destroy_framebuffer(bound.framebuffer, None) };
        }
    }

    pub fn destroy(&mut self, device: &Device) {
        self.release(device);
        if let Some((render_pass, _)) = self.render_pass.take() {
            // SAFETY: no framebuffer references the pass anymore.
            unsafe { device.destroy_render_pass(render_pass, None) };
        }
    }

    fn render_pass_for(&mut self, device: &Device, format: vk::Format) -> Result<vk::RenderPass> {
        match self.render_pass {
            Some((render_pass, cached)) if cached == format => return Ok(render_pass),
            _ => self.destroy(device),
        }

        let render_pass = create_render_pass(device, format)?;
        self.render_pass = Some((render_pass, format));
        Ok(render_pass)
    }
}

/// Single colour attachment that clears on load and stays in
/// `COLOR_ATTACHMENT_OPTIMAL`; layout changes around it are explicit barriers.
fn create_render_pass(device: &Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_attachment_ref));

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(std::slice::from_ref(&color_attachment))
        .subpasses(std::slice::from_ref(&subpass));

    // SAFETY: the create info only borrows locals alive for this call.
    unsafe { device.create_render_pass(&info, None) }.into_render_error("create render pass")
}
