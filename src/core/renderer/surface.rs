//! Frame-scoped drawing targets handed to the external drawing routine.

#[cfg(feature = "vulkan")]
use vulkanalia::{Device, vk};

use crate::error::Result;

/// External routine that issues the actual drawing commands.
///
/// Runs on the render thread. The surface is only valid for the duration of
/// the call and must not be retained.
pub trait DrawRoutine: Send {
    fn draw(&mut self, surface: &mut DrawableSurface<'_>) -> Result<()>;
}

impl<F> DrawRoutine for F
where
    F: FnMut(&mut DrawableSurface<'_>) -> Result<()> + Send,
{
    fn draw(&mut self, surface: &mut DrawableSurface<'_>) -> Result<()> {
        self(surface)
    }
}

/// One frame's render target.
pub enum DrawableSurface<'a> {
    #[cfg(feature = "opengl")]
    Gl(GlSurface<'a>),
    #[cfg(feature = "vulkan")]
    Vulkan(VulkanSurface<'a>),
}

impl DrawableSurface<'_> {
    pub fn width(&self) -> u32 {
        match *self {
            #[cfg(feature = "opengl")]
            Self::Gl(ref gl) => gl.width,
            #[cfg(feature = "vulkan")]
            Self::Vulkan(ref vk) => vk.extent.width,
        }
    }

    pub fn height(&self) -> u32 {
        match *self {
            #[cfg(feature = "opengl")]
            Self::Gl(ref gl) => gl.height,
            #[cfg(feature = "vulkan")]
            Self::Vulkan(ref vk) => vk.extent.height,
        }
    }
}

/// Default framebuffer of the current GL context.
#[cfg(feature = "opengl")]
pub struct GlSurface<'a> {
    pub gl: &'a glow::Context,
    /// `None` is framebuffer zero.
    pub framebuffer: Option<glow::NativeFramebuffer>,
    pub width: u32,
    pub height: u32,
}

/// One acquired swapchain image, already in `COLOR_ATTACHMENT_OPTIMAL`.
///
/// `command_buffer` is recording; it is ended, submitted and waited on by the
/// swapchain manager once the routine returns. `render_pass` clears on load and
/// keeps the image in `COLOR_ATTACHMENT_OPTIMAL`.
#[cfg(feature = "vulkan")]
pub struct VulkanSurface<'a> {
    pub device: &'a Device,
    pub command_buffer: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub image_index: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}
