use std::ffi::{CString, c_char};

use log::{debug, info, warn};
use smallvec::SmallVec;
use vulkanalia::loader::{LIBRARY, LibloadingLoader};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{self, EntryV1_1, KhrSurfaceExtension, KhrSwapchainExtension};

use super::debug as validation;
use super::layout::barrier_masks;
use super::select::{self, DeviceCandidate, QueueFamilies};
use super::surface::SurfacePlatform;
use super::swapchain::{Acquired, Presented, SwapchainDevice, SwapchainImages};
use super::target::RenderTargetCache;
use crate::config::RendererConfig;
use crate::core::renderer::api::NativeHandle;
use crate::core::renderer::surface::{DrawRoutine, DrawableSurface, VulkanSurface};
use crate::error::{RenderError, Result, VkResultExt};

// Provisional extension; listed by portability drivers such as MoltenVK.
const PORTABILITY_SUBSET: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_KHR_portability_subset");

/// Instance, surface, logical device and queues for one native window.
///
/// Everything is optional so a partially opened device can be torn down with
/// the same [`destroy`](SwapchainDevice::destroy) path as a complete one.
pub struct VulkanDevice<P: SurfacePlatform> {
    platform: P,
    entry: Option<Entry>,
    instance: Option<Instance>,
    messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface: Option<vk::SurfaceKHR>,
    physical_device: Option<vk::PhysicalDevice>,
    families: Option<QueueFamilies>,
    device: Option<Device>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: Option<vk::CommandPool>,
    acquire_fence: Option<vk::Fence>,
    targets: RenderTargetCache,
}

// SAFETY: all handles are owned exclusively by this value and only used from
// the thread that currently owns it; Vulkan objects are not thread-affine.
unsafe impl<P: SurfacePlatform> Send for VulkanDevice<P> {}

impl<P: SurfacePlatform> VulkanDevice<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            entry: None,
            instance: None,
            messenger: None,
            surface: None,
            physical_device: None,
            families: None,
            device: None,
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            command_pool: None,
            acquire_fence: None,
            targets: RenderTargetCache::default(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Load Vulkan and build everything up to the command pool.
    ///
    /// On error the objects created so far stay in place; call
    /// [`destroy`](SwapchainDevice::destroy) to release them.
    pub fn open(&mut self, handle: &NativeHandle, config: &RendererConfig) -> Result<()> {
        // SAFETY: loading the system Vulkan loader.
        let loader = unsafe { LibloadingLoader::new(LIBRARY) }
            .map_err(|err| RenderError::Loader(err.to_string()))?;
        // SAFETY: the loader exports the Vulkan entry points.
        let entry = unsafe { Entry::new(loader) }
            .map_err(|err| RenderError::Loader(err.to_string()))?;

        let validation = config.validation && validation::has_validation_layer(&entry);
        if config.validation && !validation {
            warn!("validation requested but {} is not installed", validation::VALIDATION_LAYER);
        }

        let mut extensions = self.platform.instance_extensions(handle)?;
        if validation {
            extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name);
        }
        let extension_ptrs: SmallVec<[*const c_char; 8]> =
            extensions.iter().map(|e| e.as_ptr()).collect();

        let mut layers: SmallVec<[*const c_char; 1]> = SmallVec::new();
        if validation {
            layers.push(validation::VALIDATION_LAYER.as_ptr());
            info!("validation layer enabled");
        }

        let app_name = CString::new(config.application_name.as_str()).map_err(|_| {
            RenderError::ContextCreationFailed("application name contains a NUL byte".into())
        })?;
        // SAFETY: plain query against a loaded entry.
        let api_version = unsafe { entry.enumerate_instance_version() }
            .unwrap_or(vk::make_version(1, 0, 0));
        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name.as_bytes_with_nul())
            .engine_name(app_name.as_bytes_with_nul())
            .api_version(api_version);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layers);

        // Also chained into instance creation so creation itself is validated.
        let mut debug_info = validation::messenger_info();
        if validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        // SAFETY: every pointer in `create_info` borrows a local alive for this call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .into_render_error("create instance")?;
        self.entry = Some(entry);
        let instance = self.instance.insert(instance);
        info!("Vulkan instance ready ({})", self.platform.name());

        if validation {
            self.messenger = Some(validation::create_messenger(instance, &debug_info)?);
        }

        let surface = self.platform.create_surface(instance, handle)?;
        self.surface = Some(surface);

        let (physical_device, families) = pick_physical_device(instance, surface)?;
        self.physical_device = Some(physical_device);
        self.families = Some(families);

        let device = create_logical_device(
            instance,
            physical_device,
            families,
            &self.platform.device_extensions(),
        )?;
        let device = self.device.insert(device);

        // SAFETY: both families were requested with one queue each.
        unsafe {
            self.graphics_queue = device.get_device_queue(families.graphics, 0);
            self.present_queue = device.get_device_queue(families.present, 0);
        }

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(families.graphics);
        // SAFETY: the device is live.
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .into_render_error("create command pool")?;
        self.command_pool = Some(pool);

        // SAFETY: the device is live.
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) }
            .into_render_error("create acquire fence")?;
        self.acquire_fence = Some(fence);

        Ok(())
    }

    fn live(&self) -> Result<(&Instance, &Device, vk::SurfaceKHR, vk::PhysicalDevice)> {
        match (&self.instance, &self.device, self.surface, self.physical_device) {
            (Some(instance), Some(device), Some(surface), Some(physical)) => {
                Ok((instance, device, surface, physical))
            }
            _ => Err(RenderError::NotInitialized),
        }
    }

    fn device_and_pool(&self) -> Result<(&Device, vk::CommandPool)> {
        match (&self.device, self.command_pool) {
            (Some(device), Some(pool)) => Ok((device, pool)),
            _ => Err(RenderError::NotInitialized),
        }
    }
}

impl<P: SurfacePlatform> SwapchainDevice for VulkanDevice<P> {
    fn create_swapchain(&mut self, desired: vk::Extent2D) -> Result<SwapchainImages> {
        let (instance, device, surface, physical) = self.live()?;
        let families = self.families.ok_or(RenderError::NotInitialized)?;

        // SAFETY: queries against live handles.
        let (caps, formats, modes) = unsafe {
            (
                instance
                    .get_physical_device_surface_capabilities_khr(physical, surface)
                    .into_render_error("query surface capabilities")?,
                instance
                    .get_physical_device_surface_formats_khr(physical, surface)
                    .into_render_error("query surface formats")?,
                instance
                    .get_physical_device_surface_present_modes_khr(physical, surface)
                    .into_render_error("query present modes")?,
            )
        };

        let format = select::choose_surface_format(&formats).ok_or(RenderError::NoSuitableDevice)?;
        let extent = select::choose_extent(&caps, desired);

        if extent.width == 0 || extent.height == 0 {
            debug!("surface has a zero extent; swapchain deferred until it has a size");
            return Ok(SwapchainImages {
                handle: vk::SwapchainKHR::null(),
                images: SmallVec::new(),
                views: SmallVec::new(),
                format: format.format,
                extent,
            });
        }

        let indices = families.unique();
        let mut info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(select::choose_image_count(&caps))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(families.sharing_mode())
            .pre_transform(caps.current_transform)
            .composite_alpha(select::choose_composite_alpha(caps.supported_composite_alpha))
            .present_mode(select::choose_present_mode(&modes))
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        if families.sharing_mode() == vk::SharingMode::CONCURRENT {
            info = info.queue_family_indices(&indices);
        }

        // SAFETY: the surface is live and not bound to another swapchain.
        let handle = unsafe { device.create_swapchain_khr(&info, None) }
            .into_render_error("create swapchain")?;

        let mut chain = SwapchainImages {
            handle,
            images: SmallVec::new(),
            views: SmallVec::new(),
            format: format.format,
            extent,
        };

        // SAFETY: `handle` was just created on this device.
        match unsafe { device.get_swapchain_images_khr(handle) } {
            Ok(images) => chain.images.extend_from_slice(&images),
            Err(code) => {
                destroy_chain(device, &chain);
                return Err(RenderError::Vk { code, context: "get swapchain images" });
            }
        }

        for &image in &chain.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(color_range());

            // SAFETY: `image` belongs to the swapchain above.
            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => chain.views.push(view),
                Err(code) => {
                    destroy_chain(device, &chain);
                    return Err(RenderError::Vk { code, context: "create image view" });
                }
            }
        }

        Ok(chain)
    }

    fn destroy_swapchain(&mut self, chain: &SwapchainImages) {
        if let Some(device) = &self.device {
            destroy_chain(device, chain);
        }
    }

    fn acquire_next_image(&mut self, chain: &SwapchainImages) -> Result<Acquired> {
        let (device, fence) = match (&self.device, self.acquire_fence) {
            (Some(device), Some(fence)) => (device, fence),
            _ => return Err(RenderError::NotInitialized),
        };

        // SAFETY: the fence is unsignalled; it is reset after every successful acquire.
        let acquired = unsafe {
            device.acquire_next_image_khr(chain.handle, u64::MAX, vk::Semaphore::null(), fence)
        };

        match acquired {
            Ok((index, _)) => {
                // SAFETY: the fence was submitted by the acquire above.
                unsafe {
                    device
                        .wait_for_fences(&[fence], true, u64::MAX)
                        .into_render_error("wait for acquire fence")?;
                    device
                        .reset_fences(&[fence])
                        .into_render_error("reset acquire fence")?;
                }
                Ok(Acquired::Image(index))
            }
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(code) => Err(RenderError::Vk { code, context: "acquire next image" }),
        }
    }

    fn transition_image(
        &mut self,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) -> Result<()> {
        let (device, pool) = self.device_and_pool()?;
        let masks = barrier_masks(from, to);

        let command_buffer = begin_one_time(device, pool)?;
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_range())
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        // SAFETY: `command_buffer` is recording.
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[] as &[vk::MemoryBarrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[barrier],
            );
        }

        finish_one_time(device, pool, self.graphics_queue, command_buffer)
    }

    fn draw(
        &mut self,
        chain: &SwapchainImages,
        index: u32,
        routine: &mut dyn DrawRoutine,
    ) -> Result<()> {
        let (Some(device), Some(pool)) = (&self.device, self.command_pool) else {
            return Err(RenderError::NotInitialized);
        };
        let slot = index as usize;
        let (Some(&image), Some(&image_view)) = (chain.images.get(slot), chain.views.get(slot))
        else {
            return Err(RenderError::SurfaceOutOfDate);
        };

        let (render_pass, framebuffer) = self.targets.bind(device, chain, index)?;
        let command_buffer = begin_one_time(device, pool)?;

        let mut surface = DrawableSurface::Vulkan(VulkanSurface {
            device,
            command_buffer,
            render_pass,
            framebuffer,
            image,
            image_view,
            image_index: index,
            format: chain.format,
            extent: chain.extent,
        });

        match routine.draw(&mut surface) {
            Ok(()) => finish_one_time(device, pool, self.graphics_queue, command_buffer),
            Err(err) => {
                // SAFETY: the buffer was never submitted.
                unsafe { device.free_command_buffers(pool, &[command_buffer]) };
                Err(err)
            }
        }
    }

    fn present(&mut self, chain: &SwapchainImages, index: u32) -> Result<Presented> {
        let device = self.device.as_ref().ok_or(RenderError::NotInitialized)?;

        let swapchains = [chain.handle];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&indices);

        // SAFETY: the image was transitioned to PRESENT_SRC_KHR and all its work has completed.
        let presented = unsafe { device.queue_present_khr(self.present_queue, &info) };
        let status = match presented {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) => Presented::Stale,
            Ok(_) => Presented::Done,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Presented::Stale,
            Err(code) => return Err(RenderError::Vk { code, context: "queue present" }),
        };

        // SAFETY: the present queue belongs to this device.
        unsafe { device.queue_wait_idle(self.present_queue) }
            .into_render_error("wait for present queue")?;
        Ok(status)
    }

    fn wait_idle(&mut self) -> Result<()> {
        match &self.device {
            // SAFETY: the device is live.
            Some(device) => unsafe { device.device_wait_idle() }.into_render_error("device wait idle"),
            None => Ok(()),
        }
    }

    fn release_drawable(&mut self) {
        if let Some(device) = &self.device {
            self.targets.release(device);
        }
    }

    fn destroy(&mut self) {
        // SAFETY: the swapchain is gone and the device idle; each handle is
        // taken out of its slot before it is destroyed.
        unsafe {
            if let Some(device) = &self.device {
                self.targets.destroy(device);
                if let Some(pool) = self.command_pool.take() {
                    device.destroy_command_pool(pool, None);
                }
                if let Some(fence) = self.acquire_fence.take() {
                    device.destroy_fence(fence, None);
                }
            }
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }

            if let Some(instance) = &self.instance {
                if let Some(surface) = self.surface.take() {
                    self.platform.destroy_surface(instance, surface);
                }
                if let Some(messenger) = self.messenger.take() {
                    validation::destroy_messenger(instance, messenger);
                }
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
                info!("Vulkan instance destroyed");
            }
        }

        self.entry = None;
        self.physical_device = None;
        self.families = None;
        self.graphics_queue = vk::Queue::null();
        self.present_queue = vk::Queue::null();
    }
}

impl<P: SurfacePlatform> Drop for VulkanDevice<P> {
    fn drop(&mut self) {
        if self.device.is_some() || self.instance.is_some() {
            warn!("VulkanDevice dropped without shutdown; releasing now");
            self.destroy();
        }
    }
}

fn destroy_chain(device: &Device, chain: &SwapchainImages) {
    // SAFETY: callers wait for the device before releasing the swapchain.
    unsafe {
        for &view in &chain.views {
            device.destroy_image_view(view, None);
        }
        if !chain.handle.is_null() {
            device.destroy_swapchain_khr(chain.handle, None);
        }
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}

fn begin_one_time(device: &Device, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
    let alloc = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    // SAFETY: the pool belongs to `device`.
    let command_buffer = unsafe { device.allocate_command_buffers(&alloc) }
        .into_render_error("allocate command buffer")?[0];

    let begin = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    // SAFETY: freshly allocated, not recording.
    if let Err(code) = unsafe { device.begin_command_buffer(command_buffer, &begin) } {
        // SAFETY: never submitted.
        unsafe { device.free_command_buffers(pool, &[command_buffer]) };
        return Err(RenderError::Vk { code, context: "begin command buffer" });
    }
    Ok(command_buffer)
}

/// End, submit, wait for `queue` to go idle and free the buffer.
fn finish_one_time(
    device: &Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    let command_buffers = [command_buffer];
    // SAFETY: `command_buffer` is recording and is freed only after the queue is idle.
    let result = unsafe {
        device
            .end_command_buffer(command_buffer)
            .into_render_error("end command buffer")
            .and_then(|()| {
                let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                device
                    .queue_submit(queue, &[submit], vk::Fence::null())
                    .into_render_error("queue submit")
            })
            .and_then(|()| device.queue_wait_idle(queue).into_render_error("queue wait idle"))
    };
    // SAFETY: either never submitted or the queue is idle.
    unsafe { device.free_command_buffers(pool, &command_buffers) };
    result
}

/// Collect what selection needs for one physical device.
fn describe(
    instance: &Instance,
    physical: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<DeviceCandidate> {
    // SAFETY: queries against live handles.
    unsafe {
        let families = instance.get_physical_device_queue_family_properties(physical);
        let (graphics_family, present_family) = select::find_queue_families(&families, |index| {
            instance
                .get_physical_device_surface_support_khr(physical, index, surface)
                .into_render_error("query present support")
        })?;

        let extensions = instance
            .enumerate_device_extension_properties(physical, None)
            .into_render_error("enumerate device extensions")?
            .iter()
            .map(|e| e.extension_name)
            .collect();

        let surface_format_count = instance
            .get_physical_device_surface_formats_khr(physical, surface)
            .into_render_error("query surface formats")?
            .len();
        let present_mode_count = instance
            .get_physical_device_surface_present_modes_khr(physical, surface)
            .into_render_error("query present modes")?
            .len();

        Ok(DeviceCandidate {
            graphics_family,
            present_family,
            extensions,
            surface_format_count,
            present_mode_count,
        })
    }
}

fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    // SAFETY: the instance is live.
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .into_render_error("enumerate physical devices")?;

    let candidates = physical_devices.into_iter().filter_map(|physical| {
        match describe(instance, physical, surface) {
            Ok(candidate) => Some((physical, candidate)),
            Err(err) => {
                warn!("skipping physical device {physical:?}: {err}");
                None
            }
        }
    });

    let (physical, families) = select::select_device(candidates, &[vk::KHR_SWAPCHAIN_EXTENSION.name])?;
    // SAFETY: `physical` came from this instance.
    let properties = unsafe { instance.get_physical_device_properties(physical) };
    info!(
        "selected GPU {} (graphics family {}, present family {})",
        properties.device_name, families.graphics, families.present
    );
    Ok((physical, families))
}

fn create_logical_device(
    instance: &Instance,
    physical: vk::PhysicalDevice,
    families: QueueFamilies,
    platform_extensions: &[vk::ExtensionName],
) -> Result<Device> {
    let priorities = [1.0_f32];
    let queue_infos: SmallVec<[vk::DeviceQueueCreateInfo; 2]> = families
        .unique()
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&priorities)
                .build()
        })
        .collect();

    // SAFETY: `physical` came from this instance.
    let has_portability_subset = unsafe {
        instance.enumerate_device_extension_properties(physical, None)
    }
    .into_render_error("enumerate device extensions")?
    .iter()
    .any(|e| e.extension_name == PORTABILITY_SUBSET);

    let mut extensions: SmallVec<[*const c_char; 4]> = SmallVec::new();
    extensions.push(vk::KHR_SWAPCHAIN_EXTENSION.name.as_ptr());
    extensions.extend(platform_extensions.iter().map(|e| e.as_ptr()));
    if has_portability_subset {
        extensions.push(PORTABILITY_SUBSET.as_ptr());
        info!("VK_KHR_portability_subset enabled");
    }

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions);

    // SAFETY: every pointer in `info` borrows a local alive for this call.
    unsafe { instance.create_device(physical, &info, None) }.into_render_error("create logical device")
}
