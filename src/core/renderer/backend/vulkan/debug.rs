//! Validation-layer plumbing: messages are forwarded into `log`.

use std::ffi::CStr;

use log::{debug, error, info, warn};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{self, ExtDebugUtilsExtension};

use crate::error::{Result, VkResultExt};

pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

pub fn has_validation_layer(entry: &Entry) -> bool {
    // SAFETY: plain query against a loaded entry.
    match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers.iter().any(|l| l.layer_name == VALIDATION_LAYER),
        Err(err) => {
            warn!("could not enumerate instance layers: {err:?}");
            false
        }
    }
}

unsafe extern "system" fn debug_callback(
    sev: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _ud: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the driver passes a valid callback payload with a NUL-terminated message.
    let message = unsafe { CStr::from_ptr((*data).message).to_string_lossy() };

    if sev.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[{ty:?}] {message}");
    } else if sev.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[{ty:?}] {message}");
    } else if sev.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("[{ty:?}] {message}");
    } else {
        debug!("[{ty:?}] {message}");
    }
    vk::FALSE
}

pub fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .user_callback(Some(debug_callback))
}

pub fn create_messenger(
    instance: &Instance,
    info: &vk::DebugUtilsMessengerCreateInfoEXT,
) -> Result<vk::DebugUtilsMessengerEXT> {
    // SAFETY: `instance` was created with the debug-utils extension enabled.
    unsafe { instance.create_debug_utils_messenger_ext(info, None) }
        .into_render_error("create debug messenger")
}

pub fn destroy_messenger(instance: &Instance, messenger: vk::DebugUtilsMessengerEXT) {
    // SAFETY: the messenger was created from this instance and is destroyed once.
    unsafe { instance.destroy_debug_utils_messenger_ext(messenger, None) };
}
