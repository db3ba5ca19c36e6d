//! Pure selection policies for devices and swapchain parameters.

use smallvec::SmallVec;
use vulkanalia::vk;

use crate::error::{RenderError, Result};

/// Queue families a device exposes for the target surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> SmallVec<[u32; 2]> {
        let mut families = SmallVec::new();
        families.push(self.graphics);
        if self.present != self.graphics {
            families.push(self.present);
        }
        families
    }

    /// Concurrent sharing naming both families when they differ.
    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.graphics == self.present {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        }
    }
}

/// What device selection needs to know about one physical device.
#[derive(Debug, Clone, Default)]
pub struct DeviceCandidate {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub extensions: Vec<vk::ExtensionName>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    pub fn queue_families(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics_family?,
            present: self.present_family?,
        })
    }

    pub fn supports_extensions(&self, required: &[vk::ExtensionName]) -> bool {
        required.iter().all(|name| self.extensions.contains(name))
    }

    pub fn is_suitable(&self, required: &[vk::ExtensionName]) -> bool {
        self.queue_families().is_some()
            && self.supports_extensions(required)
            && self.surface_format_count > 0
            && self.present_mode_count > 0
    }
}

/// First suitable device in enumeration order; no scoring.
pub fn select_device<T>(
    candidates: impl IntoIterator<Item = (T, DeviceCandidate)>,
    required: &[vk::ExtensionName],
) -> Result<(T, QueueFamilies)> {
    candidates
        .into_iter()
        .find_map(|(device, candidate)| {
            if candidate.is_suitable(required) {
                candidate.queue_families().map(|families| (device, families))
            } else {
                None
            }
        })
        .ok_or(RenderError::NoSuitableDevice)
}

/// Scan queue families, stopping at the first index where both a graphics and
/// a presenting family have been seen.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> Result<bool>,
) -> Result<(Option<u32>, Option<u32>)> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if supports_present(index)? {
            present = Some(index);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Ok((graphics, present))
}

/// 8-bit BGRA with sRGB-nonlinear colour space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            matches!(f.format, vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox, then FIFO, then immediate.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::IMMEDIATE)
}

/// The surface's current extent wins unless it reports the `u32::MAX` sentinel,
/// in which case the desired size (minimum where zero) is clamped into range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let min = caps.min_image_extent;
    let max = caps.max_image_extent;
    let width = if desired.width != 0 { desired.width } else { min.width };
    let height = if desired.height != 0 { desired.height } else { min.height };

    vk::Extent2D {
        width: width.clamp(min.width, max.width.max(min.width)),
        height: height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|flag| supported.contains(*flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swapchain_ext() -> vk::ExtensionName {
        vk::KHR_SWAPCHAIN_EXTENSION.name
    }

    fn capable(graphics: u32, present: u32) -> DeviceCandidate {
        DeviceCandidate {
            graphics_family: Some(graphics),
            present_family: Some(present),
            extensions: vec![swapchain_ext()],
            surface_format_count: 1,
            present_mode_count: 1,
        }
    }

    #[test]
    fn first_qualifying_device_wins() {
        let no_present = DeviceCandidate {
            present_family: None,
            ..capable(0, 0)
        };
        let no_swapchain = DeviceCandidate {
            extensions: vec![],
            ..capable(0, 0)
        };
        let no_modes = DeviceCandidate {
            present_mode_count: 0,
            ..capable(0, 0)
        };
        let devices = vec![
            ("igpu", no_present),
            ("remote", no_swapchain),
            ("headless", no_modes),
            ("dgpu", capable(0, 1)),
            ("spare", capable(0, 0)),
        ];

        for _ in 0..3 {
            let (picked, families) = select_device(devices.clone(), &[swapchain_ext()]).unwrap();
            assert_eq!(picked, "dgpu");
            assert_eq!(families, QueueFamilies { graphics: 0, present: 1 });
        }
    }

    #[test]
    fn no_qualifying_device_is_an_error() {
        let devices = vec![("cpu", DeviceCandidate::default())];
        assert!(matches!(
            select_device(devices, &[swapchain_ext()]),
            Err(RenderError::NoSuitableDevice)
        ));
    }

    #[test]
    fn queue_scan_stops_once_both_roles_are_found() {
        let family = |flags| vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        };
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];

        let found = find_queue_families(&families, |index| Ok(index >= 1)).unwrap();
        assert_eq!(found, (Some(1), Some(1)));

        let none = find_queue_families(&families, |_| Ok(false)).unwrap();
        assert_eq!(none, (Some(2), None));
    }

    #[test]
    fn sharing_mode_follows_family_split() {
        let same = QueueFamilies { graphics: 2, present: 2 };
        let split = QueueFamilies { graphics: 0, present: 3 };
        assert_eq!(same.sharing_mode(), vk::SharingMode::EXCLUSIVE);
        assert_eq!(same.unique().as_slice(), &[2]);
        assert_eq!(split.sharing_mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(split.unique().as_slice(), &[0, 3]);
    }

    #[test]
    fn surface_format_prefers_bgra_srgb_nonlinear() {
        let rgba = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let bgra = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[rgba, bgra]), Some(bgra));
        assert_eq!(choose_surface_format(&[rgba]), Some(rgba));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_priority() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO]), M::FIFO);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE]), M::IMMEDIATE);
    }

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    #[test]
    fn surface_extent_overrides_desired_size() {
        let extent = choose_extent(&caps((640, 480)), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn sentinel_extent_clamps_desired_size() {
        let caps = caps((u32::MAX, u32::MAX));
        let big = choose_extent(&caps, vk::Extent2D { width: 9000, height: 8 });
        assert_eq!(big, vk::Extent2D { width: 4096, height: 16 });
        let unset = choose_extent(&caps, vk::Extent2D { width: 0, height: 0 });
        assert_eq!(unset, vk::Extent2D { width: 16, height: 16 });
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&caps((1, 1))), 3);
        let capped = vk::SurfaceCapabilitiesKHR { max_image_count: 2, ..caps((1, 1)) };
        assert_eq!(choose_image_count(&capped), 2);
        let unbounded = vk::SurfaceCapabilitiesKHR { max_image_count: 0, ..caps((1, 1)) };
        assert_eq!(choose_image_count(&unbounded), 3);
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        use vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(choose_composite_alpha(A::OPAQUE | A::INHERIT), A::OPAQUE);
        assert_eq!(choose_composite_alpha(A::POST_MULTIPLIED), A::POST_MULTIPLIED);
        assert_eq!(choose_composite_alpha(A::empty()), A::INHERIT);
    }
}
