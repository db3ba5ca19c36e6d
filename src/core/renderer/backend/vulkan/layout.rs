use smallvec::SmallVec;
use vulkanalia::vk;

/// Last recorded layout of every swapchain image, indexed by image index.
#[derive(Debug, Clone, Default)]
pub struct LayoutTracker {
    layouts: SmallVec<[vk::ImageLayout; 4]>,
}

impl LayoutTracker {
    /// Every image starts out `UNDEFINED`.
    pub fn new(image_count: usize) -> Self {
        Self {
            layouts: SmallVec::from_elem(vk::ImageLayout::UNDEFINED, image_count),
        }
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn get(&self, index: u32) -> vk::ImageLayout {
        self.layouts
            .get(index as usize)
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    pub fn set(&mut self, index: u32, layout: vk::ImageLayout) {
        if let Some(slot) = self.layouts.get_mut(index as usize) {
            *slot = layout;
        }
    }
}

/// Stage and access masks for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

pub fn barrier_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> BarrierMasks {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

    let (src_stage, dst_stage, src_access, dst_access) = match (old, new) {
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::empty(),
            A::COLOR_ATTACHMENT_WRITE,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            S::BOTTOM_OF_PIPE,
            A::COLOR_ATTACHMENT_WRITE,
            A::MEMORY_READ,
        ),
        (L::PRESENT_SRC_KHR, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::BOTTOM_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::MEMORY_READ,
            A::COLOR_ATTACHMENT_WRITE,
        ),
        _ => (S::TOP_OF_PIPE, S::BOTTOM_OF_PIPE, A::empty(), A::empty()),
    };

    BarrierMasks {
        src_stage,
        dst_stage,
        src_access,
        dst_access,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_start_undefined() {
        let tracker = LayoutTracker::new(3);
        assert_eq!(tracker.len(), 3);
        assert!((0..3).all(|i| tracker.get(i) == vk::ImageLayout::UNDEFINED));
    }

    #[test]
    fn out_of_range_indices_are_ignored() {
        let mut tracker = LayoutTracker::new(2);
        tracker.set(5, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(tracker.get(5), vk::ImageLayout::UNDEFINED);
        tracker.set(1, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(tracker.get(1), vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn present_barrier_waits_on_color_writes() {
        let masks = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(masks.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn first_use_has_no_source_access() {
        let masks = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert!(masks.src_access.is_empty());
    }
}
