use log::{debug, error, info, warn};
use smallvec::SmallVec;
use vulkanalia::vk;

use super::layout::LayoutTracker;
use crate::core::renderer::surface::DrawRoutine;
use crate::error::{RenderError, Result};

/// A live swapchain and the per-image objects rebuilt with it.
#[derive(Debug, Clone)]
pub struct SwapchainImages {
    pub handle: vk::SwapchainKHR,
    pub images: SmallVec<[vk::Image; 4]>,
    pub views: SmallVec<[vk::ImageView; 4]>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image(u32),
    /// The surface changed underneath the swapchain.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Done,
    /// Out of date or suboptimal; the swapchain should be rebuilt.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The frame was dropped or presented late and the swapchain was rebuilt.
    Recreated,
    Skipped,
}

/// GPU operations the swapchain manager sequences.
///
/// Instance, device, queues and surface live behind this trait for the whole
/// lifetime of the manager; only the swapchain is created and destroyed
/// through it repeatedly.
pub trait SwapchainDevice {
    fn create_swapchain(&mut self, desired: vk::Extent2D) -> Result<SwapchainImages>;

    fn destroy_swapchain(&mut self, chain: &SwapchainImages);

    /// Blocks until an image is available.
    fn acquire_next_image(&mut self, chain: &SwapchainImages) -> Result<Acquired>;

    /// Record, submit and wait on one layout barrier.
    fn transition_image(
        &mut self,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) -> Result<()>;

    /// Bind image `index` as a drawable, run `routine`, submit its commands and
    /// wait for the graphics queue to go idle.
    fn draw(
        &mut self,
        chain: &SwapchainImages,
        index: u32,
        routine: &mut dyn DrawRoutine,
    ) -> Result<()>;

    /// Queue the image for presentation and wait for the present queue to go idle.
    fn present(&mut self, chain: &SwapchainImages, index: u32) -> Result<Presented>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Drop the cached drawable wrapper, if any.
    fn release_drawable(&mut self);

    /// Tear down everything except the swapchain, in dependency order.
    fn destroy(&mut self);
}

/// Keeps a presentable swapchain alive and runs the acquire/draw/present cycle.
pub struct SwapchainManager<D: SwapchainDevice> {
    device: D,
    chain: Option<SwapchainImages>,
    layouts: LayoutTracker,
    desired: vk::Extent2D,
    rebuilds: u64,
}

impl<D: SwapchainDevice> SwapchainManager<D> {
    pub fn new(mut device: D, desired: vk::Extent2D) -> Result<Self> {
        let chain = match device.create_swapchain(desired) {
            Ok(chain) => chain,
            Err(err) => {
                device.destroy();
                return Err(err);
            }
        };
        info!(
            "swapchain ready: {} images, {}x{}, {:?}",
            chain.images.len(),
            chain.extent.width,
            chain.extent.height,
            chain.format
        );

        Ok(Self {
            device,
            layouts: LayoutTracker::new(chain.images.len()),
            chain: Some(chain),
            desired,
            rebuilds: 0,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn swapchain(&self) -> Option<&SwapchainImages> {
        self.chain.as_ref()
    }

    pub fn layouts(&self) -> &LayoutTracker {
        &self.layouts
    }

    /// Number of rebuilds since creation.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Rebuild for a new desired size. A size the swapchain already has is a no-op.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let desired = vk::Extent2D { width, height };
        let unchanged = self.chain.as_ref().is_some_and(|c| c.extent == desired);
        self.desired = desired;
        if unchanged {
            return Ok(());
        }
        self.recreate()
    }

    /// Wait for the device, drop the swapchain and rebuild it at the desired size.
    pub fn recreate(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.release_swapchain();

        let chain = self.device.create_swapchain(self.desired)?;
        debug!(
            "swapchain rebuilt at {}x{} ({} images)",
            chain.extent.width,
            chain.extent.height,
            chain.images.len()
        );
        self.layouts = LayoutTracker::new(chain.images.len());
        self.chain = Some(chain);
        self.rebuilds += 1;
        Ok(())
    }

    pub fn render_frame(&mut self, routine: &mut dyn DrawRoutine) -> Result<FrameStatus> {
        let deferred = match self.chain.as_ref() {
            Some(chain) => is_deferred(chain),
            None => return Err(RenderError::NotInitialized),
        };
        // A deferred swapchain is retried every frame; the surface may regain
        // its size without the host reporting a new one.
        if deferred {
            self.recreate()?;
            return Ok(match self.chain.as_ref() {
                Some(chain) if !is_deferred(chain) => FrameStatus::Recreated,
                _ => FrameStatus::Skipped,
            });
        }
        let Some(chain) = self.chain.as_ref() else {
            return Err(RenderError::NotInitialized);
        };

        let acquired = match self.device.acquire_next_image(chain)? {
            Acquired::Image(index) => chain
                .images
                .get(index as usize)
                .map(|image| (index, *image)),
            Acquired::OutOfDate => None,
        };
        let Some((index, image)) = acquired else {
            warn!("{} while acquiring; rebuilding swapchain", RenderError::SurfaceOutOfDate);
            self.recreate()?;
            return Ok(FrameStatus::Recreated);
        };

        let previous = self.layouts.get(index);
        if previous != vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL {
            self.device
                .transition_image(image, previous, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
            self.layouts.set(index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }

        self.device.draw(chain, index, routine)?;

        self.device.transition_image(
            image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        self.layouts.set(index, vk::ImageLayout::PRESENT_SRC_KHR);

        match self.device.present(chain, index)? {
            Presented::Done => Ok(FrameStatus::Presented),
            Presented::Stale => {
                debug!("present reported a stale swapchain; rebuilding");
                self.recreate()?;
                Ok(FrameStatus::Recreated)
            }
        }
    }

    /// Best-effort teardown; every step runs even if waiting for idle fails.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            error!("device wait idle failed during teardown: {err}");
        }
        self.release_swapchain();
        self.device.destroy();
    }

    fn release_swapchain(&mut self) {
        self.device.release_drawable();
        if let Some(chain) = self.chain.take() {
            self.device.destroy_swapchain(&chain);
        }
        self.layouts = LayoutTracker::default();
    }
}

/// Built against a zero-sized surface; holds no images.
fn is_deferred(chain: &SwapchainImages) -> bool {
    chain.extent.width == 0 || chain.extent.height == 0
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use vulkanalia::vk::Handle;

    use super::*;
    use crate::core::renderer::surface::DrawableSurface;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create(vk::Extent2D),
        DestroySwapchain(vk::SwapchainKHR),
        Acquire,
        Transition(u32, vk::ImageLayout, vk::ImageLayout),
        Draw(u32),
        Present(u32),
        WaitIdle,
        ReleaseDrawable,
        Destroy,
    }

    /// Scripted stand-in for a GPU: images are numbered, acquisition is
    /// round-robin unless a scripted outcome is queued.
    struct FakeGpu {
        image_count: usize,
        next_raw: u64,
        next_image: u32,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<Presented>,
        fail_next_draw: bool,
        fail_wait_idle: bool,
        /// Upcoming builds that see a zero-sized surface.
        zero_extent_builds: usize,
        current_images: Vec<vk::Image>,
        calls: Vec<Call>,
    }

    impl FakeGpu {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                next_raw: 1,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_next_draw: false,
                fail_wait_idle: false,
                zero_extent_builds: 0,
                current_images: Vec::new(),
                calls: Vec::new(),
            }
        }

        fn raw(&mut self) -> u64 {
            self.next_raw += 1;
            self.next_raw
        }

        fn image_index(&self, image: vk::Image) -> u32 {
            self.current_images
                .iter()
                .position(|i| *i == image)
                .expect("image belongs to the live swapchain") as u32
        }

        fn transitions_into_color(&self) -> Vec<(u32, vk::ImageLayout)> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Transition(i, from, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => {
                        Some((*i, *from))
                    }
                    _ => None,
                })
                .collect()
        }
    }

    impl SwapchainDevice for FakeGpu {
        fn create_swapchain(&mut self, desired: vk::Extent2D) -> Result<SwapchainImages> {
            self.calls.push(Call::Create(desired));
            if self.zero_extent_builds > 0 {
                self.zero_extent_builds -= 1;
                self.current_images.clear();
                return Ok(SwapchainImages {
                    handle: vk::SwapchainKHR::null(),
                    images: SmallVec::new(),
                    views: SmallVec::new(),
                    format: vk::Format::B8G8R8A8_UNORM,
                    extent: vk::Extent2D { width: 0, height: 0 },
                });
            }
            let extent = if desired.width == 0 {
                vk::Extent2D { width: 640, height: 480 }
            } else {
                desired
            };
            let handle = vk::SwapchainKHR::from_raw(self.raw());
            let images: SmallVec<[vk::Image; 4]> =
                (0..self.image_count).map(|_| vk::Image::from_raw(self.raw())).collect();
            self.current_images = images.to_vec();
            let views = (0..self.image_count)
                .map(|_| vk::ImageView::from_raw(self.raw()))
                .collect();
            self.next_image = 0;
            Ok(SwapchainImages {
                handle,
                images,
                views,
                format: vk::Format::B8G8R8A8_UNORM,
                extent,
            })
        }

        fn destroy_swapchain(&mut self, chain: &SwapchainImages) {
            self.calls.push(Call::DestroySwapchain(chain.handle));
        }

        fn acquire_next_image(&mut self, _chain: &SwapchainImages) -> Result<Acquired> {
            self.calls.push(Call::Acquire);
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count.max(1) as u32;
            Ok(Acquired::Image(index))
        }

        fn transition_image(
            &mut self,
            image: vk::Image,
            from: vk::ImageLayout,
            to: vk::ImageLayout,
        ) -> Result<()> {
            let index = self.image_index(image);
            self.calls.push(Call::Transition(index, from, to));
            Ok(())
        }

        fn draw(
            &mut self,
            _chain: &SwapchainImages,
            index: u32,
            _routine: &mut dyn DrawRoutine,
        ) -> Result<()> {
            self.calls.push(Call::Draw(index));
            if std::mem::take(&mut self.fail_next_draw) {
                return Err(RenderError::Draw("scripted failure".into()));
            }
            Ok(())
        }

        fn present(&mut self, _chain: &SwapchainImages, index: u32) -> Result<Presented> {
            self.calls.push(Call::Present(index));
            Ok(self.present_script.pop_front().unwrap_or(Presented::Done))
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            if self.fail_wait_idle {
                return Err(RenderError::Vk {
                    code: vk::ErrorCode::DEVICE_LOST,
                    context: "wait idle",
                });
            }
            Ok(())
        }

        fn release_drawable(&mut self) {
            self.calls.push(Call::ReleaseDrawable);
        }

        fn destroy(&mut self) {
            self.calls.push(Call::Destroy);
        }
    }

    fn noop() -> impl FnMut(&mut DrawableSurface<'_>) -> Result<()> + Send {
        |_surface: &mut DrawableSurface<'_>| Ok(())
    }

    fn manager(images: usize) -> SwapchainManager<FakeGpu> {
        SwapchainManager::new(FakeGpu::new(images), vk::Extent2D { width: 800, height: 600 })
            .unwrap()
    }

    #[test]
    fn color_transitions_start_from_undefined_or_present_src() {
        let mut mgr = manager(3);
        let mut routine = noop();

        for _ in 0..9 {
            assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Presented);
        }

        let into_color = mgr.device().transitions_into_color();
        assert_eq!(into_color.len(), 9);
        for (n, (index, from)) in into_color.iter().enumerate() {
            let expected = if n < 3 {
                vk::ImageLayout::UNDEFINED
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            };
            assert_eq!(*from, expected, "frame {n} image {index}");
        }
        assert!((0..3).all(|i| mgr.layouts().get(i) == vk::ImageLayout::PRESENT_SRC_KHR));
    }

    #[test]
    fn stale_present_rebuilds_swapchain_but_keeps_device() {
        let mut mgr = manager(2);
        let mut routine = noop();
        let first = mgr.swapchain().unwrap().handle;
        mgr.device.present_script.push_back(Presented::Stale);

        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Recreated);
        let second = mgr.swapchain().unwrap().handle;
        assert_ne!(first, second);
        assert_eq!(mgr.rebuilds(), 1);
        assert!(mgr.device().calls.contains(&Call::DestroySwapchain(first)));
        assert!(!mgr.device().calls.contains(&Call::Destroy));

        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Presented);
        // Fresh images begin undefined again.
        let last = *mgr.device().transitions_into_color().last().unwrap();
        assert_eq!(last, (0, vk::ImageLayout::UNDEFINED));
    }

    #[test]
    fn out_of_date_acquire_abandons_the_frame() {
        let mut mgr = manager(2);
        let mut routine = noop();
        mgr.device.acquire_script.push_back(Acquired::OutOfDate);
        let before = mgr.device().calls.len();

        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Recreated);

        let frame_calls = &mgr.device().calls[before..];
        assert!(!frame_calls.iter().any(|c| matches!(c, Call::Draw(_) | Call::Present(_))));
        assert!(!frame_calls.iter().any(|c| matches!(c, Call::Transition(..))));
        assert_eq!(mgr.rebuilds(), 1);
    }

    #[test]
    fn zero_extent_swapchain_is_retried_until_the_surface_has_a_size() {
        let mut mgr = manager(2);
        let mut routine = noop();
        mgr.device.present_script.push_back(Presented::Stale);
        mgr.device.zero_extent_builds = 2;

        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Recreated);
        assert!(mgr.swapchain().unwrap().images.is_empty());

        // Still zero-sized: rebuilt again, nothing acquired from the empty swapchain.
        let before = mgr.device().calls.len();
        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Skipped);
        assert!(!mgr.device().calls[before..].contains(&Call::Acquire));
        assert!(
            mgr.device().calls[before..]
                .contains(&Call::Create(vk::Extent2D { width: 800, height: 600 }))
        );

        // Same desired size as before; no resize needed to recover.
        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Recreated);
        assert_eq!(
            mgr.swapchain().unwrap().extent,
            vk::Extent2D { width: 800, height: 600 }
        );
        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn acquired_index_outside_the_swapchain_rebuilds() {
        let mut mgr = manager(2);
        let mut routine = noop();
        mgr.device.acquire_script.push_back(Acquired::Image(7));

        assert_eq!(mgr.render_frame(&mut routine).unwrap(), FrameStatus::Recreated);
        assert_eq!(mgr.rebuilds(), 1);
        assert!(!mgr.device().calls.iter().any(|c| matches!(c, Call::Draw(_))));
    }

    #[test]
    fn redundant_color_transition_is_skipped() {
        let mut mgr = manager(1);
        let mut routine = noop();
        mgr.device.fail_next_draw = true;

        assert!(mgr.render_frame(&mut routine).is_err());
        assert_eq!(mgr.layouts().get(0), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        mgr.render_frame(&mut routine).unwrap();
        assert_eq!(mgr.device().transitions_into_color().len(), 1);
    }

    #[test]
    fn resize_to_current_extent_does_not_rebuild() {
        let mut mgr = manager(2);
        mgr.resize(800, 600).unwrap();
        assert_eq!(mgr.rebuilds(), 0);

        mgr.resize(1024, 768).unwrap();
        assert_eq!(mgr.rebuilds(), 1);
        assert_eq!(
            mgr.swapchain().unwrap().extent,
            vk::Extent2D { width: 1024, height: 768 }
        );
        assert_eq!(
            mgr.device().calls.last(),
            Some(&Call::Create(vk::Extent2D { width: 1024, height: 768 }))
        );
    }

    #[test]
    fn rebuild_waits_idle_and_releases_drawable_first() {
        let mut mgr = manager(2);
        let old = mgr.swapchain().unwrap().handle;
        let before = mgr.device().calls.len();
        mgr.recreate().unwrap();

        assert_eq!(
            &mgr.device().calls[before..before + 3],
            &[Call::WaitIdle, Call::ReleaseDrawable, Call::DestroySwapchain(old)]
        );
    }

    #[test]
    fn shutdown_continues_past_failed_idle_wait() {
        let mut mgr = manager(2);
        let chain = mgr.swapchain().unwrap().handle;
        mgr.device.fail_wait_idle = true;
        let before = mgr.device().calls.len();

        mgr.shutdown();

        assert_eq!(
            &mgr.device().calls[before..],
            &[
                Call::WaitIdle,
                Call::ReleaseDrawable,
                Call::DestroySwapchain(chain),
                Call::Destroy
            ]
        );
        assert!(mgr.swapchain().is_none());
    }
}
