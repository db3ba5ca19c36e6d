use crate::core::renderer::surface::GlSurface;

/// Size-dependent part of the GL render target. The function table lives in
/// the backend and outlives every rebuild of this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlRenderTarget {
    width: u32,
    height: u32,
}

impl GlRenderTarget {
    /// Record a new size. Returns `false` if nothing changed.
    pub fn update(&mut self, width: u32, height: u32) -> bool {
        if (self.width, self.height) == (width, height) {
            return false;
        }
        self.width = width;
        self.height = height;
        true
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Nothing to draw into until the host reports a size.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Framebuffer zero of the current context at the cached size.
    pub fn surface<'a>(&self, gl: &'a glow::Context) -> GlSurface<'a> {
        GlSurface {
            gl,
            framebuffer: None,
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let target = GlRenderTarget::default();
        assert!(target.is_empty());
        assert_eq!(target.size(), (0, 0));
    }

    #[test]
    fn update_reports_changes_only() {
        let mut target = GlRenderTarget::default();
        assert!(target.update(800, 600));
        assert!(!target.update(800, 600));
        assert!(target.update(800, 601));
        assert_eq!(target.size(), (800, 601));
        assert!(!target.is_empty());
    }
}
