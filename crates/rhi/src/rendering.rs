//! Dynamic rendering attachments.
//!
//! The composite pass renders straight into a swapchain image view with a
//! depth attachment, so no render pass or framebuffer objects exist.
//! [`RenderingTarget`] owns the attachment infos so the `vk::RenderingInfo`
//! handed to `cmd_begin_rendering` never outlives them.

use ash::vk;

/// Clear color of the composite target.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Clear depth of the composite target.
pub const CLEAR_DEPTH: f32 = 1.0;

/// Color and depth attachments cleared at the start of rendering.
pub struct RenderingTarget {
    color: [vk::RenderingAttachmentInfo<'static>; 1],
    depth: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingTarget {
    /// Clears `color_view` to [`CLEAR_COLOR`] and stores the result.
    pub fn new(color_view: vk::ImageView, extent: vk::Extent2D) -> Self {
        let color = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            });
        Self {
            color: [color],
            depth: None,
            render_area: vk::Rect2D::default().extent(extent),
        }
    }

    /// Adds a depth attachment cleared to [`CLEAR_DEPTH`] and discarded
    /// afterwards.
    pub fn with_depth(mut self, depth_view: vk::ImageView) -> Self {
        self.depth = Some(
            vk::RenderingAttachmentInfo::default()
                .image_view(depth_view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: CLEAR_DEPTH,
                        stencil: 0,
                    },
                }),
        );
        self
    }

    /// Rendering info borrowing this target.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color);
        if let Some(ref depth) = self.depth {
            info = info.depth_attachment(depth);
        }
        info
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_clears_color_and_depth() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let target = RenderingTarget::new(vk::ImageView::null(), extent)
            .with_depth(vk::ImageView::null());
        assert!(target.has_depth());
        assert_eq!(target.render_area().extent, extent);

        let info = target.info();
        assert_eq!(info.color_attachment_count, 1);
        assert_eq!(info.layer_count, 1);
        assert!(!info.p_depth_attachment.is_null());
        assert_eq!(target.color[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(
            target.color[0].image_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_target_without_depth() {
        let target = RenderingTarget::new(vk::ImageView::null(), vk::Extent2D::default());
        assert!(!target.has_depth());
        assert!(target.info().p_depth_attachment.is_null());
    }
}
