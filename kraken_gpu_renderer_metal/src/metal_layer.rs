//! MetalSurface - CAMetalLayer acquisition and drawable hand-out
//!
//! The windowing layer passes a raw window handle; this module attaches a
//! CAMetalLayer to it and vends drawables for presentation. Swapchain
//! backpressure itself lives in the portable core's `PresentationPacer`;
//! the layer only limits its own drawable pool.

use core_graphics_types::geometry::CGSize;
use metal::foreign_types::ForeignType;
use objc::runtime::{Object, YES};
use objc::{msg_send, sel, sel_impl};
use raw_window_handle::{HasWindowHandle, RawWindowHandle};

use kraken_gpu::device::TextureDesc;
use kraken_gpu::error::{Error, Result};
use kraken_gpu::texture::{PixelFormat, TextureKind};

use crate::metal_device::{pixel_format_to_metal, MetalDevice};
use crate::metal_texture::MetalTexture;

/// Presentation surface: a CAMetalLayer bound to an NSView
pub struct MetalSurface {
    layer: metal::MetalLayer,
    format: PixelFormat,
}

// CAMetalLayer is thread-safe for drawable acquisition.
unsafe impl Send for MetalSurface {}
unsafe impl Sync for MetalSurface {}

impl MetalSurface {
    /// Attach a layer to the window behind `handle`.
    ///
    /// Only AppKit windows are supported; the layer is installed on the
    /// content view and made the view's backing layer.
    pub fn new(
        device: &MetalDevice,
        handle: &dyn HasWindowHandle,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let raw = handle
            .window_handle()
            .map_err(|err| Error::InitializationFailed(format!("window handle: {}", err)))?
            .as_raw();
        let RawWindowHandle::AppKit(appkit) = raw else {
            return Err(Error::InitializationFailed(
                "Metal surface requires an AppKit window".to_string(),
            ));
        };

        let layer = metal::MetalLayer::new();
        layer.set_device(&device.device);
        layer.set_pixel_format(pixel_format_to_metal(format));
        layer.set_presents_with_transaction(false);
        layer.set_framebuffer_only(false);
        layer.set_drawable_size(CGSize::new(width as f64, height as f64));

        unsafe {
            let view = appkit.ns_view.as_ptr() as *mut Object;
            let () = msg_send![view, setWantsLayer: YES];
            let layer_ptr = layer.as_ptr() as *mut Object;
            let () = msg_send![view, setLayer: layer_ptr];
        }

        Ok(Self { layer, format })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Resize the drawable pool (window resize)
    pub fn set_size(&self, width: u32, height: u32) {
        self.layer
            .set_drawable_size(CGSize::new(width as f64, height as f64));
    }

    /// Next presentable drawable, or `None` when the pool is exhausted
    pub(crate) fn next_drawable(&self) -> Option<metal::MetalDrawable> {
        self.layer.next_drawable().map(|d| d.to_owned())
    }

    /// Wrap the current drawable's texture so the core can attach it as a
    /// framebuffer color target
    pub fn drawable_texture(&self) -> Result<MetalTexture> {
        let drawable = self
            .layer
            .next_drawable()
            .ok_or_else(|| Error::BackendError("swapchain returned no drawable".to_string()))?;
        let texture = drawable.texture().to_owned();
        let desc = TextureDesc {
            label: "swapchain_backbuffer".to_string(),
            kind: TextureKind::D2,
            format: self.format,
            width: texture.width() as u32,
            height: texture.height() as u32,
            depth_or_layers: 1,
            mip_count: 1,
        };
        Ok(MetalTexture::wrap(texture, desc))
    }
}
