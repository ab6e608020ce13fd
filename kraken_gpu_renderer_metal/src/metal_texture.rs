//! MetalTexture - Metal implementation of the RawTexture trait

use std::any::Any;

use metal::{MTLOrigin, MTLRegion, MTLSize, MTLStorageMode, MTLTextureUsage, TextureDescriptor};

use kraken_gpu::device::{RawTexture, Rect, TextureDesc};
use kraken_gpu::error::{Error, Result};
use kraken_gpu::texture::{PixelFormat, TextureKind};

use crate::metal_device::{pixel_format_to_metal, texture_kind_to_metal};

/// Metal texture plus the portable description it was created from
pub struct MetalTexture {
    texture: metal::Texture,
    desc: TextureDesc,
}

unsafe impl Send for MetalTexture {}
unsafe impl Sync for MetalTexture {}

impl MetalTexture {
    pub(crate) fn create(device: &metal::Device, desc: &TextureDesc) -> Result<MetalTexture> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "zero-sized texture '{}'",
                desc.label
            )));
        }
        let descriptor = TextureDescriptor::new();
        descriptor.set_texture_type(texture_kind_to_metal(desc.kind));
        descriptor.set_pixel_format(pixel_format_to_metal(desc.format));
        descriptor.set_width(desc.width as u64);
        descriptor.set_height(desc.height as u64);
        match desc.kind {
            TextureKind::D3 => descriptor.set_depth(desc.depth_or_layers as u64),
            TextureKind::D1Array | TextureKind::D2Array | TextureKind::CubeArray => {
                descriptor.set_array_length(desc.depth_or_layers as u64)
            }
            _ => {}
        }
        descriptor.set_mipmap_level_count(desc.mip_count.max(1) as u64);
        descriptor.set_usage(
            MTLTextureUsage::ShaderRead | MTLTextureUsage::RenderTarget | MTLTextureUsage::PixelFormatView,
        );
        // Shared storage keeps readback trivial on unified memory.
        descriptor.set_storage_mode(MTLStorageMode::Shared);

        let texture = device.new_texture(&descriptor);
        texture.set_label(&desc.label);
        Ok(MetalTexture {
            texture,
            desc: desc.clone(),
        })
    }

    /// Wrap an externally owned texture (drawable backbuffer)
    pub(crate) fn wrap(texture: metal::Texture, desc: TextureDesc) -> MetalTexture {
        MetalTexture { texture, desc }
    }

    pub(crate) fn raw(&self) -> &metal::Texture {
        &self.texture
    }

    fn region_of(area: Rect) -> MTLRegion {
        MTLRegion {
            origin: MTLOrigin {
                x: area.x as u64,
                y: area.y as u64,
                z: 0,
            },
            size: MTLSize {
                width: area.width as u64,
                height: area.height as u64,
                depth: 1,
            },
        }
    }
}

impl RawTexture for MetalTexture {
    fn kind(&self) -> TextureKind {
        self.desc.kind
    }

    fn format(&self) -> PixelFormat {
        self.desc.format
    }

    fn width(&self) -> u32 {
        self.desc.width
    }

    fn height(&self) -> u32 {
        self.desc.height
    }

    fn depth_or_layers(&self) -> u32 {
        self.desc.depth_or_layers
    }

    fn mip_count(&self) -> u32 {
        self.desc.mip_count
    }

    fn read_region(&self, mip: u32, slice: u32, area: Rect) -> Result<Vec<u8>> {
        let bytes_per_pixel = self.desc.format.bytes_per_pixel() as u64;
        let bytes_per_row = area.width as u64 * bytes_per_pixel;
        let bytes_per_image = bytes_per_row * area.height as u64;
        let mut out = vec![0u8; bytes_per_image as usize];
        self.texture.get_bytes_in_slice(
            out.as_mut_ptr() as *mut std::ffi::c_void,
            bytes_per_row,
            bytes_per_image,
            Self::region_of(area),
            mip as u64,
            slice as u64,
        );
        Ok(out)
    }

    fn write_region(&self, mip: u32, slice: u32, area: Rect, data: &[u8]) -> Result<()> {
        let bytes_per_pixel = self.desc.format.bytes_per_pixel() as u64;
        let bytes_per_row = area.width as u64 * bytes_per_pixel;
        let expected = (bytes_per_row * area.height as u64) as usize;
        if data.len() != expected {
            return Err(Error::InvalidResource(format!(
                "write_region data length {} != expected {}",
                data.len(),
                expected
            )));
        }
        self.texture.replace_region_in_slice(
            Self::region_of(area),
            mip as u64,
            slice as u64,
            data.as_ptr() as *const std::ffi::c_void,
            bytes_per_row,
            bytes_per_row * area.height as u64,
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
