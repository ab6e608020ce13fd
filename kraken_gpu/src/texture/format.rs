/// Pixel formats and texture kinds shared between the portable core and the
/// device backends.

/// Pixel format of a texture or render-target attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum PixelFormat {
    // Color formats
    R8_UNORM,
    RG8_UNORM,
    RGBA8_UNORM,
    RGBA8_SRGB,
    BGRA8_UNORM,
    BGRA8_SRGB,
    R16_FLOAT,
    RG16_FLOAT,
    RGBA16_FLOAT,
    R32_FLOAT,
    RG32_FLOAT,
    RGBA32_FLOAT,
    R32_UINT,
    RGBA32_UINT,

    // Depth/stencil formats
    DEPTH16_UNORM,
    DEPTH32_FLOAT,
    DEPTH24_UNORM_STENCIL8,
    DEPTH32_FLOAT_STENCIL8,
}

impl PixelFormat {
    /// Whether this format stores color data in the sRGB transfer function
    pub fn is_srgb(&self) -> bool {
        matches!(self, PixelFormat::RGBA8_SRGB | PixelFormat::BGRA8_SRGB)
    }

    /// The linear (UNORM) twin of an sRGB format, used when an sRGB
    /// attachment is bound with sRGB rendering disabled. Non-sRGB formats
    /// return themselves.
    pub fn unorm_variant(&self) -> PixelFormat {
        match self {
            PixelFormat::RGBA8_SRGB => PixelFormat::RGBA8_UNORM,
            PixelFormat::BGRA8_SRGB => PixelFormat::BGRA8_UNORM,
            other => *other,
        }
    }

    /// Whether this format contains a depth plane
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            PixelFormat::DEPTH16_UNORM
                | PixelFormat::DEPTH32_FLOAT
                | PixelFormat::DEPTH24_UNORM_STENCIL8
                | PixelFormat::DEPTH32_FLOAT_STENCIL8
        )
    }

    /// Whether this format contains a stencil plane
    pub fn is_stencil(&self) -> bool {
        matches!(
            self,
            PixelFormat::DEPTH24_UNORM_STENCIL8 | PixelFormat::DEPTH32_FLOAT_STENCIL8
        )
    }

    /// Whether this format stores unnormalized integer data
    pub fn is_integer(&self) -> bool {
        matches!(self, PixelFormat::R32_UINT | PixelFormat::RGBA32_UINT)
    }

    /// Whether the format can participate in fixed-function blending.
    /// Integer and depth/stencil formats cannot; requesting blending on
    /// them is silently dropped at PSO bake time.
    pub fn supports_blending(&self) -> bool {
        !self.is_integer() && !self.is_depth()
    }

    /// Size in bytes of one texel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::R8_UNORM => 1,
            PixelFormat::RG8_UNORM => 2,
            PixelFormat::RGBA8_UNORM
            | PixelFormat::RGBA8_SRGB
            | PixelFormat::BGRA8_UNORM
            | PixelFormat::BGRA8_SRGB => 4,
            PixelFormat::R16_FLOAT => 2,
            PixelFormat::RG16_FLOAT => 4,
            PixelFormat::RGBA16_FLOAT => 8,
            PixelFormat::R32_FLOAT => 4,
            PixelFormat::RG32_FLOAT => 8,
            PixelFormat::RGBA32_FLOAT => 16,
            PixelFormat::R32_UINT => 4,
            PixelFormat::RGBA32_UINT => 16,
            PixelFormat::DEPTH16_UNORM => 2,
            PixelFormat::DEPTH32_FLOAT => 4,
            PixelFormat::DEPTH24_UNORM_STENCIL8 => 4,
            PixelFormat::DEPTH32_FLOAT_STENCIL8 => 8,
        }
    }
}

/// Texture dimensionality
///
/// Drives how an attachment `layer` argument is interpreted: array kinds use
/// it as an array slice, 3D uses it as a depth plane, and `-1` selects
/// all-layers multilayered rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D1,
    D1Array,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
    Buffer,
}

impl TextureKind {
    /// Whether the kind carries array layers addressed by slice index
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            TextureKind::D1Array | TextureKind::D2Array | TextureKind::Cube | TextureKind::CubeArray
        )
    }
}

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
