use crate::error::RenderError;
use gst_video::VideoFormat;

pub const NVMM_FEATURE: &str = "memory:NVMM";
pub const EGL_IMAGE_FEATURE: &str = "memory:EGLImage";
pub const GL_TEXTURE_UPLOAD_FEATURE: &str = "meta:GstVideoGLTextureUploadMeta";

/// Formats uploadable from system memory.
pub const RAW_FORMATS: &[VideoFormat] = &[
    VideoFormat::Rgba,
    VideoFormat::Bgra,
    VideoFormat::Argb,
    VideoFormat::Abgr,
    VideoFormat::Rgbx,
    VideoFormat::Bgrx,
    VideoFormat::Xrgb,
    VideoFormat::Xbgr,
    VideoFormat::Ayuv,
    VideoFormat::Y444,
    VideoFormat::I420,
    VideoFormat::Yv12,
    VideoFormat::Nv12,
    VideoFormat::Nv21,
    VideoFormat::Y42b,
    VideoFormat::Y41b,
    VideoFormat::Rgb,
    VideoFormat::Bgr,
    VideoFormat::Rgb16,
];

/// Formats the CUDA interop path knows how to copy.
pub const NVMM_FORMATS: &[VideoFormat] = &[
    VideoFormat::Rgba,
    VideoFormat::Bgrx,
    VideoFormat::Rgb,
    VideoFormat::Bgr,
    VideoFormat::I420,
    VideoFormat::Nv12,
];

/// Formats the pool can back with EGLImages.
pub const EGL_IMAGE_FORMATS: &[VideoFormat] = &[
    VideoFormat::Rgba,
    VideoFormat::Bgra,
    VideoFormat::Argb,
    VideoFormat::Abgr,
    VideoFormat::Rgbx,
    VideoFormat::Bgrx,
    VideoFormat::Xrgb,
    VideoFormat::Xbgr,
    VideoFormat::Rgb,
    VideoFormat::Bgr,
    VideoFormat::Rgb16,
    VideoFormat::Ayuv,
    VideoFormat::I420,
    VideoFormat::Yv12,
    VideoFormat::Y444,
    VideoFormat::Y42b,
    VideoFormat::Y41b,
    VideoFormat::Nv12,
    VideoFormat::Nv21,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Jetson: NVMM surfaces are imported as EGLImages.
    Tegra,
    /// Discrete GPU: NVMM surfaces are CUDA memory copied through interop.
    Desktop,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(feature = "tegra") {
            Platform::Tegra
        } else {
            Platform::Desktop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Raw,
    EglImage,
    Platform,
}

impl MemoryKind {
    pub fn from_caps(caps: &gst::CapsRef) -> Self {
        match caps.features(0) {
            Some(features) if features.contains(NVMM_FEATURE) => MemoryKind::Platform,
            Some(features) if features.contains(EGL_IMAGE_FEATURE) => MemoryKind::EglImage,
            _ => MemoryKind::Raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    RawCopy,
    ZeroCopyImport,
    CudaInterop,
}

impl UploadStrategy {
    pub fn select(memory: MemoryKind, platform: Platform) -> Self {
        match (memory, platform) {
            (MemoryKind::Raw, _) => UploadStrategy::RawCopy,
            (MemoryKind::EglImage, _) => UploadStrategy::ZeroCopyImport,
            (MemoryKind::Platform, Platform::Tegra) => UploadStrategy::ZeroCopyImport,
            (MemoryKind::Platform, Platform::Desktop) => UploadStrategy::CudaInterop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTarget {
    Texture2d,
    ExternalOes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Luminance,
    LuminanceAlpha,
    Rgb,
    Rgba,
    Rgb565,
}

impl ChannelLayout {
    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            ChannelLayout::Luminance => 1,
            ChannelLayout::LuminanceAlpha | ChannelLayout::Rgb565 => 2,
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgba => 4,
        }
    }
}

/// Output swizzle applied to packed RGB formats whose byte order isn't RGB(A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swizzle {
    Bgr,
    Gba,
    Abg,
}

impl Swizzle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Swizzle::Bgr => "bgr",
            Swizzle::Gba => "gba",
            Swizzle::Abg => "abg",
        }
    }
}

/// Shader program selection. Two formats sharing a layout share textures and program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramLayout {
    Copy,
    Reorder(Swizzle),
    Ayuv,
    PlanarYuv,
    SemiPlanar { swap_uv: bool },
    External,
}

impl ProgramLayout {
    pub fn for_format(format: VideoFormat) -> Result<Self, RenderError> {
        Ok(match format {
            VideoFormat::Rgba | VideoFormat::Rgbx | VideoFormat::Rgb | VideoFormat::Rgb16 => {
                ProgramLayout::Copy
            }
            VideoFormat::Bgra | VideoFormat::Bgrx | VideoFormat::Bgr => {
                ProgramLayout::Reorder(Swizzle::Bgr)
            }
            VideoFormat::Argb | VideoFormat::Xrgb => ProgramLayout::Reorder(Swizzle::Gba),
            VideoFormat::Abgr | VideoFormat::Xbgr => ProgramLayout::Reorder(Swizzle::Abg),
            VideoFormat::Ayuv => ProgramLayout::Ayuv,
            VideoFormat::Y444
            | VideoFormat::I420
            | VideoFormat::Yv12
            | VideoFormat::Y42b
            | VideoFormat::Y41b => ProgramLayout::PlanarYuv,
            VideoFormat::Nv12 => ProgramLayout::SemiPlanar { swap_uv: false },
            VideoFormat::Nv21 => ProgramLayout::SemiPlanar { swap_uv: true },
            other => return Err(RenderError::UnsupportedFormat(other.to_string())),
        })
    }

    pub fn sampler_names(&self) -> &'static [&'static str] {
        match self {
            ProgramLayout::PlanarYuv => &["Ytex", "Utex", "Vtex"],
            ProgramLayout::SemiPlanar { .. } => &["Ytex", "UVtex"],
            _ => &["tex"],
        }
    }

    pub fn texture_count(&self) -> usize {
        self.sampler_names().len()
    }

    pub fn target(&self) -> TextureTarget {
        match self {
            ProgramLayout::External => TextureTarget::ExternalOes,
            _ => TextureTarget::Texture2d,
        }
    }
}

/// One texture worth of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneSpec {
    pub channels: ChannelLayout,
    pub width: u32,
    pub height: u32,
    /// Source plane in the video frame. YV12 stores V before U, textures are always Y, U, V.
    pub plane: u32,
}

impl PlaneSpec {
    pub fn natural_stride(&self) -> u32 {
        self.width * self.channels.bytes_per_texel()
    }
}

pub fn plane_specs(info: &gst_video::VideoInfo) -> Result<Vec<PlaneSpec>, RenderError> {
    let (width, height) = (info.width(), info.height());
    let packed = |channels| {
        vec![PlaneSpec {
            channels,
            width,
            height,
            plane: 0,
        }]
    };

    Ok(match info.format() {
        VideoFormat::Rgba
        | VideoFormat::Bgra
        | VideoFormat::Argb
        | VideoFormat::Abgr
        | VideoFormat::Rgbx
        | VideoFormat::Bgrx
        | VideoFormat::Xrgb
        | VideoFormat::Xbgr
        | VideoFormat::Ayuv => packed(ChannelLayout::Rgba),
        VideoFormat::Rgb | VideoFormat::Bgr => packed(ChannelLayout::Rgb),
        VideoFormat::Rgb16 => packed(ChannelLayout::Rgb565),
        VideoFormat::Y444
        | VideoFormat::I420
        | VideoFormat::Yv12
        | VideoFormat::Y42b
        | VideoFormat::Y41b => (0..3u8)
            .map(|c| PlaneSpec {
                channels: ChannelLayout::Luminance,
                width: info.comp_width(c),
                height: info.comp_height(c),
                plane: info.format_info().plane()[c as usize],
            })
            .collect(),
        VideoFormat::Nv12 | VideoFormat::Nv21 => vec![
            PlaneSpec {
                channels: ChannelLayout::Luminance,
                width: info.comp_width(0),
                height: info.comp_height(0),
                plane: 0,
            },
            PlaneSpec {
                channels: ChannelLayout::LuminanceAlpha,
                width: info.comp_width(1),
                height: info.comp_height(1),
                plane: 1,
            },
        ],
        other => return Err(RenderError::UnsupportedFormat(other.to_string())),
    })
}

/// Everything the render thread derives from a caps event.
#[derive(Debug, Clone)]
pub struct NegotiatedFormat {
    pub info: gst_video::VideoInfo,
    pub memory: MemoryKind,
    pub strategy: UploadStrategy,
    /// Sampling goes through `samplerExternalOES`.
    pub external_target: bool,
    pub program: ProgramLayout,
    pub planes: Vec<PlaneSpec>,
    /// Row length in texels over visible width, per plane. Filled by the CPU upload.
    pub stride_scale: [f32; 4],
}

impl NegotiatedFormat {
    pub fn from_caps(caps: &gst::CapsRef, platform: Platform) -> Result<Self, RenderError> {
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|err| RenderError::Negotiation(format!("unparseable caps {caps}: {err}")))?;
        let memory = MemoryKind::from_caps(caps);
        let strategy = UploadStrategy::select(memory, platform);
        let external_target = memory == MemoryKind::Platform && strategy == UploadStrategy::ZeroCopyImport;

        if strategy == UploadStrategy::CudaInterop && !NVMM_FORMATS.contains(&info.format()) {
            return Err(RenderError::Negotiation(format!(
                "{} is not copyable from CUDA memory",
                info.format()
            )));
        }

        let program = if external_target {
            ProgramLayout::External
        } else {
            ProgramLayout::for_format(info.format())
                .map_err(|err| RenderError::Negotiation(err.to_string()))?
        };
        let planes =
            plane_specs(&info).map_err(|err| RenderError::Negotiation(err.to_string()))?;

        Ok(NegotiatedFormat {
            info,
            memory,
            strategy,
            external_target,
            program,
            planes,
            stride_scale: [1.0; 4],
        })
    }

    pub fn width(&self) -> u32 {
        self.info.width()
    }

    pub fn height(&self) -> u32 {
        self.info.height()
    }

    /// Frame size once the pixel aspect ratio is applied. Never shrinks either side.
    pub fn display_size(&self) -> (u32, u32) {
        let (width, height) = (self.width(), self.height());
        let par = self.info.par();
        let (numer, denom) = (par.numer(), par.denom());
        if numer <= 0 || denom <= 0 || numer == denom {
            return (width, height);
        }
        let scale = |side: u32, by: i32, over: i32| {
            u32::try_from(side as u64 * by as u64 / over as u64).unwrap_or(u32::MAX)
        };
        if numer > denom {
            (scale(width, numer, denom), height)
        } else {
            (width, scale(height, denom, numer))
        }
    }
}

/// Caps that intersect once framerate is ignored describe the same GPU setup.
pub fn caps_compatible(configured: &gst::Caps, new: &gst::Caps) -> bool {
    let without_framerate = |caps: &gst::Caps| {
        let mut caps = caps.clone();
        for s in caps.make_mut().iter_mut() {
            s.remove_field("framerate");
        }
        caps
    };

    without_framerate(configured).can_intersect(&without_framerate(new))
}
