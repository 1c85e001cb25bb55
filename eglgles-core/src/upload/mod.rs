//! The three ways a buffer reaches the configured textures.

pub mod cuda;
pub mod image;
pub mod raw;

use crate::backend::SampleRegion;
use std::time::Instant;

/// The buffer whose contents currently sit in the textures.
#[derive(Debug)]
pub struct UploadedFrame {
    pub buffer: gst::Buffer,
    /// NVMM surface still mapped to an EGLImage, unmapped after the next draw.
    pub surface_mapped: bool,
    pub region: SampleRegion,
    pub uploaded_at: Instant,
}

/// Texture row order as reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipY,
}

impl Orientation {
    pub fn apply(&self, region: SampleRegion) -> SampleRegion {
        match self {
            Orientation::Normal => region,
            Orientation::FlipY => SampleRegion {
                y: region.y + region.height,
                height: -region.height,
                ..region
            },
        }
    }
}

/// Normalized crop from `GstVideoCropMeta`, full frame without one.
pub fn crop_region(buffer: &gst::BufferRef, width: u32, height: u32) -> SampleRegion {
    let Some(crop) = buffer.meta::<gst_video::VideoCropMeta>() else {
        return SampleRegion::default();
    };
    let (x, y, w, h) = crop.rect();
    if width == 0 || height == 0 || w == 0 || h == 0 {
        return SampleRegion::default();
    }
    let (width, height) = (width as f32, height as f32);
    SampleRegion {
        x: x as f32 / width,
        y: y as f32 / height,
        width: (w as f32 / width).min(1.0),
        height: (h as f32 / height).min(1.0),
    }
}
