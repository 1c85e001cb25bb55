use gst_video::prelude::*;

use crate::backend::{GlesApi, PlaneUpload, TextureId};
use crate::error::RenderError;
use crate::format::NegotiatedFormat;

/// How a plane's rows map onto `GL_UNPACK_ALIGNMENT` and texture width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnpackLayout {
    pub alignment: u32,
    /// Texels per texture row; wider than the plane when the padding is sampled around.
    pub texture_width: u32,
    /// `texture_width / width`, divided out again by the fragment shader.
    pub scale: f32,
}

fn round_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

fn natural_alignment(bytes_per_texel: u32) -> u32 {
    [8, 4, 2, 1]
        .into_iter()
        .find(|a| bytes_per_texel % a == 0 && *a <= bytes_per_texel)
        .unwrap_or(1)
}

/// Derives the unpack layout for a plane of `width` texels stored with `stride` bytes per row.
pub fn unpack_layout(stride: i32, width: u32, bytes_per_texel: u32) -> Option<UnpackLayout> {
    if stride <= 0 || width == 0 {
        return None;
    }
    let stride = stride as u32;
    let row = width * bytes_per_texel;

    if stride == row {
        return Some(UnpackLayout {
            alignment: natural_alignment(bytes_per_texel),
            texture_width: width,
            scale: 1.0,
        });
    }
    if stride < row {
        return None;
    }

    for alignment in [8, 4, 2] {
        if round_up(row, alignment) != stride {
            continue;
        }
        return Some(if stride % bytes_per_texel == 0 {
            UnpackLayout {
                alignment,
                texture_width: stride / bytes_per_texel,
                scale: stride as f32 / row as f32,
            }
        } else {
            UnpackLayout {
                alignment,
                texture_width: width,
                scale: 1.0,
            }
        });
    }

    // Padding no alignment explains: upload the stride as the row and sample around it.
    if stride % bytes_per_texel == 0 {
        let texture_width = stride / bytes_per_texel;
        return Some(UnpackLayout {
            alignment: natural_alignment(bytes_per_texel),
            texture_width,
            scale: texture_width as f32 / width as f32,
        });
    }
    None
}

/// Copies every plane of `buffer` into `textures`.
pub fn fill(
    gl: &mut dyn GlesApi,
    textures: &[TextureId],
    format: &mut NegotiatedFormat,
    buffer: &gst::BufferRef,
) -> Result<(), RenderError> {
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &format.info)
        .map_err(|_| RenderError::Unavailable("readable video frame"))?;

    for (index, (spec, texture)) in format.planes.iter().zip(textures).enumerate() {
        let stride = frame.plane_stride()[spec.plane as usize];
        let layout = unpack_layout(stride, spec.width, spec.channels.bytes_per_texel()).ok_or(
            RenderError::UnsupportedStride {
                plane: index,
                stride,
                width: spec.width as i32,
            },
        )?;
        let data = frame
            .plane_data(spec.plane)
            .map_err(|_| RenderError::Unavailable("video plane data"))?;

        gl.upload_plane(
            index,
            *texture,
            &PlaneUpload {
                channels: spec.channels,
                width: layout.texture_width,
                height: spec.height,
                alignment: layout.alignment,
                data,
            },
        )?;
        format.stride_scale[index] = layout.scale;
    }

    Ok(())
}
