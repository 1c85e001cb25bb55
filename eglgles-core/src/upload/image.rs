use super::Orientation;
use crate::backend::{Backend, GlExtensions, GlesApi, ImagePlane, TextureId};
use crate::error::RenderError;
use crate::format::TextureTarget;
use crate::nvbufsurface::Surface;

/// Maps surface 0 of an NVMM buffer and binds it to the external texture.
///
/// The surface stays mapped on success; the caller unmaps it with [`release_surface`] once the
/// frame has been drawn.
pub fn import_surface(
    backend: &mut Backend,
    extensions: &GlExtensions,
    texture: TextureId,
    buffer: &gst::BufferRef,
) -> Result<(), RenderError> {
    let surface = Surface::from_buffer(buffer)?;
    let bind = extensions.image_target()?;
    let image = backend.surfaces()?.map_egl_image(&surface)?;

    let bound = if image.is_null() {
        Err(RenderError::Unavailable("EGLImage of mapped surface"))
    } else {
        backend
            .gl
            .bind_image(0, TextureTarget::ExternalOes, texture, image, bind)
    };
    if let Err(err) = bound {
        if let Err(unmap) = backend.surfaces()?.unmap_egl_image(&surface) {
            tracing::warn!("Failed to unmap surface after {err}: {unmap}");
        }
        return Err(err);
    }

    Ok(())
}

pub fn release_surface(backend: &mut Backend, buffer: &gst::BufferRef) -> Result<(), RenderError> {
    let surface = Surface::from_buffer(buffer)?;
    backend.surfaces()?.unmap_egl_image(&surface)
}

/// Binds the per-plane EGLImages of a pool buffer to `textures`.
pub fn bind_pool_images(
    gl: &mut dyn GlesApi,
    extensions: &GlExtensions,
    textures: &[TextureId],
    planes: &[ImagePlane],
) -> Result<(), RenderError> {
    if planes.len() != textures.len() {
        return Err(RenderError::UnsupportedFormat(format!(
            "{} EGLImage planes for {} textures",
            planes.len(),
            textures.len()
        )));
    }
    let bind = extensions.image_target()?;
    for (unit, (plane, texture)) in planes.iter().zip(textures).enumerate() {
        gl.bind_image(unit, TextureTarget::Texture2d, *texture, plane.image, bind)?;
    }
    Ok(())
}

/// Whether `buffer` carries a `GstVideoGLTextureUploadMeta`.
pub fn has_upload_meta(buffer: &gst::BufferRef) -> bool {
    !upload_meta(buffer).is_null()
}

fn upload_meta(buffer: &gst::BufferRef) -> *mut gst_video::ffi::GstVideoGLTextureUploadMeta {
    unsafe {
        gst::ffi::gst_buffer_get_meta(
            buffer.as_ptr() as *mut gst::ffi::GstBuffer,
            gst_video::ffi::gst_video_gl_texture_upload_meta_api_get_type(),
        ) as *mut gst_video::ffi::GstVideoGLTextureUploadMeta
    }
}

/// Lets the producer's upload callback fill `textures`.
pub fn upload_with_meta(
    gl: &mut dyn GlesApi,
    textures: &[TextureId],
    buffer: &gst::BufferRef,
) -> Result<Orientation, RenderError> {
    let meta = upload_meta(buffer);
    if meta.is_null() {
        return Err(RenderError::Unavailable("GstVideoGLTextureUploadMeta"));
    }

    let (n_textures, orientation) = unsafe { ((*meta).n_textures, (*meta).texture_orientation) };
    if n_textures as usize != textures.len() {
        return Err(RenderError::UnsupportedFormat(format!(
            "upload meta provides {n_textures} textures, {} configured",
            textures.len()
        )));
    }
    if textures.len() > 3 {
        return Err(RenderError::UnsupportedFormat(format!(
            "{} textures exceed what the upload meta can fill",
            textures.len()
        )));
    }
    let orientation = match orientation {
        gst_video::ffi::GST_VIDEO_GL_TEXTURE_ORIENTATION_X_NORMAL_Y_NORMAL => Orientation::Normal,
        gst_video::ffi::GST_VIDEO_GL_TEXTURE_ORIENTATION_X_NORMAL_Y_FLIP => Orientation::FlipY,
        other => {
            return Err(RenderError::UnsupportedFormat(format!(
                "texture orientation {other}"
            )));
        }
    };

    let target = TextureTarget::Texture2d;
    gl.bind_textures(target, textures);
    let mut ids = [0u32; 4];
    ids[..textures.len()].copy_from_slice(textures);
    let uploaded =
        unsafe { gst_video::ffi::gst_video_gl_texture_upload_meta_upload(meta, ids.as_mut_ptr()) };
    if uploaded == gst::glib::ffi::GFALSE {
        return Err(RenderError::Gl {
            call: "gst_video_gl_texture_upload_meta_upload",
            code: 0,
        });
    }

    Ok(orientation)
}

/// Adds `GstVideoGLTextureUploadMeta` to an allocation query's metas.
pub fn propose_upload_meta(query: &mut gst::query::Allocation) {
    unsafe {
        gst::ffi::gst_query_add_allocation_meta(
            query.as_mut_ptr(),
            gst_video::ffi::gst_video_gl_texture_upload_meta_api_get_type(),
            std::ptr::null(),
        );
    }
}
