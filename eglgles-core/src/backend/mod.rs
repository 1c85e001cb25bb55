//! GPU seam of the render thread.
//!
//! The render thread is the only caller of these traits. Handles are plain ids so the rest of
//! the crate never holds a GL/EGL/CUDA object directly.

use crate::error::{CudaError, RenderError};
use crate::format::{ChannelLayout, ProgramLayout, TextureTarget};
use crate::nvbufsurface::Surface;
use std::ffi::c_void;

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod egl;
#[cfg(any(feature = "tegra", feature = "cuda"))]
pub mod nvbuf;
mod shaders;

pub type TextureId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Raw `EGLImageKHR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EglImageHandle(pub usize);

impl EglImageHandle {
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0 as *const c_void
    }
}

pub type ImageTargetTexture2dFn = unsafe extern "C" fn(target: u32, image: *const c_void);

/// GL extension entry points, resolved once per context.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlExtensions {
    pub image_target_texture_2d: Option<ImageTargetTexture2dFn>,
}

impl GlExtensions {
    pub fn load<F>(mut get_proc_address: F) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        let ptr = get_proc_address("glEGLImageTargetTexture2DOES");
        GlExtensions {
            image_target_texture_2d: (!ptr.is_null()).then(|| unsafe {
                std::mem::transmute::<*const c_void, ImageTargetTexture2dFn>(ptr)
            }),
        }
    }

    pub fn image_target(&self) -> Result<ImageTargetTexture2dFn, RenderError> {
        self.image_target_texture_2d
            .ok_or(RenderError::Unavailable("glEGLImageTargetTexture2DOES"))
    }
}

/// One plane of pixel data to copy into a texture.
#[derive(Debug)]
pub struct PlaneUpload<'a> {
    pub channels: ChannelLayout,
    /// Texture width in texels, padding included.
    pub width: u32,
    pub height: u32,
    pub alignment: u32,
    pub data: &'a [u8],
}

/// Normalized sub-rectangle of the textures to sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for SampleRegion {
    fn default() -> Self {
        SampleRegion {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct DrawParams<'a> {
    pub program: ProgramId,
    pub layout: ProgramLayout,
    pub textures: &'a [TextureId],
    pub stride_scale: &'a [f32],
    pub region: SampleRegion,
    pub width: u32,
    pub height: u32,
}

/// A texture with an EGLImage created from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePlane {
    pub texture: TextureId,
    pub image: EglImageHandle,
}

pub trait GlesApi {
    /// `eglBindAPI(EGL_OPENGL_ES_API)` for the calling thread.
    fn bind_api(&mut self) -> Result<(), RenderError>;
    fn make_current(&mut self) -> Result<(), RenderError>;
    fn extensions(&self) -> GlExtensions;
    /// Raw `EGLDisplay`, for context queries.
    fn display_handle(&self) -> usize;

    fn create_textures(
        &mut self,
        count: usize,
        target: TextureTarget,
    ) -> Result<Vec<TextureId>, RenderError>;
    fn delete_textures(&mut self, textures: &[TextureId]);
    fn create_program(&mut self, layout: ProgramLayout) -> Result<ProgramId, RenderError>;
    fn delete_program(&mut self, program: ProgramId);

    /// Zero-filled storage, for textures written by CUDA.
    fn allocate_storage(
        &mut self,
        texture: TextureId,
        channels: ChannelLayout,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError>;
    fn upload_plane(
        &mut self,
        unit: usize,
        texture: TextureId,
        plane: &PlaneUpload<'_>,
    ) -> Result<(), RenderError>;
    fn bind_image(
        &mut self,
        unit: usize,
        target: TextureTarget,
        texture: TextureId,
        image: EglImageHandle,
        bind: ImageTargetTexture2dFn,
    ) -> Result<(), RenderError>;
    /// Binds `textures` to units 0.. for code that uploads through its own callbacks.
    fn bind_textures(&mut self, target: TextureTarget, textures: &[TextureId]);

    fn create_image_plane(
        &mut self,
        channels: ChannelLayout,
        width: u32,
        height: u32,
    ) -> Result<ImagePlane, RenderError>;
    fn destroy_image_plane(&mut self, plane: ImagePlane);

    /// Renders into the presentation target and returns its texture.
    fn draw(&mut self, params: &DrawParams<'_>) -> Result<TextureId, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CudaContextHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsResource(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CudaArray(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySource {
    Host { ptr: usize, pitch: usize },
    Device { ptr: usize, pitch: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDestination {
    Array(CudaArray),
    Host { ptr: usize, pitch: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Copy2d {
    pub src: CopySource,
    pub dst: CopyDestination,
    pub width_bytes: usize,
    pub height: usize,
}

pub trait CudaApi {
    fn create_context(&mut self, device: u32) -> Result<CudaContextHandle, CudaError>;
    fn destroy_context(&mut self, context: CudaContextHandle) -> Result<(), CudaError>;
    fn set_current(&mut self, context: CudaContextHandle) -> Result<(), CudaError>;
    fn register_texture(&mut self, texture: TextureId) -> Result<GraphicsResource, CudaError>;
    fn unregister(&mut self, resource: GraphicsResource) -> Result<(), CudaError>;
    fn map(&mut self, resource: GraphicsResource) -> Result<(), CudaError>;
    fn unmap(&mut self, resource: GraphicsResource) -> Result<(), CudaError>;
    fn mapped_array(&mut self, resource: GraphicsResource) -> Result<CudaArray, CudaError>;
    fn copy_2d(&mut self, copy: &Copy2d) -> Result<(), CudaError>;
}

pub trait SurfaceApi {
    /// Creates the EGLImage for surface 0 and returns it.
    ///
    /// The handle can be null while the surface is mapped; the caller still unmaps it.
    fn map_egl_image(&mut self, surface: &Surface<'_>) -> Result<EglImageHandle, RenderError>;
    fn unmap_egl_image(&mut self, surface: &Surface<'_>) -> Result<(), RenderError>;
}

/// Everything the render thread talks to. Built on the render thread itself.
pub struct Backend {
    pub gl: Box<dyn GlesApi>,
    pub cuda: Option<Box<dyn CudaApi>>,
    pub surfaces: Option<Box<dyn SurfaceApi>>,
}

impl Backend {
    pub fn cuda(&mut self) -> Result<&mut dyn CudaApi, RenderError> {
        match self.cuda.as_deref_mut() {
            Some(cuda) => Ok(cuda),
            None => Err(RenderError::Unavailable("CUDA driver")),
        }
    }

    pub fn surfaces(&mut self) -> Result<&mut dyn SurfaceApi, RenderError> {
        match self.surfaces.as_deref_mut() {
            Some(surfaces) => Ok(surfaces),
            None => Err(RenderError::Unavailable("NvBufSurface library")),
        }
    }
}

pub type BackendFactory = Box<dyn FnOnce() -> Result<Backend, RenderError> + Send>;
