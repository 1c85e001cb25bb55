use super::{EglImageHandle, SurfaceApi};
use crate::error::RenderError;
use crate::nvbufsurface::{NvBufSurface, Surface};
use libloading::{Library, Symbol};
use std::os::raw::c_int;

type MapEglImageFn = unsafe extern "C" fn(surface: *mut NvBufSurface, index: c_int) -> c_int;

/// `libnvbufsurface` entry points for mapping NVMM surfaces to EGLImages.
pub struct NvBufSurfaceLib {
    _lib: Library,
    map_egl_image: MapEglImageFn,
    unmap_egl_image: MapEglImageFn,
}

impl NvBufSurfaceLib {
    pub fn load() -> Result<Self, String> {
        unsafe {
            let lib = Library::new("libnvbufsurface.so.1.0.0")
                .or_else(|_| Library::new("libnvbufsurface.so"))
                .map_err(|e| format!("Failed to open NvBufSurface library: {}", e))?;

            let map: Symbol<MapEglImageFn> = lib
                .get(b"NvBufSurfaceMapEglImage\0")
                .map_err(|e| format!("Failed to load NvBufSurfaceMapEglImage: {}", e))?;
            let map_egl_image = *map;
            let unmap: Symbol<MapEglImageFn> = lib
                .get(b"NvBufSurfaceUnMapEglImage\0")
                .map_err(|e| format!("Failed to load NvBufSurfaceUnMapEglImage: {}", e))?;
            let unmap_egl_image = *unmap;

            Ok(NvBufSurfaceLib {
                _lib: lib,
                map_egl_image,
                unmap_egl_image,
            })
        }
    }
}

impl SurfaceApi for NvBufSurfaceLib {
    fn map_egl_image(&mut self, surface: &Surface<'_>) -> Result<EglImageHandle, RenderError> {
        let result = unsafe { (self.map_egl_image)(surface.as_ptr(), 0) };
        if result != 0 {
            return Err(RenderError::Gl {
                call: "NvBufSurfaceMapEglImage",
                code: result as u32,
            });
        }
        let image = match surface.params() {
            Ok(params) => params.mappedAddr.eglImage,
            Err(err) => {
                self.unmap_egl_image(surface)?;
                return Err(err);
            }
        };
        Ok(EglImageHandle(image as usize))
    }

    fn unmap_egl_image(&mut self, surface: &Surface<'_>) -> Result<(), RenderError> {
        let result = unsafe { (self.unmap_egl_image)(surface.as_ptr(), 0) };
        if result != 0 {
            return Err(RenderError::Gl {
                call: "NvBufSurfaceUnMapEglImage",
                code: result as u32,
            });
        }
        Ok(())
    }
}
