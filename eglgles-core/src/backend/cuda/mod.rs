use super::{
    Copy2d, CopyDestination, CopySource, CudaApi, CudaArray, CudaContextHandle, GraphicsResource,
    TextureId,
};
use crate::error::CudaError;
use ffi::{
    cuda_call, CudaFunctions, CUarray, CUcontext, CUdevice, CUgraphicsResource, CUDA_MEMCPY2D,
    CU_GRAPHICS_REGISTER_FLAGS_WRITE_DISCARD, CU_MEMORYTYPE_ARRAY, CU_MEMORYTYPE_DEVICE,
    CU_MEMORYTYPE_HOST, GL_TEXTURE_2D,
};
use std::ffi::c_void;
use std::ptr;

mod ffi;

/// CUDA driver API, loaded from `libcuda` at runtime.
pub struct CudaDriver {
    functions: CudaFunctions,
}

impl CudaDriver {
    pub fn load() -> Result<Self, String> {
        let functions = CudaFunctions::load()?;
        cuda_call!("cuInit", (functions.init)(0)).map_err(|e| e.to_string())?;
        Ok(CudaDriver { functions })
    }
}

impl CudaApi for CudaDriver {
    fn create_context(&mut self, device: u32) -> Result<CudaContextHandle, CudaError> {
        let mut dev: CUdevice = 0;
        cuda_call!(
            "cuDeviceGet",
            (self.functions.device_get)(&mut dev, device as i32)
        )?;
        let mut context: CUcontext = ptr::null_mut();
        cuda_call!(
            "cuCtxCreate",
            (self.functions.ctx_create)(&mut context, 0, dev)
        )?;
        Ok(CudaContextHandle(context as usize))
    }

    fn destroy_context(&mut self, context: CudaContextHandle) -> Result<(), CudaError> {
        cuda_call!(
            "cuCtxDestroy",
            (self.functions.ctx_destroy)(context.0 as CUcontext)
        )
    }

    fn set_current(&mut self, context: CudaContextHandle) -> Result<(), CudaError> {
        cuda_call!(
            "cuCtxSetCurrent",
            (self.functions.ctx_set_current)(context.0 as CUcontext)
        )
    }

    fn register_texture(&mut self, texture: TextureId) -> Result<GraphicsResource, CudaError> {
        let mut resource: CUgraphicsResource = ptr::null_mut();
        cuda_call!(
            "cuGraphicsGLRegisterImage",
            (self.functions.register_image)(
                &mut resource,
                texture,
                GL_TEXTURE_2D,
                CU_GRAPHICS_REGISTER_FLAGS_WRITE_DISCARD,
            )
        )?;
        Ok(GraphicsResource(resource as usize))
    }

    fn unregister(&mut self, resource: GraphicsResource) -> Result<(), CudaError> {
        cuda_call!(
            "cuGraphicsUnregisterResource",
            (self.functions.unregister_resource)(resource.0 as CUgraphicsResource)
        )
    }

    fn map(&mut self, resource: GraphicsResource) -> Result<(), CudaError> {
        let mut raw = resource.0 as CUgraphicsResource;
        cuda_call!(
            "cuGraphicsMapResources",
            (self.functions.map_resources)(1, &mut raw, ptr::null_mut())
        )
    }

    fn unmap(&mut self, resource: GraphicsResource) -> Result<(), CudaError> {
        let mut raw = resource.0 as CUgraphicsResource;
        cuda_call!(
            "cuGraphicsUnmapResources",
            (self.functions.unmap_resources)(1, &mut raw, ptr::null_mut())
        )
    }

    fn mapped_array(&mut self, resource: GraphicsResource) -> Result<CudaArray, CudaError> {
        let mut array: CUarray = ptr::null_mut();
        cuda_call!(
            "cuGraphicsSubResourceGetMappedArray",
            (self.functions.mapped_array)(&mut array, resource.0 as CUgraphicsResource, 0, 0)
        )?;
        Ok(CudaArray(array as usize))
    }

    fn copy_2d(&mut self, copy: &Copy2d) -> Result<(), CudaError> {
        let mut params = CUDA_MEMCPY2D {
            WidthInBytes: copy.width_bytes,
            Height: copy.height,
            ..Default::default()
        };
        match copy.src {
            CopySource::Host { ptr, pitch } => {
                params.srcMemoryType = CU_MEMORYTYPE_HOST;
                params.srcHost = ptr as *const c_void;
                params.srcPitch = pitch;
            }
            CopySource::Device { ptr, pitch } => {
                params.srcMemoryType = CU_MEMORYTYPE_DEVICE;
                params.srcDevice = ptr as u64;
                params.srcPitch = pitch;
            }
        }
        match copy.dst {
            CopyDestination::Array(array) => {
                params.dstMemoryType = CU_MEMORYTYPE_ARRAY;
                params.dstArray = array.0 as CUarray;
            }
            CopyDestination::Host { ptr, pitch } => {
                params.dstMemoryType = CU_MEMORYTYPE_HOST;
                params.dstHost = ptr as *mut c_void;
                params.dstPitch = pitch;
            }
        }
        cuda_call!("cuMemcpy2D", (self.functions.memcpy_2d)(&params))
    }
}
