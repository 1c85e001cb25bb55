#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use libloading::{Library, Symbol};
use std::ffi::c_void;
use std::os::raw::{c_int, c_uint};

pub(crate) type CUresult = c_uint;
pub(crate) type CUdevice = c_int;
pub(crate) type CUcontext = *mut c_void;
pub(crate) type CUdeviceptr = u64;
pub(crate) type CUarray = *mut c_void;
pub(crate) type CUstream = *mut c_void;
pub(crate) type CUgraphicsResource = *mut c_void;

pub(crate) const CUDA_SUCCESS: CUresult = 0;

pub(crate) const CU_MEMORYTYPE_HOST: c_uint = 1;
pub(crate) const CU_MEMORYTYPE_DEVICE: c_uint = 2;
pub(crate) const CU_MEMORYTYPE_ARRAY: c_uint = 3;

pub(crate) const CU_GRAPHICS_REGISTER_FLAGS_WRITE_DISCARD: c_uint = 0x02;
pub(crate) const GL_TEXTURE_2D: c_uint = 0x0DE1;

/// Expands to `Result<(), CudaError>` naming the driver entry point that failed.
macro_rules! cuda_call {
    ($name:literal, $expression:expr) => {{
        let result = unsafe { $expression };
        if result != $crate::backend::cuda::ffi::CUDA_SUCCESS {
            Err($crate::error::CudaError::new($name, result))
        } else {
            Ok(())
        }
    }};
}
pub(crate) use cuda_call;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct CUDA_MEMCPY2D {
    pub srcXInBytes: usize,
    pub srcY: usize,
    pub srcMemoryType: c_uint,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: CUarray,
    pub srcPitch: usize,
    pub dstXInBytes: usize,
    pub dstY: usize,
    pub dstMemoryType: c_uint,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: CUarray,
    pub dstPitch: usize,
    pub WidthInBytes: usize,
    pub Height: usize,
}

impl Default for CUDA_MEMCPY2D {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

type CuInitFn = unsafe extern "C" fn(flags: c_uint) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(device: *mut CUdevice, ordinal: c_int) -> CUresult;
type CuCtxCreateFn =
    unsafe extern "C" fn(pctx: *mut CUcontext, flags: c_uint, dev: CUdevice) -> CUresult;
type CuCtxDestroyFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuGraphicsGLRegisterImageFn = unsafe extern "C" fn(
    resource: *mut CUgraphicsResource,
    image: c_uint,
    target: c_uint,
    flags: c_uint,
) -> CUresult;
type CuGraphicsUnregisterResourceFn = unsafe extern "C" fn(resource: CUgraphicsResource) -> CUresult;
type CuGraphicsMapResourcesFn = unsafe extern "C" fn(
    count: c_uint,
    resources: *mut CUgraphicsResource,
    stream: CUstream,
) -> CUresult;
type CuGraphicsUnmapResourcesFn = CuGraphicsMapResourcesFn;
type CuGraphicsSubResourceGetMappedArrayFn = unsafe extern "C" fn(
    array: *mut CUarray,
    resource: CUgraphicsResource,
    index: c_uint,
    mip_level: c_uint,
) -> CUresult;
type CuMemcpy2DFn = unsafe extern "C" fn(copy: *const CUDA_MEMCPY2D) -> CUresult;

/// Driver API entry points resolved from `libcuda`.
pub(crate) struct CudaFunctions {
    // Keeps the symbols valid
    _lib: Library,
    pub init: CuInitFn,
    pub device_get: CuDeviceGetFn,
    pub ctx_create: CuCtxCreateFn,
    pub ctx_destroy: CuCtxDestroyFn,
    pub ctx_set_current: CuCtxSetCurrentFn,
    pub register_image: CuGraphicsGLRegisterImageFn,
    pub unregister_resource: CuGraphicsUnregisterResourceFn,
    pub map_resources: CuGraphicsMapResourcesFn,
    pub unmap_resources: CuGraphicsUnmapResourcesFn,
    pub mapped_array: CuGraphicsSubResourceGetMappedArrayFn,
    pub memcpy_2d: CuMemcpy2DFn,
}

unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, String> {
    let symbol: Symbol<T> = unsafe { lib.get(name.as_bytes()) }
        .map_err(|e| format!("Failed to load {}: {}", name.trim_end_matches('\0'), e))?;
    Ok(*symbol)
}

impl CudaFunctions {
    pub fn load() -> Result<Self, String> {
        unsafe {
            let lib = Library::new("libcuda.so.1")
                .or_else(|_| Library::new("libcuda.so"))
                .map_err(|e| format!("Failed to open CUDA library: {}", e))?;

            Ok(CudaFunctions {
                init: symbol(&lib, "cuInit\0")?,
                device_get: symbol(&lib, "cuDeviceGet\0")?,
                ctx_create: symbol(&lib, "cuCtxCreate_v2\0")?,
                ctx_destroy: symbol(&lib, "cuCtxDestroy_v2\0")?,
                ctx_set_current: symbol(&lib, "cuCtxSetCurrent\0")?,
                register_image: symbol(&lib, "cuGraphicsGLRegisterImage\0")?,
                unregister_resource: symbol(&lib, "cuGraphicsUnregisterResource\0")?,
                map_resources: symbol(&lib, "cuGraphicsMapResources\0")?,
                unmap_resources: symbol(&lib, "cuGraphicsUnmapResources\0")?,
                mapped_array: symbol(&lib, "cuGraphicsSubResourceGetMappedArray\0")?,
                memcpy_2d: symbol(&lib, "cuMemcpy2D_v2\0")?,
                _lib: lib,
            })
        }
    }
}
