//! Layout of the `NvBufSurface` descriptor carried in `memory:NVMM` buffers.
//!
//! An NVMM buffer's single system memory holds exactly one `NvBufSurface`; the pixel data lives
//! behind `surfaceList[i].dataPtr` in CUDA or NVRM memory.
#![allow(non_snake_case)]

use crate::error::RenderError;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::NonNull;

pub const NVBUF_MAX_PLANES: usize = 4;
const STRUCTURE_PADDING: usize = 4;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvBufSurfaceMemType {
    Default = 0,
    CudaPinned = 1,
    CudaDevice = 2,
    CudaUnified = 3,
    SurfaceArray = 4,
    Handle = 5,
    System = 6,
}

impl From<u32> for NvBufSurfaceMemType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::CudaPinned,
            2 => Self::CudaDevice,
            3 => Self::CudaUnified,
            4 => Self::SurfaceArray,
            5 => Self::Handle,
            6 => Self::System,
            _ => Self::Default,
        }
    }
}

impl NvBufSurfaceMemType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "NVBUF_MEM_DEFAULT",
            Self::CudaPinned => "NVBUF_MEM_CUDA_PINNED",
            Self::CudaDevice => "NVBUF_MEM_CUDA_DEVICE",
            Self::CudaUnified => "NVBUF_MEM_CUDA_UNIFIED",
            Self::SurfaceArray => "NVBUF_MEM_SURFACE_ARRAY",
            Self::Handle => "NVBUF_MEM_HANDLE",
            Self::System => "NVBUF_MEM_SYSTEM",
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NvBufSurfacePlaneParams {
    pub num_planes: u32,
    pub width: [u32; NVBUF_MAX_PLANES],
    pub height: [u32; NVBUF_MAX_PLANES],
    pub pitch: [u32; NVBUF_MAX_PLANES],
    pub offset: [u32; NVBUF_MAX_PLANES],
    pub psize: [u32; NVBUF_MAX_PLANES],
    pub bytesPerPix: [u32; NVBUF_MAX_PLANES],
    pub _reserved: [*mut c_void; STRUCTURE_PADDING * NVBUF_MAX_PLANES],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NvBufSurfaceMappedAddr {
    pub addr: [*mut c_void; NVBUF_MAX_PLANES],
    pub eglImage: *mut c_void,
    pub _reserved: [*mut c_void; STRUCTURE_PADDING],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NvBufSurfaceParams {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub colorFormat: u32,
    pub layout: u32,
    pub bufferDesc: u64,
    pub dataSize: u32,
    pub dataPtr: *mut c_void,
    pub planeParams: NvBufSurfacePlaneParams,
    pub mappedAddr: NvBufSurfaceMappedAddr,
    pub paramex: *mut c_void,
    pub _reserved: [*mut c_void; STRUCTURE_PADDING - 1],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NvBufSurface {
    pub gpuId: u32,
    pub batchSize: u32,
    pub numFilled: u32,
    pub isContiguous: bool,
    pub memType: u32,
    pub surfaceList: *mut NvBufSurfaceParams,
    pub _reserved: [*mut c_void; STRUCTURE_PADDING],
}

/// A single-surface `NvBufSurface` borrowed from the buffer that carries it.
#[derive(Debug)]
pub struct Surface<'a> {
    raw: NonNull<NvBufSurface>,
    _buffer: PhantomData<&'a gst::BufferRef>,
}

impl<'a> Surface<'a> {
    /// Checks the descriptor size and that the batch holds exactly one surface.
    pub fn from_buffer(buffer: &'a gst::BufferRef) -> Result<Self, RenderError> {
        let map = buffer
            .map_readable()
            .map_err(|_| RenderError::Unavailable("readable NVMM descriptor"))?;
        if map.len() != std::mem::size_of::<NvBufSurface>() {
            return Err(RenderError::UnsupportedMemoryType("legacy NVMM"));
        }
        // The descriptor outlives the map: it is owned by the buffer's memory, not the mapping.
        let raw = NonNull::new(map.as_ptr() as *mut NvBufSurface)
            .ok_or(RenderError::Unavailable("NVMM descriptor"))?;
        drop(map);

        let surface = Surface {
            raw,
            _buffer: PhantomData,
        };
        let batch_size = surface.header().batchSize;
        if batch_size != 1 {
            return Err(RenderError::UnsupportedBatchSize(batch_size));
        }
        Ok(surface)
    }

    fn header(&self) -> NvBufSurface {
        unsafe { std::ptr::read_unaligned(self.raw.as_ptr()) }
    }

    pub fn mem_type(&self) -> NvBufSurfaceMemType {
        self.header().memType.into()
    }

    /// Parameters of surface 0.
    pub fn params(&self) -> Result<NvBufSurfaceParams, RenderError> {
        let list = self.header().surfaceList;
        if list.is_null() {
            return Err(RenderError::Unavailable("NVMM surface list"));
        }
        Ok(unsafe { std::ptr::read_unaligned(list) })
    }

    pub fn as_ptr(&self) -> *mut NvBufSurface {
        self.raw.as_ptr()
    }
}
