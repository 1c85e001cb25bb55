use thiserror::Error;

/// A failed CUDA driver call, named after the entry point that returned `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{call} failed: {} ({code})", cuda_result_to_string(*code))]
pub struct CudaError {
    pub call: &'static str,
    pub code: u32,
}

impl CudaError {
    pub fn new(call: &'static str, code: u32) -> Self {
        CudaError { call, code }
    }
}

pub fn cuda_result_to_string(result: u32) -> &'static str {
    match result {
        0 => "CUDA_SUCCESS",
        1 => "CUDA_ERROR_INVALID_VALUE",
        2 => "CUDA_ERROR_OUT_OF_MEMORY",
        3 => "CUDA_ERROR_NOT_INITIALIZED",
        4 => "CUDA_ERROR_DEINITIALIZED",
        100 => "CUDA_ERROR_NO_DEVICE",
        101 => "CUDA_ERROR_INVALID_DEVICE",
        201 => "CUDA_ERROR_INVALID_CONTEXT",
        205 => "CUDA_ERROR_MAP_FAILED",
        206 => "CUDA_ERROR_UNMAP_FAILED",
        207 => "CUDA_ERROR_ARRAY_IS_MAPPED",
        208 => "CUDA_ERROR_ALREADY_MAPPED",
        210 => "CUDA_ERROR_ALREADY_ACQUIRED",
        211 => "CUDA_ERROR_NOT_MAPPED",
        212 => "CUDA_ERROR_NOT_MAPPED_AS_ARRAY",
        213 => "CUDA_ERROR_NOT_MAPPED_AS_POINTER",
        219 => "CUDA_ERROR_INVALID_GRAPHICS_CONTEXT",
        400 => "CUDA_ERROR_INVALID_HANDLE",
        999 => "CUDA_ERROR_UNKNOWN",
        _ => "CUDA_ERROR_UNRECOGNIZED",
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("not negotiated: {0}")]
    Negotiation(String),
    #[error("{0} is not available")]
    Unavailable(&'static str),
    #[error("unsupported stride {stride} for plane {plane} of width {width}")]
    UnsupportedStride { plane: usize, stride: i32, width: i32 },
    #[error("unsupported batch size {0}, only single surface batches are handled")]
    UnsupportedBatchSize(u32),
    #[error("unsupported memory type {0}")]
    UnsupportedMemoryType(&'static str),
    #[error("unsupported format {0}")]
    UnsupportedFormat(String),
    #[error("{call} failed: 0x{code:x}")]
    Gl { call: &'static str, code: u32 },
    #[error(transparent)]
    Cuda(#[from] CudaError),
    #[error("render thread: {0}")]
    Thread(String),
}

impl RenderError {
    /// Flow result reported to the producer for an item that failed with this error.
    pub fn flow(&self) -> gst::FlowError {
        match self {
            RenderError::Negotiation(_) => gst::FlowError::NotNegotiated,
            _ => gst::FlowError::Error,
        }
    }
}
