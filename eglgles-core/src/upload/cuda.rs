use crate::backend::{
    Backend, Copy2d, CopyDestination, CopySource, CudaApi, CudaContextHandle, GraphicsResource,
    PlaneUpload, TextureId,
};
use crate::error::RenderError;
use crate::format::{ChannelLayout, NegotiatedFormat};
use crate::nvbufsurface::{NvBufSurfaceMemType, Surface};

/// CUDA context and registered textures for one caps configuration.
#[derive(Debug)]
pub struct CudaInterop {
    context: CudaContextHandle,
    resources: Vec<GraphicsResource>,
    /// Host staging for 3-byte formats, which CUDA can't write into a GL texture.
    scratch: Option<Vec<u8>>,
}

fn source_for(mem_type: NvBufSurfaceMemType, ptr: usize, pitch: usize) -> Result<CopySource, RenderError> {
    match mem_type {
        NvBufSurfaceMemType::Default
        | NvBufSurfaceMemType::CudaDevice
        | NvBufSurfaceMemType::CudaUnified => Ok(CopySource::Device { ptr, pitch }),
        NvBufSurfaceMemType::CudaPinned | NvBufSurfaceMemType::System => {
            Ok(CopySource::Host { ptr, pitch })
        }
        other => Err(RenderError::UnsupportedMemoryType(other.name())),
    }
}

/// Bytes of the host copy of a packed 3-byte frame.
pub fn staging_size(width: u32, height: u32) -> Result<usize, RenderError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(3))
        .ok_or_else(|| RenderError::Negotiation(format!("{width}x{height} RGB frame is too large")))
}

impl CudaInterop {
    pub fn init(
        backend: &mut Backend,
        device: u32,
        format: &NegotiatedFormat,
        textures: &[TextureId],
    ) -> Result<Self, RenderError> {
        let staged = format
            .planes
            .first()
            .is_some_and(|plane| plane.channels == ChannelLayout::Rgb);

        if !staged {
            for (spec, texture) in format.planes.iter().zip(textures) {
                backend
                    .gl
                    .allocate_storage(*texture, spec.channels, spec.width, spec.height)?;
            }
        }

        let scratch_size = if staged {
            Some(staging_size(format.width(), format.height())?)
        } else {
            None
        };

        let cuda = backend.cuda()?;
        let context = cuda.create_context(device)?;
        let mut interop = CudaInterop {
            context,
            resources: Vec::new(),
            scratch: None,
        };

        if let Some(size) = scratch_size {
            interop.scratch = Some(vec![0; size]);
            return Ok(interop);
        }

        for texture in textures.iter().take(format.planes.len()) {
            match cuda.register_texture(*texture) {
                Ok(resource) => interop.resources.push(resource),
                Err(err) => {
                    interop.release(cuda);
                    return Err(err.into());
                }
            }
        }

        tracing::debug!(
            "Registered {} textures with CUDA device {device}",
            interop.resources.len()
        );
        Ok(interop)
    }

    pub fn registered(&self) -> usize {
        self.resources.len()
    }

    /// Copies the single surface of an NVMM buffer into the registered textures.
    pub fn copy_frame(
        &mut self,
        backend: &mut Backend,
        format: &NegotiatedFormat,
        textures: &[TextureId],
        buffer: &gst::BufferRef,
    ) -> Result<(), RenderError> {
        let surface = Surface::from_buffer(buffer)?;
        let mem_type = surface.mem_type();
        if matches!(
            mem_type,
            NvBufSurfaceMemType::SurfaceArray | NvBufSurfaceMemType::Handle
        ) {
            return Err(RenderError::UnsupportedMemoryType(mem_type.name()));
        }
        let params = surface.params()?;
        let base = params.dataPtr as usize;
        let planes = &params.planeParams;

        let Backend { gl, cuda, .. } = backend;
        let cuda = cuda
            .as_deref_mut()
            .ok_or(RenderError::Unavailable("CUDA driver"))?;
        cuda.set_current(self.context)?;

        if let Some(scratch) = self.scratch.as_mut() {
            let spec = format.planes[0];
            let row = spec.natural_stride() as usize;
            cuda.copy_2d(&Copy2d {
                src: source_for(mem_type, base + planes.offset[0] as usize, planes.pitch[0] as usize)?,
                dst: CopyDestination::Host {
                    ptr: scratch.as_mut_ptr() as usize,
                    pitch: row,
                },
                width_bytes: row,
                height: spec.height as usize,
            })?;
            return gl.upload_plane(
                0,
                textures[0],
                &PlaneUpload {
                    channels: spec.channels,
                    width: spec.width,
                    height: spec.height,
                    alignment: 1,
                    data: scratch,
                },
            );
        }

        for (index, (spec, resource)) in format.planes.iter().zip(&self.resources).enumerate() {
            let plane = spec.plane as usize;
            let src = source_for(
                mem_type,
                base + planes.offset[plane] as usize,
                planes.pitch[plane] as usize,
            )?;

            cuda.map(*resource)?;
            let copied = cuda.mapped_array(*resource).and_then(|array| {
                cuda.copy_2d(&Copy2d {
                    src,
                    dst: CopyDestination::Array(array),
                    width_bytes: spec.natural_stride() as usize,
                    height: spec.height as usize,
                })
            });
            let unmapped = cuda.unmap(*resource);

            if let Err(err) = copied {
                tracing::error!("CUDA copy of plane {index} failed: {err}");
                return Err(err.into());
            }
            unmapped?;
        }

        Ok(())
    }

    /// Unregisters every texture and destroys the context.
    pub fn release(self, cuda: &mut dyn CudaApi) {
        if let Err(err) = cuda.set_current(self.context) {
            tracing::warn!("{err}");
        }
        for resource in self.resources {
            if let Err(err) = cuda.unregister(resource) {
                tracing::warn!("{err}");
            }
        }
        if let Err(err) = cuda.destroy_context(self.context) {
            tracing::warn!("{err}");
        }
    }
}
