//! Backend that records GPU calls instead of making them.

use crate::backend::{
    Backend, BackendFactory, Copy2d, CudaApi, CudaArray, CudaContextHandle, DrawParams,
    EglImageHandle, GlExtensions, GlesApi, GraphicsResource, ImagePlane, ImageTargetTexture2dFn,
    PlaneUpload, ProgramId, SampleRegion, SurfaceApi, TextureId,
};
use crate::error::{CudaError, RenderError};
use crate::format::{ChannelLayout, ProgramLayout, TextureTarget};
use crate::nvbufsurface::Surface;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::Arc;

unsafe extern "C" fn fake_image_target(_target: u32, _image: *const c_void) {}

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub unit: usize,
    pub texture: TextureId,
    pub channels: ChannelLayout,
    pub width: u32,
    pub height: u32,
    pub alignment: u32,
    pub len: usize,
    /// The byte every texel byte equals, if the plane is uniform.
    pub uniform_byte: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBind {
    pub unit: usize,
    pub target: TextureTarget,
    pub texture: TextureId,
    pub image: EglImageHandle,
}

#[derive(Debug, Default)]
pub struct FakeLog {
    next_id: u32,
    pub textures: HashSet<TextureId>,
    pub programs: HashSet<ProgramId>,
    pub layouts: Vec<ProgramLayout>,
    pub storage: Vec<(TextureId, ChannelLayout, u32, u32)>,
    pub uploads: Vec<Upload>,
    pub image_binds: Vec<ImageBind>,
    pub image_planes: HashSet<EglImageHandle>,
    pub draws: usize,
    pub last_region: Option<SampleRegion>,
    pub last_stride_scale: Vec<f32>,
    pub last_size: Option<(u32, u32)>,
    pub make_current: usize,

    pub contexts: HashSet<CudaContextHandle>,
    pub registered: HashSet<GraphicsResource>,
    pub registrations: usize,
    pub mapped: HashSet<GraphicsResource>,
    pub copies: Vec<Copy2d>,

    pub surfaces_mapped: usize,
    pub surface_maps: usize,
}

impl FakeLog {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Knobs for failure and blocking paths.
#[derive(Debug, Default, Clone)]
pub struct FakeConfig {
    pub fail_bind_api: bool,
    pub no_image_target: bool,
    /// Zero-based copy index at which `copy_2d` fails.
    pub fail_copy_at: Option<usize>,
    /// `draw` waits for a message here before returning.
    pub draw_gate: Option<Receiver<()>>,
    pub panic_in_draw: bool,
    /// `map_egl_image` succeeds without producing an image.
    pub null_surface_image: bool,
}

pub struct FakeGles {
    log: Arc<Mutex<FakeLog>>,
    config: FakeConfig,
}

impl GlesApi for FakeGles {
    fn bind_api(&mut self) -> Result<(), RenderError> {
        if self.config.fail_bind_api {
            return Err(RenderError::Gl {
                call: "eglBindAPI",
                code: 0x3000,
            });
        }
        Ok(())
    }

    fn make_current(&mut self) -> Result<(), RenderError> {
        self.log.lock().make_current += 1;
        Ok(())
    }

    fn extensions(&self) -> GlExtensions {
        GlExtensions {
            image_target_texture_2d: (!self.config.no_image_target)
                .then_some(fake_image_target as ImageTargetTexture2dFn),
        }
    }

    fn display_handle(&self) -> usize {
        0xd15
    }

    fn create_textures(
        &mut self,
        count: usize,
        _target: TextureTarget,
    ) -> Result<Vec<TextureId>, RenderError> {
        let mut log = self.log.lock();
        let textures: Vec<_> = (0..count).map(|_| log.next()).collect();
        log.textures.extend(&textures);
        Ok(textures)
    }

    fn delete_textures(&mut self, textures: &[TextureId]) {
        let mut log = self.log.lock();
        for texture in textures {
            log.textures.remove(texture);
        }
    }

    fn create_program(&mut self, layout: ProgramLayout) -> Result<ProgramId, RenderError> {
        let mut log = self.log.lock();
        let program = ProgramId(log.next());
        log.programs.insert(program);
        log.layouts.push(layout);
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.log.lock().programs.remove(&program);
    }

    fn allocate_storage(
        &mut self,
        texture: TextureId,
        channels: ChannelLayout,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        self.log
            .lock()
            .storage
            .push((texture, channels, width, height));
        Ok(())
    }

    fn upload_plane(
        &mut self,
        unit: usize,
        texture: TextureId,
        plane: &PlaneUpload<'_>,
    ) -> Result<(), RenderError> {
        self.log.lock().uploads.push(Upload {
            unit,
            texture,
            channels: plane.channels,
            width: plane.width,
            height: plane.height,
            alignment: plane.alignment,
            len: plane.data.len(),
            uniform_byte: plane
                .data
                .first()
                .copied()
                .filter(|first| plane.data.iter().all(|byte| byte == first)),
        });
        Ok(())
    }

    fn bind_image(
        &mut self,
        unit: usize,
        target: TextureTarget,
        texture: TextureId,
        image: EglImageHandle,
        bind: ImageTargetTexture2dFn,
    ) -> Result<(), RenderError> {
        unsafe { bind(0, image.as_ptr()) };
        self.log.lock().image_binds.push(ImageBind {
            unit,
            target,
            texture,
            image,
        });
        Ok(())
    }

    fn bind_textures(&mut self, _target: TextureTarget, _textures: &[TextureId]) {}

    fn create_image_plane(
        &mut self,
        _channels: ChannelLayout,
        _width: u32,
        _height: u32,
    ) -> Result<ImagePlane, RenderError> {
        let mut log = self.log.lock();
        let texture = log.next();
        let image = EglImageHandle(0x1000 + texture as usize);
        log.textures.insert(texture);
        log.image_planes.insert(image);
        Ok(ImagePlane { texture, image })
    }

    fn destroy_image_plane(&mut self, plane: ImagePlane) {
        let mut log = self.log.lock();
        log.image_planes.remove(&plane.image);
        log.textures.remove(&plane.texture);
    }

    fn draw(&mut self, params: &DrawParams<'_>) -> Result<TextureId, RenderError> {
        if let Some(gate) = &self.config.draw_gate {
            let _ = gate.recv();
        }
        if self.config.panic_in_draw {
            panic!("draw exploded");
        }
        let mut log = self.log.lock();
        log.draws += 1;
        log.last_region = Some(params.region);
        log.last_stride_scale = params.stride_scale.to_vec();
        log.last_size = Some((params.width, params.height));
        Ok(0xf00)
    }
}

pub struct FakeCuda {
    log: Arc<Mutex<FakeLog>>,
    fail_copy_at: Option<usize>,
}

impl CudaApi for FakeCuda {
    fn create_context(&mut self, _device: u32) -> Result<CudaContextHandle, CudaError> {
        let mut log = self.log.lock();
        let context = CudaContextHandle(log.next() as usize);
        log.contexts.insert(context);
        Ok(context)
    }

    fn destroy_context(&mut self, context: CudaContextHandle) -> Result<(), CudaError> {
        self.log.lock().contexts.remove(&context);
        Ok(())
    }

    fn set_current(&mut self, _context: CudaContextHandle) -> Result<(), CudaError> {
        Ok(())
    }

    fn register_texture(&mut self, _texture: TextureId) -> Result<GraphicsResource, CudaError> {
        let mut log = self.log.lock();
        let resource = GraphicsResource(log.next() as usize);
        log.registered.insert(resource);
        log.registrations += 1;
        Ok(resource)
    }

    fn unregister(&mut self, resource: GraphicsResource) -> Result<(), CudaError> {
        self.log.lock().registered.remove(&resource);
        Ok(())
    }

    fn map(&mut self, resource: GraphicsResource) -> Result<(), CudaError> {
        let mut log = self.log.lock();
        if !log.mapped.insert(resource) {
            return Err(CudaError::new("cuGraphicsMapResources", 208));
        }
        Ok(())
    }

    fn unmap(&mut self, resource: GraphicsResource) -> Result<(), CudaError> {
        let mut log = self.log.lock();
        if !log.mapped.remove(&resource) {
            return Err(CudaError::new("cuGraphicsUnmapResources", 211));
        }
        Ok(())
    }

    fn mapped_array(&mut self, resource: GraphicsResource) -> Result<CudaArray, CudaError> {
        Ok(CudaArray(resource.0 + 0x100))
    }

    fn copy_2d(&mut self, copy: &Copy2d) -> Result<(), CudaError> {
        let mut log = self.log.lock();
        if self.fail_copy_at == Some(log.copies.len()) {
            return Err(CudaError::new("cuMemcpy2D", 1));
        }
        log.copies.push(*copy);
        Ok(())
    }
}

pub struct FakeSurfaces {
    log: Arc<Mutex<FakeLog>>,
    null_image: bool,
}

impl SurfaceApi for FakeSurfaces {
    fn map_egl_image(&mut self, _surface: &Surface<'_>) -> Result<EglImageHandle, RenderError> {
        let mut log = self.log.lock();
        log.surfaces_mapped += 1;
        log.surface_maps += 1;
        Ok(EglImageHandle(if self.null_image { 0 } else { 0xe91 }))
    }

    fn unmap_egl_image(&mut self, _surface: &Surface<'_>) -> Result<(), RenderError> {
        self.log.lock().surfaces_mapped -= 1;
        Ok(())
    }
}

pub fn factory(log: Arc<Mutex<FakeLog>>, config: FakeConfig) -> BackendFactory {
    Box::new(move || {
        Ok(Backend {
            cuda: Some(Box::new(FakeCuda {
                log: log.clone(),
                fail_copy_at: config.fail_copy_at,
            })),
            surfaces: Some(Box::new(FakeSurfaces {
                log: log.clone(),
                null_image: config.null_surface_image,
            })),
            gl: Box::new(FakeGles { log, config }),
        })
    })
}
