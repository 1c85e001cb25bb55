//! GLES 2 renderer on a smithay `EGLContext`, drawing into an offscreen front texture.

use super::shaders;
use super::{
    DrawParams, EglImageHandle, GlExtensions, GlesApi, ImagePlane, ImageTargetTexture2dFn,
    PlaneUpload, ProgramId, TextureId,
};
use crate::error::RenderError;
use crate::format::{ChannelLayout, ProgramLayout, TextureTarget};
use glow::HasContext as _;
use smithay::backend::egl;
use smithay::backend::egl::ffi::egl::types::{EGLDisplay as RawEGLDisplay, EGLint};
use smithay::backend::egl::{EGLContext, EGLDisplay};
use std::collections::HashMap;
use std::ffi::c_void;
use std::num::NonZeroU32;

const GL_TEXTURE_EXTERNAL_OES: u32 = 0x8D65;
const GL_LUMINANCE: u32 = 0x1909;
const GL_LUMINANCE_ALPHA: u32 = 0x190A;

const EGL_GL_TEXTURE_2D_KHR: u32 = 0x30B1;
const EGL_NONE: EGLint = 0x3038;

type PfnEglCreateImageKhr = unsafe extern "C" fn(
    dpy: RawEGLDisplay,
    ctx: *const c_void,
    target: u32,
    buffer: *const c_void,
    attrib_list: *const EGLint,
) -> *const c_void;

type PfnEglDestroyImageKhr = unsafe extern "C" fn(dpy: RawEGLDisplay, image: *const c_void) -> u32;

#[derive(Debug, Clone, Copy)]
struct EglImageFunctions {
    create_image: PfnEglCreateImageKhr,
    destroy_image: PfnEglDestroyImageKhr,
}

impl EglImageFunctions {
    fn load() -> Option<Self> {
        let create_image_ptr = unsafe { egl::get_proc_address("eglCreateImageKHR") };
        let destroy_image_ptr = unsafe { egl::get_proc_address("eglDestroyImageKHR") };

        if create_image_ptr.is_null() || destroy_image_ptr.is_null() {
            return None;
        }

        Some(EglImageFunctions {
            create_image: unsafe {
                std::mem::transmute::<*const c_void, PfnEglCreateImageKhr>(create_image_ptr)
            },
            destroy_image: unsafe {
                std::mem::transmute::<*const c_void, PfnEglDestroyImageKhr>(destroy_image_ptr)
            },
        })
    }
}

struct LinkedProgram {
    program: glow::Program,
    layout: ProgramLayout,
    position: u32,
    texpos: u32,
    region: Option<glow::UniformLocation>,
    tex_scale: [Option<glow::UniformLocation>; 3],
}

struct FrontTarget {
    framebuffer: glow::Framebuffer,
    texture: glow::Texture,
    width: u32,
    height: u32,
}

pub struct EglGles {
    context: EGLContext,
    raw_display: RawEGLDisplay,
    gl: glow::Context,
    extensions: GlExtensions,
    images: Option<EglImageFunctions>,
    programs: HashMap<ProgramId, LinkedProgram>,
    quad: Option<glow::Buffer>,
    target: Option<FrontTarget>,
}

fn texture(id: TextureId) -> Result<glow::Texture, RenderError> {
    NonZeroU32::new(id)
        .map(glow::NativeTexture)
        .ok_or(RenderError::Gl {
            call: "texture lookup",
            code: glow::INVALID_VALUE,
        })
}

fn target_enum(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture2d => glow::TEXTURE_2D,
        TextureTarget::ExternalOes => GL_TEXTURE_EXTERNAL_OES,
    }
}

fn pixel_format(channels: ChannelLayout) -> (u32, u32) {
    match channels {
        ChannelLayout::Luminance => (GL_LUMINANCE, glow::UNSIGNED_BYTE),
        ChannelLayout::LuminanceAlpha => (GL_LUMINANCE_ALPHA, glow::UNSIGNED_BYTE),
        ChannelLayout::Rgb => (glow::RGB, glow::UNSIGNED_BYTE),
        ChannelLayout::Rgba => (glow::RGBA, glow::UNSIGNED_BYTE),
        ChannelLayout::Rgb565 => (glow::RGB, glow::UNSIGNED_SHORT_5_6_5),
    }
}

fn gl_error(call: &'static str) -> impl FnOnce(String) -> RenderError {
    move |message| {
        tracing::error!("{call}: {message}");
        RenderError::Gl { call, code: 0 }
    }
}

impl EglGles {
    /// Creates a GLES context on `display`. Must run on the thread that will render.
    pub fn new(display: &EGLDisplay) -> Result<Self, RenderError> {
        let context = EGLContext::new(display).map_err(|err| {
            tracing::error!("Failed to create EGL context: {err:?}");
            RenderError::Unavailable("EGL context")
        })?;
        unsafe { context.make_current() }.map_err(|err| {
            tracing::error!("eglMakeCurrent failed: {err:?}");
            RenderError::Gl {
                call: "eglMakeCurrent",
                code: 0,
            }
        })?;

        let gl = unsafe { glow::Context::from_loader_function(|name| egl::get_proc_address(name)) };
        let extensions = GlExtensions::load(|name| unsafe { egl::get_proc_address(name) });
        let images = EglImageFunctions::load();
        if images.is_none() {
            tracing::warn!("eglCreateImageKHR unavailable, pool buffers fall back to system memory");
        }

        tracing::info!("GLES context: {}", unsafe {
            gl.get_parameter_string(glow::VERSION)
        });

        Ok(EglGles {
            raw_display: display.get_display_handle().handle,
            context,
            gl,
            extensions,
            images,
            programs: HashMap::new(),
            quad: None,
            target: None,
        })
    }

    fn check(&self, call: &'static str) -> Result<(), RenderError> {
        let code = unsafe { self.gl.get_error() };
        if code != glow::NO_ERROR {
            tracing::error!("{call} failed: 0x{code:x}");
            return Err(RenderError::Gl { call, code });
        }
        Ok(())
    }

    fn compile(&self, kind: u32, source: &str) -> Result<glow::Shader, RenderError> {
        unsafe {
            let shader = self
                .gl
                .create_shader(kind)
                .map_err(gl_error("glCreateShader"))?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(gl_error("glCompileShader")(log));
            }
            Ok(shader)
        }
    }

    fn quad(&mut self) -> Result<glow::Buffer, RenderError> {
        if let Some(quad) = self.quad {
            return Ok(quad);
        }
        // position.xy, texpos.xy as a triangle strip
        let vertices: [f32; 16] = [
            -1.0, -1.0, 0.0, 0.0, //
            1.0, -1.0, 1.0, 0.0, //
            -1.0, 1.0, 0.0, 1.0, //
            1.0, 1.0, 1.0, 1.0,
        ];
        let bytes: Vec<u8> = vertices.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let quad = unsafe {
            let quad = self.gl.create_buffer().map_err(gl_error("glGenBuffers"))?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad));
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
            quad
        };
        self.check("glBufferData")?;
        self.quad = Some(quad);
        Ok(quad)
    }

    fn front_target(&mut self, width: u32, height: u32) -> Result<&FrontTarget, RenderError> {
        if self
            .target
            .as_ref()
            .is_some_and(|t| t.width != width || t.height != height)
        {
            if let Some(old) = self.target.take() {
                unsafe {
                    self.gl.delete_framebuffer(old.framebuffer);
                    self.gl.delete_texture(old.texture);
                }
            }
        }

        if self.target.is_none() {
            let target = unsafe {
                let texture = self.gl.create_texture().map_err(gl_error("glGenTextures"))?;
                self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
                self.gl.tex_image_2d(
                    glow::TEXTURE_2D,
                    0,
                    glow::RGBA as i32,
                    width as i32,
                    height as i32,
                    0,
                    glow::RGBA,
                    glow::UNSIGNED_BYTE,
                    glow::PixelUnpackData::Slice(None),
                );
                self.gl.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_MIN_FILTER,
                    glow::LINEAR as i32,
                );
                self.gl.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_MAG_FILTER,
                    glow::LINEAR as i32,
                );

                let framebuffer = self
                    .gl
                    .create_framebuffer()
                    .map_err(gl_error("glGenFramebuffers"))?;
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
                self.gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0,
                    glow::TEXTURE_2D,
                    Some(texture),
                    0,
                );
                let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                if status != glow::FRAMEBUFFER_COMPLETE {
                    self.gl.delete_framebuffer(framebuffer);
                    self.gl.delete_texture(texture);
                    return Err(RenderError::Gl {
                        call: "glCheckFramebufferStatus",
                        code: status,
                    });
                }
                FrontTarget {
                    framebuffer,
                    texture,
                    width,
                    height,
                }
            };
            tracing::debug!("Created {width}x{height} front texture");
            self.target = Some(target);
        }

        self.target
            .as_ref()
            .ok_or(RenderError::Unavailable("front texture"))
    }

    fn make_texture(&self, target: u32) -> Result<glow::Texture, RenderError> {
        unsafe {
            let texture = self.gl.create_texture().map_err(gl_error("glGenTextures"))?;
            self.gl.bind_texture(target, Some(texture));
            for (param, value) in [
                (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
                (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
                (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
                (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
            ] {
                self.gl.tex_parameter_i32(target, param, value as i32);
            }
            Ok(texture)
        }
    }
}

impl GlesApi for EglGles {
    fn bind_api(&mut self) -> Result<(), RenderError> {
        let bound = unsafe { egl::ffi::egl::BindAPI(egl::ffi::egl::OPENGL_ES_API) };
        if bound != egl::ffi::egl::TRUE {
            let code = unsafe { egl::ffi::egl::GetError() };
            return Err(RenderError::Gl {
                call: "eglBindAPI",
                code: code as u32,
            });
        }
        Ok(())
    }

    fn make_current(&mut self) -> Result<(), RenderError> {
        unsafe { self.context.make_current() }.map_err(|err| {
            tracing::error!("eglMakeCurrent failed: {err:?}");
            RenderError::Gl {
                call: "eglMakeCurrent",
                code: 0,
            }
        })
    }

    fn extensions(&self) -> GlExtensions {
        self.extensions
    }

    fn display_handle(&self) -> usize {
        self.raw_display as usize
    }

    fn create_textures(
        &mut self,
        count: usize,
        target: TextureTarget,
    ) -> Result<Vec<TextureId>, RenderError> {
        let target = target_enum(target);
        let mut textures = Vec::with_capacity(count);
        for _ in 0..count {
            match self.make_texture(target) {
                Ok(texture) => textures.push(texture.0.get()),
                Err(err) => {
                    self.delete_textures(&textures);
                    return Err(err);
                }
            }
        }
        self.check("glTexParameteri")?;
        Ok(textures)
    }

    fn delete_textures(&mut self, textures: &[TextureId]) {
        for id in textures {
            if let Ok(texture) = texture(*id) {
                unsafe { self.gl.delete_texture(texture) };
            }
        }
    }

    fn create_program(&mut self, layout: ProgramLayout) -> Result<ProgramId, RenderError> {
        let vertex = self.compile(glow::VERTEX_SHADER, shaders::VERTEX)?;
        let fragment = match self.compile(glow::FRAGMENT_SHADER, &shaders::fragment(layout)) {
            Ok(fragment) => fragment,
            Err(err) => {
                unsafe { self.gl.delete_shader(vertex) };
                return Err(err);
            }
        };

        let linked = unsafe {
            let program = self.gl.create_program().map_err(gl_error("glCreateProgram"))?;
            self.gl.attach_shader(program, vertex);
            self.gl.attach_shader(program, fragment);
            self.gl.bind_attrib_location(program, 0, "position");
            self.gl.bind_attrib_location(program, 1, "texpos");
            self.gl.link_program(program);
            self.gl.delete_shader(vertex);
            self.gl.delete_shader(fragment);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(gl_error("glLinkProgram")(log));
            }

            self.gl.use_program(Some(program));
            for (unit, name) in layout.sampler_names().iter().enumerate() {
                if let Some(location) = self.gl.get_uniform_location(program, name) {
                    self.gl.uniform_1_i32(Some(&location), unit as i32);
                }
            }
            let linked = LinkedProgram {
                program,
                layout,
                position: 0,
                texpos: 1,
                region: self.gl.get_uniform_location(program, "region"),
                tex_scale: [
                    self.gl.get_uniform_location(program, "tex_scale0"),
                    self.gl.get_uniform_location(program, "tex_scale1"),
                    self.gl.get_uniform_location(program, "tex_scale2"),
                ],
            };
            self.gl.use_program(None);
            linked
        };
        self.check("glLinkProgram")?;

        let id = ProgramId(linked.program.0.get());
        self.programs.insert(id, linked);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(linked) = self.programs.remove(&program) {
            unsafe { self.gl.delete_program(linked.program) };
        }
    }

    fn allocate_storage(
        &mut self,
        texture_id: TextureId,
        channels: ChannelLayout,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        let (format, ty) = pixel_format(channels);
        unsafe {
            self.gl
                .bind_texture(glow::TEXTURE_2D, Some(texture(texture_id)?));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                format as i32,
                width as i32,
                height as i32,
                0,
                format,
                ty,
                glow::PixelUnpackData::Slice(None),
            );
        }
        self.check("glTexImage2D")
    }

    fn upload_plane(
        &mut self,
        unit: usize,
        texture_id: TextureId,
        plane: &PlaneUpload<'_>,
    ) -> Result<(), RenderError> {
        let (format, ty) = pixel_format(plane.channels);
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit as u32);
            self.gl
                .bind_texture(glow::TEXTURE_2D, Some(texture(texture_id)?));
            self.gl
                .pixel_store_i32(glow::UNPACK_ALIGNMENT, plane.alignment as i32);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                format as i32,
                plane.width as i32,
                plane.height as i32,
                0,
                format,
                ty,
                glow::PixelUnpackData::Slice(Some(plane.data)),
            );
        }
        self.check("glTexImage2D")
    }

    fn bind_image(
        &mut self,
        unit: usize,
        target: TextureTarget,
        texture_id: TextureId,
        image: EglImageHandle,
        bind: ImageTargetTexture2dFn,
    ) -> Result<(), RenderError> {
        let target = target_enum(target);
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit as u32);
            self.gl.bind_texture(target, Some(texture(texture_id)?));
            bind(target, image.as_ptr());
        }
        self.check("glEGLImageTargetTexture2DOES")
    }

    fn bind_textures(&mut self, target: TextureTarget, textures: &[TextureId]) {
        let target = target_enum(target);
        for (unit, id) in textures.iter().enumerate() {
            if let Ok(texture) = texture(*id) {
                unsafe {
                    self.gl.active_texture(glow::TEXTURE0 + unit as u32);
                    self.gl.bind_texture(target, Some(texture));
                }
            }
        }
    }

    fn create_image_plane(
        &mut self,
        channels: ChannelLayout,
        width: u32,
        height: u32,
    ) -> Result<ImagePlane, RenderError> {
        let functions = self
            .images
            .ok_or(RenderError::Unavailable("eglCreateImageKHR"))?;
        let texture = self.make_texture(glow::TEXTURE_2D)?;
        let id = texture.0.get();
        if let Err(err) = self.allocate_storage(id, channels, width, height) {
            unsafe { self.gl.delete_texture(texture) };
            return Err(err);
        }

        let attribs = [EGL_NONE];
        let image = unsafe {
            (functions.create_image)(
                self.raw_display,
                self.context.get_context_handle() as *const c_void,
                EGL_GL_TEXTURE_2D_KHR,
                id as usize as *const c_void,
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            unsafe { self.gl.delete_texture(texture) };
            let code = unsafe { egl::ffi::egl::GetError() };
            return Err(RenderError::Gl {
                call: "eglCreateImageKHR",
                code: code as u32,
            });
        }

        Ok(ImagePlane {
            texture: id,
            image: EglImageHandle(image as usize),
        })
    }

    fn destroy_image_plane(&mut self, plane: ImagePlane) {
        if let Some(functions) = self.images {
            unsafe { (functions.destroy_image)(self.raw_display, plane.image.as_ptr()) };
        }
        self.delete_textures(&[plane.texture]);
    }

    fn draw(&mut self, params: &DrawParams<'_>) -> Result<TextureId, RenderError> {
        let quad = self.quad()?;
        let (framebuffer, front) = {
            let target = self.front_target(params.width, params.height)?;
            (target.framebuffer, target.texture)
        };
        let program = self
            .programs
            .get(&params.program)
            .ok_or(RenderError::Unavailable("linked program"))?;
        let target = target_enum(program.layout.target());

        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.viewport(0, 0, params.width as i32, params.height as i32);
            gl.use_program(Some(program.program));

            for (unit, id) in params.textures.iter().enumerate() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(target, Some(texture(*id)?));
                if let Some(location) = program.tex_scale.get(unit).and_then(Option::as_ref) {
                    let scale = params.stride_scale.get(unit).copied().unwrap_or(1.0);
                    gl.uniform_2_f32(Some(location), scale, 1.0);
                }
            }
            let region = params.region;
            gl.uniform_4_f32(
                program.region.as_ref(),
                region.x,
                region.y,
                region.width,
                region.height,
            );

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad));
            gl.enable_vertex_attrib_array(program.position);
            gl.vertex_attrib_pointer_f32(program.position, 2, glow::FLOAT, false, 16, 0);
            gl.enable_vertex_attrib_array(program.texpos);
            gl.vertex_attrib_pointer_f32(program.texpos, 2, glow::FLOAT, false, 16, 8);
            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);

            gl.disable_vertex_attrib_array(program.position);
            gl.disable_vertex_attrib_array(program.texpos);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.use_program(None);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            // Consumers sample the front texture from another context.
            gl.flush();
        }
        self.check("glDrawArrays")?;

        Ok(front.0.get())
    }
}

impl Drop for EglGles {
    fn drop(&mut self) {
        if let Err(err) = self.make_current() {
            tracing::warn!("Leaking GL objects: {err}");
            return;
        }
        unsafe {
            for (_, linked) in self.programs.drain() {
                self.gl.delete_program(linked.program);
            }
            if let Some(quad) = self.quad.take() {
                self.gl.delete_buffer(quad);
            }
            if let Some(target) = self.target.take() {
                self.gl.delete_framebuffer(target.framebuffer);
                self.gl.delete_texture(target.texture);
            }
        }
    }
}
