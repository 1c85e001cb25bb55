//! The render thread: sole owner of the EGL context and every GPU object.

use crate::backend::{
    Backend, BackendFactory, DrawParams, GlExtensions, GlesApi, ImagePlane, ProgramId, TextureId,
};
use crate::error::RenderError;
use crate::format::{
    caps_compatible, plane_specs, NegotiatedFormat, Platform, ProgramLayout, UploadStrategy,
};
use crate::images::{self, ImageRegistry};
use crate::jitter::JitterMeter;
use crate::pool::EglImageBufferPool;
use crate::presentation::Presentation;
use crate::queue::{AllocationRequest, FlowResult, Pending, RenderChannel, ThreadPhase, WorkItem};
use crate::upload::cuda::CudaInterop;
use crate::upload::{crop_region, image, raw, Orientation, UploadedFrame};
use gst::glib;
use gst::prelude::*;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

pub const THREAD_NAME: &str = "eglglessink-render";

/// Snapshot of the element settings a render thread runs with.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub platform: Platform,
    pub gpu_id: u32,
    pub profile: bool,
    pub show_latency: bool,
    /// Stretch the front texture so non-square pixels display at their aspect ratio.
    pub force_aspect_ratio: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            platform: Platform::current(),
            gpu_id: 0,
            profile: false,
            show_latency: false,
            force_aspect_ratio: true,
        }
    }
}

/// State the render thread shares with the streaming thread and the pool.
#[derive(Debug, Default)]
pub struct RenderShared {
    pub channel: Arc<RenderChannel>,
    pub presentation: Arc<Presentation>,
    pub images: Arc<ImageRegistry>,
    pub pool: Mutex<Option<EglImageBufferPool>>,
    pub jitter: Mutex<Option<JitterMeter>>,
    /// Element that posts the render thread's stream-status messages.
    pub owner: Mutex<Option<glib::WeakRef<gst::Element>>>,
}

impl RenderShared {
    fn post_stream_status(&self, status: gst::StreamStatusType) {
        let owner = self.owner.lock().as_ref().and_then(|owner| owner.upgrade());
        let Some(owner) = owner else {
            return;
        };
        tracing::debug!("Posting {status:?} stream status");
        let message = gst::message::StreamStatus::builder(status, &owner)
            .src(&owner)
            .build();
        if let Err(err) = owner.post_message(message) {
            tracing::debug!("Stream status not posted: {err}");
        }
    }
}

/// Textures and program for one program layout.
#[derive(Debug, Default)]
struct RenderContext {
    layout: Option<ProgramLayout>,
    program: Option<ProgramId>,
    textures: Vec<TextureId>,
}

impl RenderContext {
    fn prepare(&mut self, gl: &mut dyn GlesApi, layout: ProgramLayout) -> Result<(), RenderError> {
        if self.layout == Some(layout) {
            return Ok(());
        }
        self.release(gl);

        let textures = gl.create_textures(layout.texture_count(), layout.target())?;
        let program = match gl.create_program(layout) {
            Ok(program) => program,
            Err(err) => {
                gl.delete_textures(&textures);
                return Err(err);
            }
        };

        tracing::debug!("Built {layout:?} program with {} textures", textures.len());
        self.layout = Some(layout);
        self.program = Some(program);
        self.textures = textures;
        Ok(())
    }

    fn release(&mut self, gl: &mut dyn GlesApi) {
        if let Some(program) = self.program.take() {
            gl.delete_program(program);
        }
        if !self.textures.is_empty() {
            gl.delete_textures(&self.textures);
            self.textures.clear();
        }
        self.layout = None;
    }
}

#[derive(Debug)]
struct Configured {
    caps: gst::Caps,
    format: NegotiatedFormat,
    cuda: Option<CudaInterop>,
}

pub struct Renderer {
    backend: Backend,
    extensions: GlExtensions,
    settings: RenderSettings,
    shared: Arc<RenderShared>,
    context: RenderContext,
    configured: Option<Configured>,
    last_uploaded: Option<UploadedFrame>,
}

/// Starts the render thread and waits until it owns a current EGL context.
pub fn spawn(
    factory: BackendFactory,
    settings: RenderSettings,
    shared: Arc<RenderShared>,
) -> Result<JoinHandle<()>, RenderError> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), RenderError>>(1);
    let thread_shared = shared.clone();

    let handle = std::thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || {
            thread_shared.post_stream_status(gst::StreamStatusType::Enter);
            let startup = factory().and_then(|mut backend| {
                backend.gl.bind_api()?;
                backend.gl.make_current()?;
                Ok(backend)
            });
            match startup {
                Ok(backend) => {
                    thread_shared.channel.set_phase(ThreadPhase::Running);
                    let _ = ready_tx.send(Ok(()));
                    Renderer::new(backend, settings, thread_shared.clone()).run();
                }
                Err(err) => {
                    thread_shared.channel.set_phase(ThreadPhase::Exited);
                    let _ = ready_tx.send(Err(err));
                }
            }
            thread_shared.post_stream_status(gst::StreamStatusType::Leave);
        })
        .map_err(|err| RenderError::Thread(format!("failed to spawn: {err}")))?;

    let startup = ready_rx
        .recv()
        .unwrap_or_else(|_| Err(RenderError::Thread("exited during startup".into())));
    match startup {
        Ok(()) => Ok(handle),
        Err(err) => {
            shared.channel.set_flushing(true);
            if handle.join().is_err() {
                tracing::error!("Render thread panicked during startup");
            }
            Err(RenderError::Thread(format!("failed to initialize: {err}")))
        }
    }
}

impl Renderer {
    fn new(backend: Backend, settings: RenderSettings, shared: Arc<RenderShared>) -> Self {
        let extensions = backend.gl.extensions();
        if extensions.image_target_texture_2d.is_none() {
            tracing::warn!("glEGLImageTargetTexture2DOES unavailable, EGLImage uploads will fail");
        }
        Renderer {
            backend,
            extensions,
            settings,
            shared,
            context: RenderContext::default(),
            configured: None,
            last_uploaded: None,
        }
    }

    fn run(mut self) {
        let channel = self.shared.channel.clone();
        tracing::debug!("Render thread running");

        while let Some(Pending { id, item }) = channel.next_item() {
            let kind = item.kind();
            let flow = match panic::catch_unwind(AssertUnwindSafe(|| self.process(item))) {
                Ok(flow) => flow,
                Err(_) => {
                    tracing::error!("Render thread panicked processing {kind}");
                    Err(gst::FlowError::Error)
                }
            };
            self.destroy_released_images();

            if let Err(err) = flow {
                tracing::debug!("Processing {kind} returned {err:?}");
            }
            channel.complete(id, flow);
            if flow.is_err() {
                break;
            }
        }

        self.set_last_uploaded(None);
        channel.drain();
        self.teardown();
        channel.set_phase(ThreadPhase::Exited);
        tracing::debug!("Render thread exited");
    }

    fn process(&mut self, item: WorkItem) -> FlowResult {
        match item {
            WorkItem::Caps(caps) => {
                if self.configured.as_ref().is_some_and(|c| c.caps == caps) {
                    return Ok(gst::FlowSuccess::Ok);
                }
                if let Err(err) = self.configure(&caps) {
                    tracing::error!("Failed to configure caps {caps}: {err}");
                    self.release_configuration();
                    return Err(gst::FlowError::NotNegotiated);
                }
            }
            WorkItem::Query(request) => {
                self.allocate(&request).map_err(|err| {
                    tracing::error!("Failed to allocate EGLImage buffer: {err}");
                    err.flow()
                })?;
            }
            WorkItem::Buffer(buffer) => {
                if self.configured.is_none() {
                    tracing::debug!("Dropping buffer received before caps");
                    return Ok(gst::FlowSuccess::Ok);
                }
                self.upload(buffer).map_err(|err| {
                    tracing::error!("Failed to upload buffer: {err}");
                    err.flow()
                })?;
            }
            WorkItem::Display => {
                self.display().map_err(|err| {
                    tracing::error!("Failed to draw frame: {err}");
                    err.flow()
                })?;
            }
        }
        Ok(gst::FlowSuccess::Ok)
    }

    fn configure(&mut self, caps: &gst::Caps) -> Result<(), RenderError> {
        let format = NegotiatedFormat::from_caps(caps, self.settings.platform)?;
        if let Some(configured) = &self.configured {
            if caps_compatible(&configured.caps, caps) {
                tracing::debug!("Caps {caps} compatible with current configuration");
                return Ok(());
            }
        }

        self.release_configuration();
        self.backend.gl.make_current()?;
        self.context.prepare(self.backend.gl.as_mut(), format.program)?;

        let cuda = if format.strategy == UploadStrategy::CudaInterop {
            Some(CudaInterop::init(
                &mut self.backend,
                self.settings.gpu_id,
                &format,
                &self.context.textures,
            )?)
        } else {
            None
        };

        tracing::info!(
            "Configured {}x{} {} with {:?} upload",
            format.width(),
            format.height(),
            format.info.format(),
            format.strategy
        );
        self.configured = Some(Configured {
            caps: caps.clone(),
            format,
            cuda,
        });
        Ok(())
    }

    fn release_configuration(&mut self) {
        self.set_last_uploaded(None);
        let Some(configured) = self.configured.take() else {
            return;
        };
        if let Some(interop) = configured.cuda {
            match self.backend.cuda.as_deref_mut() {
                Some(cuda) => interop.release(cuda),
                None => tracing::warn!("CUDA state without a CUDA driver"),
            }
        }
    }

    fn allocate(&mut self, request: &AllocationRequest) -> Result<(), RenderError> {
        let info = gst_video::VideoInfo::builder(request.format, request.width, request.height)
            .build()
            .map_err(|err| RenderError::UnsupportedFormat(err.to_string()))?;
        let specs = plane_specs(&info)?;

        let mut planes = Vec::with_capacity(specs.len());
        for spec in &specs {
            match self
                .backend
                .gl
                .create_image_plane(spec.channels, spec.width, spec.height)
            {
                Ok(plane) => planes.push(plane),
                Err(err) => {
                    self.destroy_images(planes);
                    return Err(err);
                }
            }
        }

        let mut buffer = gst::Buffer::from_mut_slice(vec![0u8; info.size()]);
        let meta = match buffer.get_mut() {
            Some(buffer) => gst_video::VideoMeta::add_full(
                buffer,
                gst_video::VideoFrameFlags::empty(),
                info.format(),
                info.width(),
                info.height(),
                info.offset(),
                info.stride(),
            )
            .map(|_| ())
            .map_err(|err| RenderError::UnsupportedFormat(err.to_string()))
            .and_then(|()| images::attach_handles(buffer, &planes)),
            None => Err(RenderError::Unavailable("writable buffer")),
        };
        if let Err(err) = meta {
            self.destroy_images(planes);
            return Err(err);
        }

        tracing::debug!(
            "Allocated {} EGLImage planes for {}x{} {}",
            planes.len(),
            info.width(),
            info.height(),
            info.format()
        );
        self.shared.images.insert(&buffer, planes);
        request.set_result(buffer);
        Ok(())
    }

    fn upload(&mut self, buffer: gst::Buffer) -> Result<(), RenderError> {
        let Some(configured) = self.configured.as_mut() else {
            return Ok(());
        };
        let textures = &self.context.textures;
        let format = &mut configured.format;
        let mut orientation = Orientation::Normal;
        let mut surface_mapped = false;

        match format.strategy {
            // System memory is written by the CPU, so its pixels are always copied.
            UploadStrategy::RawCopy => {
                if image::has_upload_meta(&buffer) {
                    orientation =
                        image::upload_with_meta(self.backend.gl.as_mut(), textures, &buffer)?;
                    format.stride_scale = [1.0; 4];
                } else {
                    raw::fill(self.backend.gl.as_mut(), textures, format, &buffer)?;
                }
            }
            UploadStrategy::ZeroCopyImport if format.external_target => {
                // The previous surface is bound to the same external texture.
                if let Some(previous) = self.last_uploaded.as_mut() {
                    unmap_surface(&mut self.backend, previous);
                }
                image::import_surface(&mut self.backend, &self.extensions, textures[0], &buffer)?;
                surface_mapped = true;
            }
            UploadStrategy::ZeroCopyImport => {
                let planes = self
                    .shared
                    .images
                    .lookup(&buffer)
                    .ok_or(RenderError::UnsupportedMemoryType("EGLImage from a foreign pool"))?;
                image::bind_pool_images(
                    self.backend.gl.as_mut(),
                    &self.extensions,
                    textures,
                    &planes,
                )?;
                format.stride_scale = [1.0; 4];
            }
            UploadStrategy::CudaInterop => {
                let interop = configured
                    .cuda
                    .as_mut()
                    .ok_or(RenderError::Unavailable("CUDA interop state"))?;
                interop.copy_frame(&mut self.backend, format, textures, &buffer)?;
            }
        }

        let region = orientation.apply(crop_region(&buffer, format.width(), format.height()));
        let pts = buffer.pts();
        self.set_last_uploaded(Some(UploadedFrame {
            buffer,
            surface_mapped,
            region,
            uploaded_at: Instant::now(),
        }));
        self.shared.presentation.content_changed(pts);
        Ok(())
    }

    fn display(&mut self) -> Result<(), RenderError> {
        if let Some(meter) = self.shared.jitter.lock().as_mut() {
            meter.tick();
        }

        let (Some(program), Some(configured), Some(frame)) = (
            self.context.program,
            self.configured.as_ref(),
            self.last_uploaded.as_mut(),
        ) else {
            return Ok(());
        };

        let (width, height) = if self.settings.force_aspect_ratio {
            configured.format.display_size()
        } else {
            (configured.format.width(), configured.format.height())
        };
        let textures = &self.context.textures;
        let texture = self.backend.gl.draw(&DrawParams {
            program,
            layout: configured.format.program,
            textures,
            stride_scale: &configured.format.stride_scale[..textures.len()],
            region: frame.region,
            width,
            height,
        })?;
        self.shared.presentation.set_front_texture(texture);

        if self.settings.show_latency {
            tracing::info!("Upload to draw latency: {:?}", frame.uploaded_at.elapsed());
        }
        if let Some(pool) = self.shared.pool.lock().as_ref() {
            pool.replace_last_buffer(Some(frame.buffer.clone()));
        }

        if frame.surface_mapped {
            frame.surface_mapped = false;
            image::release_surface(&mut self.backend, &frame.buffer)?;
        }
        Ok(())
    }

    fn set_last_uploaded(&mut self, frame: Option<UploadedFrame>) {
        if let Some(previous) = self.last_uploaded.as_mut() {
            unmap_surface(&mut self.backend, previous);
        }
        self.last_uploaded = frame;
    }

    fn destroy_images(&mut self, planes: Vec<ImagePlane>) {
        for plane in planes {
            self.backend.gl.destroy_image_plane(plane);
        }
    }

    fn destroy_released_images(&mut self) {
        let released = self.shared.images.take_released();
        if !released.is_empty() {
            tracing::trace!("Destroying {} released EGLImage planes", released.len());
            self.destroy_images(released);
        }
    }

    fn teardown(&mut self) {
        self.release_configuration();
        let planes = self.shared.images.take_all();
        self.destroy_images(planes);
        self.context.release(self.backend.gl.as_mut());
        self.shared.presentation.set_front_texture(0);
    }
}

fn unmap_surface(backend: &mut Backend, frame: &mut UploadedFrame) {
    if !frame.surface_mapped {
        return;
    }
    frame.surface_mapped = false;
    if let Err(err) = image::release_surface(backend, &frame.buffer) {
        tracing::warn!("Failed to unmap surface: {err}");
    }
}
