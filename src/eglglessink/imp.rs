use eglglescore::backend::egl::EglGles;
use eglglescore::backend::{Backend, BackendFactory, CudaApi, SurfaceApi};
use eglglescore::format::{
    EGL_IMAGE_FEATURE, EGL_IMAGE_FORMATS, GL_TEXTURE_UPLOAD_FEATURE, NVMM_FEATURE, NVMM_FORMATS,
    RAW_FORMATS,
};
use eglglescore::upload::image;
use eglglescore::{Presentation, RenderError, RenderSettings, RenderSink};
use gst::glib;
use gst::prelude::*;
use gst_base::prelude::*;
use gst::subclass::prelude::*;
use gst_base::subclass::prelude::*;
use gst_video::subclass::prelude::*;
use gst_video::VideoCapsBuilder;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use smithay::backend::drm::{DrmNode, NodeType};
use smithay::backend::egl::{EGLDevice, EGLDisplay};
use std::sync::Arc;

/// Context type other elements use to share our `EGLDisplay`.
const EGL_DISPLAY_CONTEXT: &str = "gst.egl.EGLDisplay";
const MIN_POOL_BUFFERS: u32 = 2;

static CAT: Lazy<gst::DebugCategory> = Lazy::new(|| {
    gst::DebugCategory::new(
        "nveglglessink",
        gst::DebugColorFlags::empty(),
        Some("EGL/GLES video sink"),
    )
});

/// EGL display on the device behind `render_node`, or on the first EGL device.
fn create_egl_display(render_node: Option<&str>) -> Result<EGLDisplay, String> {
    let mut devices = EGLDevice::enumerate().map_err(|e| format!("enumerate: {:?}", e))?;
    let device = match render_node {
        Some(path) => {
            let drm_node = DrmNode::from_path(path).map_err(|e| format!("DrmNode: {:?}", e))?;
            let drm_render = drm_node
                .node_with_type(NodeType::Render)
                .and_then(Result::ok)
                .unwrap_or(drm_node);
            devices
                .find(|d| d.try_get_render_node().unwrap_or_default() == Some(drm_render.clone()))
                .ok_or_else(|| format!("No EGLDevice for {path}"))?
        }
        None => devices
            .next()
            .ok_or_else(|| "No EGLDevice available".to_string())?,
    };
    unsafe { EGLDisplay::new(device).map_err(|e| format!("EGLDisplay: {:?}", e)) }
}

/// Everything the render thread needs, built on the render thread.
///
/// Logs through `tracing` like the rest of the render thread, which has no element to log against.
fn build_backend(display: &EGLDisplay) -> Result<Backend, RenderError> {
    let gl = EglGles::new(display)?;

    #[cfg(feature = "cuda")]
    let cuda = match eglglescore::backend::cuda::CudaDriver::load() {
        Ok(driver) => Some(Box::new(driver) as Box<dyn CudaApi>),
        Err(err) => {
            tracing::warn!("CUDA unavailable, NVMM interop disabled: {}", err);
            None
        }
    };
    #[cfg(not(feature = "cuda"))]
    let cuda: Option<Box<dyn CudaApi>> = None;

    #[cfg(any(feature = "tegra", feature = "cuda"))]
    let surfaces = match eglglescore::backend::nvbuf::NvBufSurfaceLib::load() {
        Ok(lib) => Some(Box::new(lib) as Box<dyn SurfaceApi>),
        Err(err) => {
            tracing::debug!("NvBufSurface unavailable: {}", err);
            None
        }
    };
    #[cfg(not(any(feature = "tegra", feature = "cuda")))]
    let surfaces: Option<Box<dyn SurfaceApi>> = None;

    Ok(Backend {
        gl: Box::new(gl),
        cuda,
        surfaces,
    })
}

#[derive(Debug, Clone)]
struct Settings {
    gpu_id: u32,
    profile: u32,
    show_latency: bool,
    force_aspect_ratio: bool,
    render_node: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gpu_id: 0,
            profile: 0,
            show_latency: false,
            force_aspect_ratio: true,
            render_node: None,
        }
    }
}

impl Settings {
    fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            gpu_id: self.gpu_id,
            profile: self.profile != 0,
            show_latency: self.show_latency,
            force_aspect_ratio: self.force_aspect_ratio,
            ..RenderSettings::default()
        }
    }
}

#[derive(Default)]
struct State {
    display: Option<Arc<EGLDisplay>>,
    /// Raw `EGLDisplay` answered to context queries, 0 while closed.
    display_handle: usize,
}

#[derive(Default)]
pub struct EglGlesSink {
    settings: Mutex<Settings>,
    state: Mutex<State>,
    sink: RenderSink,
}

impl EglGlesSink {
    pub(super) fn presentation(&self) -> Arc<Presentation> {
        self.sink.presentation()
    }

    fn open(&self) -> Result<(), gst::ErrorMessage> {
        let settings = self.settings.lock().clone();
        let display = create_egl_display(settings.render_node.as_deref()).map_err(|e| {
            gst::error_msg!(gst::LibraryError::Init, ("EGL display failed: {}", e))
        })?;
        let handle = display.get_display_handle().handle as usize;
        gst::info!(
            CAT,
            imp = self,
            "Opened EGL display 0x{:x} (render node: {:?})",
            handle,
            settings.render_node
        );

        {
            let obj = self.obj();
            let _lock = obj.object_lock();
            let mut state = self.state.lock();
            state.display = Some(Arc::new(display));
            state.display_handle = handle;
        }
        self.sink.open(settings.render_settings());
        Ok(())
    }

    fn start(&self) -> Result<(), gst::ErrorMessage> {
        let display = self.state.lock().display.clone().ok_or_else(|| {
            gst::error_msg!(gst::LibraryError::Init, ("EGL display not opened"))
        })?;
        let factory: BackendFactory = Box::new(move || build_backend(&display));
        self.sink.start(factory).map_err(|err| {
            gst::error_msg!(gst::LibraryError::Init, ("Render thread failed: {}", err))
        })?;
        gst::debug!(CAT, imp = self, "Render thread started");
        Ok(())
    }

    fn close(&self) {
        self.sink.close();
        let obj = self.obj();
        let _lock = obj.object_lock();
        let mut state = self.state.lock();
        state.display = None;
        state.display_handle = 0;
    }

    fn display_handle(&self) -> Option<usize> {
        let obj = self.obj();
        let _lock = obj.object_lock();
        let handle = self.state.lock().display_handle;
        (handle != 0).then_some(handle)
    }
}

#[glib::object_subclass]
impl ObjectSubclass for EglGlesSink {
    const NAME: &'static str = "GstVpfEglGlesSink";
    type Type = super::EglGlesSink;
    type ParentType = gst_video::VideoSink;
}

impl ObjectImpl for EglGlesSink {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: Lazy<Vec<glib::ParamSpec>> = Lazy::new(|| {
            vec![
                glib::ParamSpecUInt::builder("gpu-id")
                    .nick("GPU Device ID")
                    .blurb("CUDA device used for NVMM interop")
                    .default_value(0)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("profile")
                    .nick("Profile")
                    .blurb("Non-zero logs display jitter statistics on close")
                    .default_value(0)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecBoolean::builder("show-latency")
                    .nick("Show Latency")
                    .blurb("Log the upload to draw latency of every frame")
                    .default_value(false)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecBoolean::builder("force-aspect-ratio")
                    .nick("Force Aspect Ratio")
                    .blurb("Size the front texture by the pixel aspect ratio")
                    .default_value(true)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecString::builder("render-node")
                    .nick("DRM Render Node")
                    .blurb("DRM render node of the EGL device (first device if unset)")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("front-texture")
                    .nick("Front Texture")
                    .blurb("GL texture holding the last drawn frame")
                    .read_only()
                    .build(),
            ]
        });
        PROPERTIES.as_ref()
    }

    fn constructed(&self) {
        self.parent_constructed();
        self.sink.set_owner(self.obj().upcast_ref());
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut s = self.settings.lock();
        match pspec.name() {
            "gpu-id" => s.gpu_id = value.get().unwrap(),
            "profile" => s.profile = value.get().unwrap(),
            "show-latency" => s.show_latency = value.get().unwrap(),
            "force-aspect-ratio" => s.force_aspect_ratio = value.get().unwrap(),
            "render-node" => s.render_node = value.get().unwrap(),
            _ => {}
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        match pspec.name() {
            "front-texture" => self.sink.presentation().front_texture().to_value(),
            name => {
                let s = self.settings.lock();
                match name {
                    "gpu-id" => s.gpu_id.to_value(),
                    "profile" => s.profile.to_value(),
                    "show-latency" => s.show_latency.to_value(),
                    "force-aspect-ratio" => s.force_aspect_ratio.to_value(),
                    "render-node" => s.render_node.to_value(),
                    _ => unreachable!(),
                }
            }
        }
    }
}

impl GstObjectImpl for EglGlesSink {}

impl ElementImpl for EglGlesSink {
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static META: Lazy<gst::subclass::ElementMetadata> = Lazy::new(|| {
            gst::subclass::ElementMetadata::new(
                "EGL/GLES vout Sink",
                "Sink/Video",
                "Renders video into an offscreen EGL/GLES texture",
                "Helix Project",
            )
        });
        Some(&*META)
    }

    fn pad_templates() -> &'static [gst::PadTemplate] {
        static TEMPLATES: Lazy<Vec<gst::PadTemplate>> = Lazy::new(|| {
            let mut caps = gst::Caps::new_empty();
            caps.merge(
                VideoCapsBuilder::new()
                    .features([NVMM_FEATURE])
                    .format_list(NVMM_FORMATS.iter().copied())
                    .build(),
            );
            caps.merge(
                VideoCapsBuilder::new()
                    .features([EGL_IMAGE_FEATURE])
                    .format_list(EGL_IMAGE_FORMATS.iter().copied())
                    .build(),
            );
            caps.merge(
                VideoCapsBuilder::new()
                    .features([GL_TEXTURE_UPLOAD_FEATURE])
                    .format_list(RAW_FORMATS.iter().copied())
                    .build(),
            );
            caps.merge(
                VideoCapsBuilder::new()
                    .format_list(RAW_FORMATS.iter().copied())
                    .build(),
            );
            vec![gst::PadTemplate::new(
                "sink",
                gst::PadDirection::Sink,
                gst::PadPresence::Always,
                &caps,
            )
            .expect("valid sink pad template")]
        });
        TEMPLATES.as_ref()
    }

    fn change_state(
        &self,
        transition: gst::StateChange,
    ) -> Result<gst::StateChangeSuccess, gst::StateChangeError> {
        gst::debug!(CAT, imp = self, "Changing state: {:?}", transition);

        let prepared = match transition {
            gst::StateChange::NullToReady => self.open(),
            gst::StateChange::ReadyToPaused => self.start(),
            _ => Ok(()),
        };
        if let Err(err) = prepared {
            gst::error!(CAT, imp = self, "{:?} failed: {}", transition, err);
            self.post_error_message(err);
            return Err(gst::StateChangeError);
        }

        let success = self.parent_change_state(transition)?;

        match transition {
            gst::StateChange::PausedToReady => self.sink.stop(),
            gst::StateChange::ReadyToNull => self.close(),
            _ => {}
        }
        Ok(success)
    }
}

impl BaseSinkImpl for EglGlesSink {
    fn caps(&self, filter: Option<&gst::Caps>) -> Option<gst::Caps> {
        let caps = self.obj().sink_pad().pad_template_caps();
        Some(match filter {
            Some(filter) => filter.intersect_with_mode(&caps, gst::CapsIntersectMode::First),
            None => caps,
        })
    }

    fn set_caps(&self, caps: &gst::Caps) -> Result<(), gst::LoggableError> {
        gst::debug!(CAT, imp = self, "Configuring for caps {}", caps);
        self.sink
            .set_caps(caps)
            .map_err(|err| gst::loggable_error!(CAT, "Failed to configure {}: {}", caps, err))
    }

    fn propose_allocation(
        &self,
        query: &mut gst::query::Allocation,
    ) -> Result<(), gst::LoggableError> {
        let (caps, need_pool) = query.get();
        let caps = caps
            .ok_or_else(|| gst::loggable_error!(CAT, "Allocation query without caps"))?
            .to_owned();

        if need_pool {
            match self.sink.allocation_pool(&caps) {
                Ok(Some(pool)) => {
                    let size = pool.config().params().map(|(_, size, ..)| size).unwrap_or(0);
                    gst::debug!(CAT, imp = self, "Proposing EGLImage pool for {}", caps);
                    query.add_allocation_pool(Some(&pool), size, MIN_POOL_BUFFERS, 0);
                }
                Ok(None) => {
                    gst::debug!(CAT, imp = self, "No pool for {}", caps);
                }
                Err(err) => {
                    return Err(gst::loggable_error!(CAT, "No pool for {}: {}", caps, err));
                }
            }
        }

        query.add_allocation_param(None::<&gst::Allocator>, gst::AllocationParams::default());
        query.add_allocation_meta::<gst_video::VideoMeta>(None);
        query.add_allocation_meta::<gst_video::VideoCropMeta>(None);
        image::propose_upload_meta(query);
        Ok(())
    }

    fn query(&self, query: &mut gst::QueryRef) -> bool {
        if let gst::QueryViewMut::Context(q) = query.view_mut() {
            if q.context_type() == EGL_DISPLAY_CONTEXT {
                if let Some(handle) = self.display_handle() {
                    let mut context = gst::Context::new(EGL_DISPLAY_CONTEXT, true);
                    if let Some(context) = context.get_mut() {
                        context.structure_mut().set("display", handle as u64);
                    }
                    q.set_context(&context);
                    return true;
                }
            }
        }
        BaseSinkImplExt::parent_query(self, query)
    }

    fn prepare(&self, buffer: &gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError> {
        self.sink.prepare(buffer).inspect_err(|err| {
            if *err != gst::FlowError::Flushing {
                gst::error!(CAT, imp = self, "Uploading buffer failed: {:?}", err);
            }
        })
    }
}

impl VideoSinkImpl for EglGlesSink {
    fn show_frame(&self, _buffer: &gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError> {
        self.sink.show_frame().inspect_err(|err| {
            if *err != gst::FlowError::Flushing {
                gst::error!(CAT, imp = self, "Drawing frame failed: {:?}", err);
            }
        })
    }
}
