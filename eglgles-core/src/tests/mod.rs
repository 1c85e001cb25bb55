use crate::format::{Platform, NVMM_FEATURE};
use crate::nvbufsurface::{NvBufSurface, NvBufSurfaceMemType, NvBufSurfaceParams};
use crate::render::RenderSettings;
use crate::sink::RenderSink;
use fake::{FakeConfig, FakeLog};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::{Arc, Once};

mod fake;
mod lifecycle;
mod render;

static INIT: Once = Once::new();

pub fn test_init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt::try_init().ok();
        gst::init().expect("Failed to initialize GStreamer");
    });
}

pub fn video_info(format: gst_video::VideoFormat, width: u32, height: u32, fps: i32) -> gst_video::VideoInfo {
    gst_video::VideoInfo::builder(format, width, height)
        .fps(gst::Fraction::new(fps, 1))
        .build()
        .expect("valid video info")
}

pub fn raw_caps(format: gst_video::VideoFormat, width: u32, height: u32) -> gst::Caps {
    raw_caps_at(format, width, height, 30)
}

pub fn raw_caps_at(format: gst_video::VideoFormat, width: u32, height: u32, fps: i32) -> gst::Caps {
    video_info(format, width, height, fps)
        .to_caps()
        .expect("caps from video info")
}

pub fn featured_caps(
    feature: &str,
    format: gst_video::VideoFormat,
    width: u32,
    height: u32,
    fps: i32,
) -> gst::Caps {
    let mut caps = raw_caps_at(format, width, height, fps);
    caps.get_mut()
        .expect("fresh caps are writable")
        .set_features(0, Some(gst::CapsFeatures::new([feature])));
    caps
}

pub fn nvmm_caps(format: gst_video::VideoFormat, width: u32, height: u32) -> gst::Caps {
    featured_caps(NVMM_FEATURE, format, width, height, 30)
}

/// A system-memory frame filled with `fill`.
pub fn raw_buffer(info: &gst_video::VideoInfo, fill: u8) -> gst::Buffer {
    gst::Buffer::from_mut_slice(vec![fill; info.size()])
}

/// An NVMM descriptor buffer. `params` must outlive every use of `buffer`.
pub struct NvmmFrame {
    pub buffer: gst::Buffer,
    _params: Box<NvBufSurfaceParams>,
}

pub fn nvmm_buffer(
    batch_size: u32,
    mem_type: NvBufSurfaceMemType,
    info: &gst_video::VideoInfo,
) -> NvmmFrame {
    let mut params: Box<NvBufSurfaceParams> = Box::new(unsafe { std::mem::zeroed() });
    params.width = info.width();
    params.height = info.height();
    params.pitch = info.stride()[0] as u32;
    params.dataPtr = 0x10_0000 as *mut c_void;
    params.planeParams.num_planes = info.n_planes();
    for plane in 0..info.n_planes() as usize {
        params.planeParams.pitch[plane] = info.stride()[plane] as u32;
        params.planeParams.offset[plane] = info.offset()[plane] as u32;
    }

    let mut surface: NvBufSurface = unsafe { std::mem::zeroed() };
    surface.batchSize = batch_size;
    surface.numFilled = batch_size;
    surface.memType = mem_type as u32;
    surface.surfaceList = &mut *params;

    let bytes = unsafe {
        std::slice::from_raw_parts(
            &surface as *const NvBufSurface as *const u8,
            std::mem::size_of::<NvBufSurface>(),
        )
    }
    .to_vec();

    NvmmFrame {
        buffer: gst::Buffer::from_mut_slice(bytes),
        _params: params,
    }
}

pub fn settings(platform: Platform) -> RenderSettings {
    RenderSettings {
        platform,
        ..RenderSettings::default()
    }
}

pub fn started_sink(platform: Platform, config: FakeConfig) -> (RenderSink, Arc<Mutex<FakeLog>>) {
    test_init();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let sink = RenderSink::new();
    sink.open(settings(platform));
    sink.start(fake::factory(log.clone(), config))
        .expect("render thread starts");
    (sink, log)
}
