use super::fake::FakeConfig;
use super::{nvmm_buffer, nvmm_caps, raw_buffer, raw_caps, raw_caps_at, started_sink, test_init, video_info};
use crate::backend::SampleRegion;
use crate::format::{
    caps_compatible, NegotiatedFormat, Platform, ProgramLayout, Swizzle, UploadStrategy,
};
use crate::nvbufsurface::NvBufSurfaceMemType;
use crate::queue::ThreadPhase;
use gst_video::VideoFormat;
use test_log::test;

#[test]
fn raw_frame_reaches_the_front_texture() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    let caps = raw_caps(VideoFormat::Rgba, 1920, 1080);
    sink.set_caps(&caps).expect("caps accepted");

    let info = video_info(VideoFormat::Rgba, 1920, 1080, 30);
    let mut frame = raw_buffer(&info, 0x80);
    frame
        .get_mut()
        .expect("fresh buffer")
        .set_pts(gst::ClockTime::from_seconds(1));
    let events = sink.presentation().subscribe();

    assert_eq!(sink.prepare(&frame), Ok(gst::FlowSuccess::Ok));
    assert_eq!(sink.show_frame(), Ok(gst::FlowSuccess::Ok));

    let presentation = sink.presentation();
    assert_eq!(presentation.front_texture(), 0xf00);
    assert_eq!(presentation.frames(), 1);
    let event = events.try_recv().expect("frame notification");
    assert_eq!(event.sequence, 1);
    assert_eq!(event.pts, Some(gst::ClockTime::from_seconds(1)));

    let shown = sink
        .pool()
        .and_then(|pool| pool.last_buffer())
        .expect("pool holds the shown buffer");
    assert_eq!(shown.as_ptr(), frame.as_ptr());

    let log = log.lock();
    assert_eq!(log.draws, 1);
    assert_eq!(log.uploads.len(), 1);
    assert_eq!(log.uploads[0].width, 1920);
    assert_eq!(log.uploads[0].alignment, 4);
    assert_eq!(log.last_stride_scale, vec![1.0]);
    assert_eq!(log.last_region, Some(SampleRegion::default()));
    assert_eq!(sink.current_caps(), Some(caps));
}

#[test]
fn buffer_before_caps_is_dropped() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    let info = video_info(VideoFormat::Rgba, 64, 32, 30);

    assert_eq!(sink.prepare(&raw_buffer(&info, 0)), Ok(gst::FlowSuccess::Ok));
    assert_eq!(sink.show_frame(), Ok(gst::FlowSuccess::Ok));
    assert_eq!(sink.presentation().front_texture(), 0);
    assert_eq!(sink.presentation().frames(), 0);
    assert!(log.lock().uploads.is_empty());
    assert_eq!(log.lock().draws, 0);
}

#[test]
fn compatible_caps_keep_gpu_state() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&raw_caps_at(VideoFormat::Rgba, 64, 32, 30))
        .expect("first caps");
    let textures = log.lock().textures.clone();

    sink.set_caps(&raw_caps_at(VideoFormat::Rgba, 64, 32, 60))
        .expect("second caps");

    let log = log.lock();
    assert_eq!(log.layouts, vec![ProgramLayout::Copy]);
    assert_eq!(log.programs.len(), 1);
    assert_eq!(log.textures, textures);
}

#[test]
fn compatible_nvmm_caps_keep_cuda_registrations() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&super::featured_caps(
        crate::format::NVMM_FEATURE,
        VideoFormat::Nv12,
        64,
        32,
        30,
    ))
    .expect("first caps");
    assert_eq!(log.lock().registrations, 2);

    sink.set_caps(&super::featured_caps(
        crate::format::NVMM_FEATURE,
        VideoFormat::Nv12,
        64,
        32,
        25,
    ))
    .expect("second caps");

    let log = log.lock();
    assert_eq!(log.registrations, 2);
    assert_eq!(log.registered.len(), 2);
    assert_eq!(log.contexts.len(), 1);
    assert!(sink.pool().is_none());
}

#[test]
fn format_change_rebuilds_program_and_textures() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&raw_caps(VideoFormat::I420, 64, 32))
        .expect("I420 caps");
    assert_eq!(log.lock().textures.len(), 3);

    sink.set_caps(&raw_caps(VideoFormat::Nv12, 64, 32))
        .expect("NV12 caps");

    let log = log.lock();
    assert_eq!(
        log.layouts,
        vec![
            ProgramLayout::PlanarYuv,
            ProgramLayout::SemiPlanar { swap_uv: false }
        ]
    );
    assert_eq!(log.programs.len(), 1);
    assert_eq!(log.textures.len(), 2);
}

#[test]
fn planar_upload_uses_one_texture_per_plane() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&raw_caps(VideoFormat::Yv12, 64, 32))
        .expect("YV12 caps");

    let info = video_info(VideoFormat::Yv12, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0x10)).is_ok());

    let log = log.lock();
    let sizes: Vec<_> = log.uploads.iter().map(|u| (u.unit, u.width, u.height)).collect();
    assert_eq!(sizes, vec![(0, 64, 32), (1, 32, 16), (2, 32, 16)]);
}

#[test]
fn crop_meta_selects_the_sampled_region() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&raw_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");

    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    let mut frame = raw_buffer(&info, 0);
    gst_video::VideoCropMeta::add(frame.get_mut().expect("fresh buffer"), (16, 16, 32, 16));

    assert!(sink.prepare(&frame).is_ok());
    assert!(sink.show_frame().is_ok());
    assert_eq!(
        log.lock().last_region,
        Some(SampleRegion {
            x: 0.25,
            y: 0.5,
            width: 0.5,
            height: 0.5,
        })
    );
}

#[test]
fn display_without_a_frame_is_a_no_op() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&raw_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");

    assert_eq!(sink.show_frame(), Ok(gst::FlowSuccess::Ok));
    assert_eq!(log.lock().draws, 0);
    assert_eq!(sink.phase(), ThreadPhase::Running);
}

#[test]
fn unsupported_caps_are_rejected_before_the_render_thread() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());

    let err = sink
        .set_caps(&nvmm_caps(VideoFormat::Ayuv, 64, 32))
        .expect_err("AYUV is not copyable from CUDA memory");
    assert!(matches!(err, crate::RenderError::Negotiation(_)));
    assert!(log.lock().layouts.is_empty());
    assert_eq!(sink.phase(), ThreadPhase::Running);
}

#[test]
fn failed_item_stops_the_render_thread() {
    let (sink, _log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&nvmm_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");

    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    let frame = nvmm_buffer(1, NvBufSurfaceMemType::SurfaceArray, &info);
    assert_eq!(sink.prepare(&frame.buffer), Err(gst::FlowError::Error));
    assert_eq!(sink.show_frame(), Err(gst::FlowError::Error));

    sink.close();
    assert_eq!(sink.phase(), ThreadPhase::Exited);
}

#[test]
fn teardown_releases_every_gpu_object() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&nvmm_caps(VideoFormat::I420, 64, 32))
        .expect("caps accepted");
    {
        let log = log.lock();
        assert_eq!(log.textures.len(), 3);
        assert_eq!(log.registered.len(), 3);
    }

    sink.stop();
    sink.close();

    let log = log.lock();
    assert!(log.textures.is_empty());
    assert!(log.programs.is_empty());
    assert!(log.registered.is_empty());
    assert!(log.contexts.is_empty());
    assert_eq!(sink.presentation().front_texture(), 0);
}

#[test]
fn strategy_follows_memory_and_platform() {
    test_init();
    let cases = [
        (raw_caps(VideoFormat::Rgba, 64, 32), Platform::Desktop, UploadStrategy::RawCopy),
        (raw_caps(VideoFormat::Rgba, 64, 32), Platform::Tegra, UploadStrategy::RawCopy),
        (
            nvmm_caps(VideoFormat::Nv12, 64, 32),
            Platform::Desktop,
            UploadStrategy::CudaInterop,
        ),
        (
            nvmm_caps(VideoFormat::Nv12, 64, 32),
            Platform::Tegra,
            UploadStrategy::ZeroCopyImport,
        ),
        (
            super::featured_caps(
                crate::format::EGL_IMAGE_FEATURE,
                VideoFormat::Rgba,
                64,
                32,
                30,
            ),
            Platform::Desktop,
            UploadStrategy::ZeroCopyImport,
        ),
    ];

    for (caps, platform, expected) in cases {
        let format = NegotiatedFormat::from_caps(&caps, platform).expect("supported caps");
        assert_eq!(format.strategy, expected, "{caps} on {platform:?}");
    }

    let tegra = NegotiatedFormat::from_caps(&nvmm_caps(VideoFormat::Nv12, 64, 32), Platform::Tegra)
        .expect("supported caps");
    assert!(tegra.external_target);
    assert_eq!(tegra.program, ProgramLayout::External);
}

#[test]
fn packed_formats_pick_their_swizzle() {
    test_init();
    let layout = |format| ProgramLayout::for_format(format).expect("supported format");
    assert_eq!(layout(VideoFormat::Rgbx), ProgramLayout::Copy);
    assert_eq!(layout(VideoFormat::Bgr), ProgramLayout::Reorder(Swizzle::Bgr));
    assert_eq!(layout(VideoFormat::Xrgb), ProgramLayout::Reorder(Swizzle::Gba));
    assert_eq!(layout(VideoFormat::Abgr), ProgramLayout::Reorder(Swizzle::Abg));
    assert_eq!(
        layout(VideoFormat::Nv21),
        ProgramLayout::SemiPlanar { swap_uv: true }
    );
    assert!(ProgramLayout::for_format(VideoFormat::Gray8).is_err());
}

#[test]
fn framerate_does_not_affect_compatibility() {
    test_init();
    assert!(caps_compatible(
        &raw_caps_at(VideoFormat::Nv12, 64, 32, 30),
        &raw_caps_at(VideoFormat::Nv12, 64, 32, 60),
    ));
    assert!(!caps_compatible(
        &raw_caps(VideoFormat::Nv12, 64, 32),
        &raw_caps(VideoFormat::Nv12, 128, 32),
    ));
    assert!(!caps_compatible(
        &raw_caps(VideoFormat::Nv12, 64, 32),
        &nvmm_caps(VideoFormat::Nv12, 64, 32),
    ));
}

fn caps_with_par(par: gst::Fraction) -> gst::Caps {
    gst_video::VideoInfo::builder(VideoFormat::Rgba, 64, 32)
        .fps(gst::Fraction::new(30, 1))
        .par(par)
        .build()
        .expect("valid video info")
        .to_caps()
        .expect("caps from video info")
}

#[test]
fn pixel_aspect_ratio_stretches_the_front_texture() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&caps_with_par(gst::Fraction::new(2, 1)))
        .expect("caps accepted");
    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());
    assert!(sink.show_frame().is_ok());
    assert_eq!(log.lock().last_size, Some((128, 32)));

    sink.set_caps(&caps_with_par(gst::Fraction::new(1, 2)))
        .expect("caps accepted");
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());
    assert!(sink.show_frame().is_ok());
    assert_eq!(log.lock().last_size, Some((64, 64)));
}

#[test]
fn aspect_ratio_is_ignored_when_not_forced() {
    test_init();
    let log = std::sync::Arc::new(parking_lot::Mutex::new(super::fake::FakeLog::default()));
    let sink = crate::sink::RenderSink::new();
    sink.open(crate::render::RenderSettings {
        force_aspect_ratio: false,
        ..super::settings(Platform::Desktop)
    });
    sink.start(super::fake::factory(log.clone(), FakeConfig::default()))
        .expect("render thread starts");
    sink.set_caps(&caps_with_par(gst::Fraction::new(2, 1)))
        .expect("caps accepted");

    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());
    assert!(sink.show_frame().is_ok());
    assert_eq!(log.lock().last_size, Some((64, 32)));
}
