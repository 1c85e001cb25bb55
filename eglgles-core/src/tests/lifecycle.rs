use super::fake::{self, FakeConfig, FakeLog};
use super::{raw_buffer, raw_caps, settings, started_sink, test_init, video_info};
use crate::format::Platform;
use crate::jitter::{JitterMeter, WINDOW_TICKS};
use crate::queue::ThreadPhase;
use crate::render::RenderSettings;
use crate::sink::{Lifecycle, RenderSink};
use crate::RenderError;
use gst::prelude::*;
use gst_video::VideoFormat;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use test_log::test;

#[test]
fn lifecycle_follows_state_changes() {
    test_init();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let sink = RenderSink::new();
    assert_eq!(sink.lifecycle(), Lifecycle::Closed);
    assert_eq!(sink.phase(), ThreadPhase::Idle);

    sink.open(settings(Platform::Desktop));
    assert_eq!(sink.lifecycle(), Lifecycle::Opened);

    sink.start(fake::factory(log.clone(), FakeConfig::default()))
        .expect("render thread starts");
    assert_eq!(sink.lifecycle(), Lifecycle::Started);
    assert_eq!(log.lock().make_current, 1);

    sink.stop();
    assert_eq!(sink.lifecycle(), Lifecycle::Opened);
    assert_eq!(sink.show_frame(), Err(gst::FlowError::Flushing));

    sink.close();
    assert_eq!(sink.lifecycle(), Lifecycle::Closed);
    assert_eq!(sink.phase(), ThreadPhase::Exited);
}

#[test]
fn failed_startup_reports_and_exits() {
    test_init();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let sink = RenderSink::new();
    sink.open(settings(Platform::Desktop));

    let config = FakeConfig {
        fail_bind_api: true,
        ..FakeConfig::default()
    };
    let err = sink
        .start(fake::factory(log.clone(), config))
        .expect_err("eglBindAPI fails");
    assert!(matches!(err, RenderError::Thread(_)), "{err}");
    assert_eq!(sink.phase(), ThreadPhase::Exited);
    assert_eq!(sink.lifecycle(), Lifecycle::Opened);
    assert_eq!(log.lock().make_current, 0);
    assert_eq!(sink.show_frame(), Err(gst::FlowError::Flushing));
}

#[test]
fn stop_releases_a_blocked_producer() {
    let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
    let config = FakeConfig {
        draw_gate: Some(gate_rx),
        ..FakeConfig::default()
    };
    let (sink, _log) = started_sink(Platform::Desktop, config);
    let sink = Arc::new(sink);
    sink.set_caps(&raw_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");
    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());

    let producer = {
        let sink = sink.clone();
        thread::spawn(move || sink.show_frame())
    };
    // Let the draw start and block on the gate.
    thread::sleep(Duration::from_millis(50));
    assert!(!producer.is_finished());

    sink.stop();
    assert_eq!(
        producer.join().expect("producer thread"),
        Err(gst::FlowError::Flushing)
    );

    let _ = gate_tx.send(());
    sink.close();
    assert_eq!(sink.phase(), ThreadPhase::Exited);
}

#[test]
fn stop_clears_the_shown_buffer() {
    let (sink, _log) = started_sink(Platform::Desktop, FakeConfig::default());
    sink.set_caps(&raw_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");
    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());
    assert!(sink.show_frame().is_ok());

    let pool = sink.pool().expect("raw caps get a pool");
    assert!(pool.last_buffer().is_some());

    sink.stop();
    assert!(pool.last_buffer().is_none());
    assert!(sink.current_caps().is_none());
}

#[test]
fn sink_restarts_after_stop() {
    let (sink, log) = started_sink(Platform::Desktop, FakeConfig::default());
    let caps = raw_caps(VideoFormat::Rgba, 64, 32);
    sink.set_caps(&caps).expect("caps accepted");
    sink.stop();

    sink.start(fake::factory(log.clone(), FakeConfig::default()))
        .expect("render thread restarts");
    assert_eq!(sink.phase(), ThreadPhase::Running);
    {
        // The first thread tore everything down before the second one started.
        let log = log.lock();
        assert!(log.textures.is_empty());
        assert!(log.programs.is_empty());
    }

    sink.set_caps(&caps).expect("caps accepted again");
    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());
    assert!(sink.show_frame().is_ok());
    assert_eq!(log.lock().draws, 1);
    assert_eq!(log.lock().layouts.len(), 2);
}

#[test]
fn panic_on_the_render_thread_fails_the_waiting_producer() {
    let config = FakeConfig {
        panic_in_draw: true,
        ..FakeConfig::default()
    };
    let (sink, log) = started_sink(Platform::Desktop, config);
    sink.set_caps(&raw_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");
    let info = video_info(VideoFormat::Rgba, 64, 32, 30);
    assert!(sink.prepare(&raw_buffer(&info, 0)).is_ok());

    assert_eq!(sink.show_frame(), Err(gst::FlowError::Error));
    assert_eq!(sink.show_frame(), Err(gst::FlowError::Error));

    sink.stop();
    sink.close();
    assert_eq!(sink.phase(), ThreadPhase::Exited);
    assert!(log.lock().textures.is_empty());
}

fn next_stream_status(bus: &gst::Bus) -> gst::StreamStatusType {
    let message = bus
        .timed_pop_filtered(
            gst::ClockTime::from_seconds(5),
            &[gst::MessageType::StreamStatus],
        )
        .expect("stream status message");
    match message.view() {
        gst::MessageView::StreamStatus(status) => status.get().0,
        _ => unreachable!(),
    }
}

/// Pipeline in READY, so its bus delivers what the render thread posts.
fn owner_with_bus() -> (gst::Pipeline, gst::Bus) {
    let pipeline = gst::Pipeline::new();
    pipeline
        .set_state(gst::State::Ready)
        .expect("empty pipeline reaches READY");
    let bus = pipeline.bus().expect("pipeline bus");
    (pipeline, bus)
}

#[test]
fn render_thread_posts_enter_and_leave() {
    test_init();
    let (pipeline, bus) = owner_with_bus();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let sink = RenderSink::new();
    sink.set_owner(pipeline.upcast_ref());
    sink.open(settings(Platform::Desktop));

    sink.start(fake::factory(log.clone(), FakeConfig::default()))
        .expect("render thread starts");
    assert_eq!(next_stream_status(&bus), gst::StreamStatusType::Enter);

    sink.stop();
    sink.close();
    assert_eq!(next_stream_status(&bus), gst::StreamStatusType::Leave);
    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn failed_startup_still_posts_leave() {
    test_init();
    let (pipeline, bus) = owner_with_bus();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let sink = RenderSink::new();
    sink.set_owner(pipeline.upcast_ref());
    sink.open(settings(Platform::Desktop));

    let config = FakeConfig {
        fail_bind_api: true,
        ..FakeConfig::default()
    };
    assert!(sink.start(fake::factory(log, config)).is_err());
    assert_eq!(next_stream_status(&bus), gst::StreamStatusType::Enter);
    assert_eq!(next_stream_status(&bus), gst::StreamStatusType::Leave);
    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn profiling_records_display_ticks() {
    test_init();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let sink = RenderSink::new();
    sink.open(RenderSettings {
        profile: true,
        ..settings(Platform::Desktop)
    });
    sink.start(fake::factory(log.clone(), FakeConfig::default()))
        .expect("render thread starts");
    sink.set_caps(&raw_caps(VideoFormat::Rgba, 64, 32))
        .expect("caps accepted");

    for _ in 0..=WINDOW_TICKS {
        assert!(sink.show_frame().is_ok());
    }
    sink.stop();
    sink.close();
    assert_eq!(sink.lifecycle(), Lifecycle::Closed);
}

#[test]
fn jitter_windows_summarize_tick_spacing() {
    let start = Instant::now();
    let mut meter = JitterMeter::new("test");
    assert_eq!(meter.stats().windows, 0);

    for i in 0..=WINDOW_TICKS as u64 {
        meter.tick_at(start + Duration::from_millis(10 * i));
    }
    let stats = meter.stats();
    assert_eq!(stats.windows, 1);
    assert!((stats.average_us - 10_000.0).abs() < 1.0);
    assert!(stats.std_dev_us < 1.0);
    assert!((stats.highest_us - 10_000.0).abs() < 1.0);
}

#[test]
fn jitter_reports_uneven_spacing() {
    let start = Instant::now();
    let mut meter = JitterMeter::new("test");

    let mut at = start;
    meter.tick_at(at);
    for i in 0..WINDOW_TICKS {
        at += Duration::from_millis(if i % 2 == 0 { 5 } else { 15 });
        meter.tick_at(at);
    }
    let stats = meter.stats();
    assert_eq!(stats.windows, 1);
    assert!((stats.average_us - 10_000.0).abs() < 1.0);
    assert!((stats.std_dev_us - 5_000.0).abs() < 1.0);
}
