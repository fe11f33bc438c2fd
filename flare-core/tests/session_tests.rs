//! Integration tests for the capture session over the software backend

mod mocks;

use flare_core::backend::SoftwareBackend;
use flare_core::{BackendKind, CaptureConfig, CaptureError, CaptureSession, PixelFormat, SessionState};
use mocks::{monitor, window, MockGrabber};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn session_with(grabber: MockGrabber) -> CaptureSession {
    CaptureSession::with_backend(Box::new(SoftwareBackend::new(grabber)))
}

/// Error callback that records every (message, code) pair
fn record_errors(session: &CaptureSession) -> Arc<Mutex<Vec<(String, i32)>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    session
        .on_error(move |message, code| sink.lock().push((message.to_string(), code)))
        .unwrap();
    errors
}

/// Frame callback recording lengths and arrival times, stopping after `limit`
fn record_frames(session: &CaptureSession, limit: usize) -> Arc<Mutex<Vec<(usize, Instant)>>> {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let stop = session.stop_handle();
    session
        .on_frame(move |data, len| {
            assert_eq!(data.len() as u64, len);
            let mut frames = sink.lock();
            frames.push((data.len(), Instant::now()));
            if frames.len() >= limit {
                stop.stop();
            }
        })
        .unwrap();
    frames
}

fn lengths(frames: &Mutex<Vec<(usize, Instant)>>) -> Vec<usize> {
    frames.lock().iter().map(|(len, _)| *len).collect()
}

/// Average interval between consecutive deliveries in milliseconds
fn average_interval_ms(frames: &Mutex<Vec<(usize, Instant)>>) -> f64 {
    let frames = frames.lock();
    let first = frames.first().unwrap().1;
    let last = frames.last().unwrap().1;
    last.duration_since(first).as_secs_f64() * 1000.0 / (frames.len() - 1) as f64
}

#[test]
fn test_yuv420p_frame_length() {
    let session = session_with(MockGrabber::with_monitors(1));
    session
        .configure(CaptureConfig::native().with_resolution(640, 480).with_refresh_rate(0))
        .unwrap();
    let frames = record_frames(&session, 5);

    session.load().unwrap();
    session.start_capture().unwrap();

    let lens = lengths(&frames);
    assert_eq!(lens.len(), 5);
    assert!(lens.iter().all(|&len| len == 640 * 480 * 3 / 2));
}

#[test]
fn test_yuv444p_frame_length() {
    let session = session_with(MockGrabber::with_monitors(1));
    session
        .configure(
            CaptureConfig::native()
                .with_resolution(640, 480)
                .with_refresh_rate(0)
                .with_pixel_format(PixelFormat::Yuv444p),
        )
        .unwrap();
    let frames = record_frames(&session, 5);

    session.load().unwrap();
    session.start_capture().unwrap();

    assert!(lengths(&frames).iter().all(|&len| len == 640 * 480 * 3));
}

#[test]
fn test_native_1080p_yuv420p() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.set_refresh_rate(60).unwrap();
    let frames = record_frames(&session, 3);

    session.load().unwrap();
    session.start_capture().unwrap();

    let lens = lengths(&frames);
    assert_eq!(lens.len(), 3);
    assert!(lens.iter().all(|&len| len == 3_110_400));
}

#[test]
#[cfg_attr(debug_assertions, ignore = "1080p conversion is too slow for 60 fps in debug builds")]
fn test_native_1080p_yuv420p_paced_at_60fps() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.set_refresh_rate(60).unwrap();
    let frames = record_frames(&session, 31);

    session.load().unwrap();
    session.start_capture().unwrap();

    assert!(lengths(&frames).iter().all(|&len| len == 3_110_400));
    let average = average_interval_ms(&frames);
    assert!(
        (15.0..=18.33).contains(&average),
        "average interval {:.2}ms, expected 16.67ms +/- 10%",
        average
    );
}

#[test]
fn test_1080p_scaled_to_720p() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.set_resolution(1280, 720).unwrap();
    let frames = record_frames(&session, 3);

    session.load().unwrap();
    session.start_capture().unwrap();

    assert!(lengths(&frames).iter().all(|&len| len == 1_382_400));
}

#[test]
fn test_solid_frame_converts_to_flat_planes() {
    let grabber = MockGrabber::new(vec![monitor(0, 64, 48)]).color([40, 160, 220, 255]);
    let session = session_with(grabber);
    session.set_refresh_rate(0).unwrap();

    let planes = Arc::new(Mutex::new(Vec::new()));
    let sink = planes.clone();
    let stop = session.stop_handle();
    session
        .on_frame(move |data, _| {
            let luma = &data[..64 * 48];
            let chroma = &data[64 * 48..];
            sink.lock().push((
                luma.iter().all(|&y| y == luma[0]),
                chroma[..32 * 24].iter().all(|&u| u == chroma[0]),
            ));
            stop.stop();
        })
        .unwrap();

    session.load().unwrap();
    session.start_capture().unwrap();

    assert_eq!(*planes.lock(), vec![(true, true)]);
}

#[test]
fn test_enumeration_is_idempotent() {
    let grabber = MockGrabber::new(vec![
        monitor(0, 1920, 1080),
        monitor(1, 2560, 1440),
        window("Terminal", 0x400001, 800, 600),
        window("Terminal", 0x400002, 800, 600),
    ]);
    let session = session_with(grabber);

    let first = session.list_sources().unwrap();
    let second = session.refresh_sources().unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec!["Monitor-0", "Monitor-1", "Terminal", "Terminal (2)"]
    );
}

#[test]
fn test_list_sources_enumerates_once() {
    let grabber = MockGrabber::with_monitors(2);
    let stats = grabber.stats();
    let session = session_with(grabber);

    session.list_sources().unwrap();
    session.list_sources().unwrap();
    assert_eq!(stats.lock().enumerations, 1);

    session.refresh_sources().unwrap();
    assert_eq!(stats.lock().enumerations, 2);
}

#[test]
fn test_pacing_converges_to_refresh_rate() {
    let session = session_with(MockGrabber::new(vec![monitor(0, 320, 240)]));
    session.set_refresh_rate(50).unwrap();
    let frames = record_frames(&session, 26);

    session.load().unwrap();
    session.start_capture().unwrap();

    let average = average_interval_ms(&frames);
    assert!(
        (18.0..=22.0).contains(&average),
        "average interval {:.2}ms, expected 20ms +/- 10%",
        average
    );
}

#[test]
fn test_uncapped_runs_back_to_back() {
    let session = session_with(MockGrabber::new(vec![monitor(0, 64, 64)]));
    session.set_refresh_rate(0).unwrap();
    let frames = record_frames(&session, 100);

    session.load().unwrap();
    let started = Instant::now();
    session.start_capture().unwrap();

    // 100 frames at even 60 fps would take over 1.6s
    assert_eq!(frames.lock().len(), 100);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_at_most_one_frame_in_flight() {
    let grabber = MockGrabber::new(vec![monitor(0, 64, 64)]);
    let stats = grabber.stats();
    let session = session_with(grabber);
    session.set_refresh_rate(0).unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let stop = session.stop_handle();
    {
        let delivered = delivered.clone();
        let active = active.clone();
        let violations = violations.clone();
        session
            .on_frame(move |_, _| {
                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                let count = delivered.fetch_add(1, Ordering::SeqCst) + 1;
                // The loop may have grabbed the next frame but not produced it
                if stats.lock().grabs > count as u64 + 1 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(25));
                active.fetch_sub(1, Ordering::SeqCst);
                if count >= 6 {
                    stop.stop();
                }
            })
            .unwrap();
    }

    session.load().unwrap();
    session.start_capture().unwrap();

    assert_eq!(delivered.load(Ordering::SeqCst), 6);
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_no_callbacks_after_stop() {
    let grabber = MockGrabber::new(vec![monitor(0, 64, 64)]).fail_after(40);
    let session = Arc::new(session_with(grabber));
    session.set_refresh_rate(0).unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    {
        let delivered = delivered.clone();
        session
            .on_frame(move |_, _| {
                delivered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
            })
            .unwrap();
        let errors = errors.clone();
        session
            .on_error(move |_, _| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    session.load().unwrap();

    let runner = {
        let session = session.clone();
        thread::spawn(move || session.start_capture())
    };
    while delivered.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(1));
    }

    session.stop_capture();
    let frames_at_stop = delivered.load(Ordering::SeqCst);
    let errors_at_stop = errors.load(Ordering::SeqCst);

    runner.join().unwrap().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(delivered.load(Ordering::SeqCst), frames_at_stop);
    assert_eq!(errors.load(Ordering::SeqCst), errors_at_stop);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_selecting_unknown_source_reports_error() {
    let session = session_with(MockGrabber::with_monitors(2));
    let errors = record_errors(&session);
    session.load().unwrap();
    session.select_source("Monitor-1").unwrap();

    let err = session.select_source("Monitor-9").unwrap_err();
    assert!(matches!(err, CaptureError::SourceNotFound(_)));

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_ne!(errors[0].1, 0);
    assert_eq!(errors[0].1, err.code());
    assert!(errors[0].0.contains("Monitor-9"));
    assert_eq!(session.selected_source().unwrap().name, "Monitor-1");
}

#[test]
fn test_selection_change_after_load_reloads() {
    let grabber = MockGrabber::new(vec![monitor(0, 64, 64), monitor(1, 128, 96)]);
    let stats = grabber.stats();
    let session = session_with(grabber);
    session.set_refresh_rate(0).unwrap();
    let frames = record_frames(&session, 1);

    session.load().unwrap();
    session.select_source("Monitor-1").unwrap();
    session.start_capture().unwrap();

    assert_eq!(stats.lock().last_attached.as_deref(), Some("Monitor-1"));
    assert_eq!(lengths(&frames), vec![128 * 96 * 3 / 2]);
}

#[test]
fn test_start_before_load_is_invalid() {
    let session = session_with(MockGrabber::with_monitors(1));
    let errors = record_errors(&session);
    session.on_frame(|_, _| {}).unwrap();

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState(_)));
    assert_eq!(errors.lock()[0].1, -4);
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn test_start_without_frame_handler_is_invalid() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.load().unwrap();

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState(_)));
    assert_eq!(session.state(), SessionState::Loaded);
}

#[test]
fn test_handlers_frozen_after_load() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.on_frame(|_, _| {}).unwrap();
    session.load().unwrap();

    assert!(matches!(
        session.on_frame(|_, _| {}),
        Err(CaptureError::InvalidState(_))
    ));
    assert!(matches!(
        session.on_error(|_, _| {}),
        Err(CaptureError::InvalidState(_))
    ));
}

#[test]
fn test_restart_requires_load() {
    let grabber = MockGrabber::new(vec![monitor(0, 64, 64)]);
    let stats = grabber.stats();
    let session = session_with(grabber);
    session.set_refresh_rate(0).unwrap();
    let frames = record_frames(&session, 2);

    session.load().unwrap();
    session.start_capture().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!stats.lock().attached);

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState(_)));

    session.load().unwrap();
    session.start_capture().unwrap();
    assert!(frames.lock().len() >= 3);
    assert_eq!(stats.lock().attaches, 2);
}

#[test]
fn test_stop_before_start_is_noop() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.stop_capture();
    assert_eq!(session.state(), SessionState::Uninitialized);

    session.load().unwrap();
    session.stop_capture();
    assert_eq!(session.state(), SessionState::Loaded);
}

#[test]
fn test_stop_after_load_cancels_next_start() {
    let session = session_with(MockGrabber::with_monitors(1));
    let frames = record_frames(&session, usize::MAX);

    session.load().unwrap();
    session.stop_capture();
    session.start_capture().unwrap();

    assert_eq!(session.state(), SessionState::Stopped);
    assert!(frames.lock().is_empty());
}

#[test]
fn test_load_clears_earlier_stop() {
    let session = session_with(MockGrabber::with_monitors(1));
    session.set_refresh_rate(0).unwrap();
    let frames = record_frames(&session, 2);

    session.load().unwrap();
    session.stop_capture();
    session.load().unwrap();
    session.start_capture().unwrap();

    assert_eq!(lengths(&frames).len(), 2);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_stop_racing_start_is_not_lost() {
    for _ in 0..20 {
        let session = Arc::new(session_with(MockGrabber::new(vec![monitor(0, 64, 64)])));
        session.set_refresh_rate(0).unwrap();
        session.on_frame(|_, _| {}).unwrap();
        session.load().unwrap();

        let runner = session.clone();
        let worker = thread::spawn(move || runner.start_capture());
        session.stop_capture();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "start_capture ignored the stop");
            thread::sleep(Duration::from_millis(1));
        }
        worker.join().unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }
}

#[test]
fn test_pinned_backend_rejects_other_backend() {
    let session = session_with(MockGrabber::with_monitors(1));
    let errors = record_errors(&session);
    let before = session.config();

    let err = session
        .configure(CaptureConfig::default().with_backend(BackendKind::Hardware))
        .unwrap_err();
    assert!(matches!(err, CaptureError::Config(_)));
    assert_eq!(errors.lock()[0].1, -1);
    assert_eq!(session.config(), before);

    session
        .configure(CaptureConfig::default().with_backend(BackendKind::Software))
        .unwrap();
    session.load().unwrap();
    assert_eq!(session.state(), SessionState::Loaded);
}

#[test]
fn test_load_without_sources_fails() {
    let session = session_with(MockGrabber::new(Vec::new()));
    let errors = record_errors(&session);

    let err = session.load().unwrap_err();
    assert!(matches!(err, CaptureError::NoSourcesFound));
    assert_eq!(errors.lock()[0].1, -3);
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let session = session_with(MockGrabber::with_monitors(1));
    let before = session.config();

    assert!(session.set_resolution(641, 480).is_err());
    assert!(session.set_resolution(1280, 0).is_err());
    assert!(session.set_refresh_rate(1000).is_err());
    assert_eq!(session.config(), before);
}

#[test]
fn test_configure_rejected_while_capturing() {
    let session = Arc::new(session_with(MockGrabber::new(vec![monitor(0, 64, 64)])));
    session.set_refresh_rate(0).unwrap();
    let rejected = Arc::new(Mutex::new(None));
    {
        let inner = session.clone();
        let rejected = rejected.clone();
        session
            .on_frame(move |_, _| {
                *rejected.lock() = Some(inner.set_refresh_rate(30).is_err());
                inner.stop_capture();
            })
            .unwrap();
    }

    session.load().unwrap();
    session.start_capture().unwrap();

    assert_eq!(*rejected.lock(), Some(true));
    assert_eq!(session.config().refresh_rate, 0);
}

#[test]
fn test_disconnect_mid_capture_ends_with_error() {
    let grabber = MockGrabber::new(vec![monitor(0, 64, 64)]).fail_after(3);
    let stats = grabber.stats();
    let session = session_with(grabber);
    session.set_refresh_rate(0).unwrap();
    let errors = record_errors(&session);
    session.on_frame(|_, _| {}).unwrap();

    session.load().unwrap();
    let err = session.start_capture().unwrap_err();

    assert!(matches!(err, CaptureError::Acquisition(_)));
    assert_eq!(errors.lock().last().map(|(_, code)| *code), Some(-6));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.stats().frames_delivered, 3);
    assert!(!stats.lock().attached);
}

#[test]
fn test_stop_handle_reports_activity() {
    let session = Arc::new(session_with(MockGrabber::new(vec![monitor(0, 64, 64)])));
    session.set_refresh_rate(100).unwrap();
    session.on_frame(|_, _| {}).unwrap();
    session.load().unwrap();
    let handle = session.stop_handle();
    assert!(!handle.is_active());

    let runner = {
        let session = session.clone();
        thread::spawn(move || session.start_capture())
    };
    while session.state() != SessionState::Capturing {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(handle.is_active());

    handle.stop();
    runner.join().unwrap().unwrap();
    assert!(!handle.is_active());
}

#[test]
fn test_drop_releases_backend() {
    let grabber = MockGrabber::with_monitors(1);
    let stats = grabber.stats();
    let session = session_with(grabber);
    session.load().unwrap();
    drop(session);

    assert_eq!(stats.lock().disconnects, 1);
}
