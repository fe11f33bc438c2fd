//! Integration tests for the hardware capture+encode path
//!
//! Most tests drive the session over a scripted device. Tests that need a
//! real NVIDIA GPU are ignored by default:
//! `cargo test --features nvenc -- --ignored`

mod mocks;

use flare_core::backend::{GpuGrab, HardwareBackend, MAX_RECREATE_ATTEMPTS};
use flare_core::{BackendKind, CaptureConfig, CaptureError, CaptureSession, Codec, SessionState};
use mocks::{count_calls, CallLog, MockDevice};
use parking_lot::Mutex;
use std::sync::Arc;

fn session_with(device: MockDevice) -> (CaptureSession, CallLog) {
    let calls = device.calls.clone();
    let session = CaptureSession::with_backend(Box::new(HardwareBackend::new(device)));
    session
        .configure(CaptureConfig::native().with_refresh_rate(0))
        .unwrap();
    (session, calls)
}

fn record_errors(session: &CaptureSession) -> Arc<Mutex<Vec<i32>>> {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = codes.clone();
    session
        .on_error(move |_, code| sink.lock().push(code))
        .unwrap();
    codes
}

fn record_frames(session: &CaptureSession, limit: usize) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let stop = session.stop_handle();
    session
        .on_frame(move |data, _| {
            let mut frames = sink.lock();
            frames.push(data.to_vec());
            if frames.len() >= limit {
                stop.stop();
            }
        })
        .unwrap();
    frames
}

#[test]
fn test_delivers_encoded_bitstream() {
    let device = MockDevice::new();
    let expected = device.output.clone();
    let (session, _) = session_with(device);
    let frames = record_frames(&session, 4);

    session.load().unwrap();
    assert_eq!(session.backend_kind(), Some(BackendKind::Hardware));
    session.start_capture().unwrap();

    let frames = frames.lock();
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|frame| *frame == expected));
}

#[test]
fn test_teardown_runs_in_reverse_order() {
    let (session, calls) = session_with(MockDevice::new());
    record_frames(&session, 2);

    session.load().unwrap();
    session.start_capture().unwrap();

    let calls = calls.lock();
    let tail = &calls[calls.len() - 7..];
    assert_eq!(
        tail,
        [
            "flush",
            "destroy_bitstream",
            "unregister",
            "unregister",
            "destroy_encoder",
            "destroy_capture",
            "close_handle",
        ]
    );
}

#[test]
fn test_every_map_is_unmapped() {
    let (session, calls) = session_with(MockDevice::new());
    record_frames(&session, 5);

    session.load().unwrap();
    session.start_capture().unwrap();

    assert_eq!(count_calls(&calls, "map"), count_calls(&calls, "unmap"));
    assert_eq!(count_calls(&calls, "lock"), count_calls(&calls, "unlock"));
}

#[test]
fn test_unsupported_codec_fails_load() {
    let (session, calls) = session_with(MockDevice::new());
    let errors = record_errors(&session);
    session
        .configure(CaptureConfig::native().with_codec(Codec::Av1))
        .unwrap();

    let err = session.load().unwrap_err();
    assert!(matches!(err, CaptureError::UnsupportedCodec(_)));
    assert_eq!(*errors.lock(), vec![-8]);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(count_calls(&calls, "open_handle"), 1);
    assert_eq!(count_calls(&calls, "close_handle"), 1);
    assert_eq!(count_calls(&calls, "register"), 0);
}

#[test]
fn test_recreate_warns_and_continues() {
    let device = MockDevice::new().script([GpuGrab::Ready(0), GpuGrab::MustRecreate]);
    let (session, calls) = session_with(device);
    let errors = record_errors(&session);
    let frames = record_frames(&session, 3);

    session.load().unwrap();
    session.start_capture().unwrap();

    assert_eq!(*errors.lock(), vec![-11]);
    assert_eq!(frames.lock().len(), 3);
    assert_eq!(session.stats().frames_skipped, 1);
    assert_eq!(count_calls(&calls, "open_handle"), 2);
    assert_eq!(count_calls(&calls, "close_handle"), 2);
}

#[test]
fn test_recreate_gives_up_after_limit() {
    let attempts = MAX_RECREATE_ATTEMPTS as usize + 1;
    let device = MockDevice::new().script(std::iter::repeat_n(GpuGrab::MustRecreate, attempts));
    let (session, calls) = session_with(device);
    let errors = record_errors(&session);
    let frames = record_frames(&session, 1);

    session.load().unwrap();
    let err = session.start_capture().unwrap_err();

    assert!(matches!(err, CaptureError::Acquisition(_)));
    let mut expected = vec![-11; MAX_RECREATE_ATTEMPTS as usize];
    expected.push(-6);
    assert_eq!(*errors.lock(), expected);
    assert!(frames.lock().is_empty());
    assert_eq!(
        count_calls(&calls, "open_handle"),
        count_calls(&calls, "close_handle")
    );
}

#[test]
fn test_encode_failure_still_unmaps() {
    let mut device = MockDevice::new();
    device.fail = vec!["encode"];
    let (session, calls) = session_with(device);
    let errors = record_errors(&session);
    record_frames(&session, 1);

    session.load().unwrap();
    let err = session.start_capture().unwrap_err();

    assert_eq!(err.code(), -10);
    assert_eq!(*errors.lock(), vec![-10]);
    let calls = calls.lock();
    let encode = calls.iter().position(|c| *c == "encode").unwrap();
    assert_eq!(calls[encode + 1], "unmap");
    assert_eq!(calls.last(), Some(&"close_handle"));
}

#[test]
fn test_reload_after_stop_opens_new_session() {
    let (session, calls) = session_with(MockDevice::new());
    let frames = record_frames(&session, 2);

    session.load().unwrap();
    session.start_capture().unwrap();
    session.load().unwrap();
    session.start_capture().unwrap();

    assert!(frames.lock().len() >= 3);
    assert_eq!(count_calls(&calls, "open_handle"), 2);
    assert_eq!(count_calls(&calls, "close_handle"), 2);
}

#[test]
#[ignore = "requires an NVIDIA GPU and an X11 display"]
fn test_nvenc_device_capture() {
    use flare_core::backend::nvenc::NvencDevice;

    let device = NvencDevice::new().unwrap();
    let session = CaptureSession::with_backend(Box::new(HardwareBackend::new(device)));
    session
        .configure(CaptureConfig::native().with_resolution(1280, 720).with_refresh_rate(30))
        .unwrap();
    let frames = record_frames(&session, 30);

    session.load().unwrap();
    session.start_capture().unwrap();

    let frames = frames.lock();
    assert_eq!(frames.len(), 30);
    assert!(frames.iter().any(|frame| !frame.is_empty()));
}
