//! Integration tests for configuration system

use flare_core::config::{
    sample_config, BackendKind, CaptureConfig, Codec, ConfigFile, EncoderPreset, Preset,
    ScaleFilter,
};
use flare_core::{CaptureError, PixelFormat};
use tempfile::TempDir;

#[test]
fn test_preset_resolution() {
    assert_eq!(Preset::P720_30.resolution(), (1280, 720));
    assert_eq!(Preset::P720_60.resolution(), (1280, 720));
    assert_eq!(Preset::P1080_30.resolution(), (1920, 1080));
    assert_eq!(Preset::P1080_60.resolution(), (1920, 1080));
    assert_eq!(Preset::P1440_60.resolution(), (2560, 1440));
    assert_eq!(Preset::P4K_60.resolution(), (3840, 2160));
}

#[test]
fn test_preset_fps() {
    assert_eq!(Preset::P720_30.fps(), 30);
    assert_eq!(Preset::P1080_60.fps(), 60);
    assert_eq!(Preset::P4K_30.fps(), 30);
}

#[test]
fn test_preset_from_string() {
    assert_eq!("720p30".parse::<Preset>().ok(), Some(Preset::P720_30));
    assert_eq!("1080P60".parse::<Preset>().ok(), Some(Preset::P1080_60));
    assert_eq!("2160p30".parse::<Preset>().ok(), Some(Preset::P4K_30));
    assert!("invalid".parse::<Preset>().is_err());
}

#[test]
fn test_codec_parsing() {
    assert_eq!("h264".parse::<Codec>().ok(), Some(Codec::H264));
    assert_eq!("H265".parse::<Codec>().ok(), Some(Codec::Hevc));
    assert_eq!("av1".parse::<Codec>().ok(), Some(Codec::Av1));
    assert!("invalid".parse::<Codec>().is_err());
    assert_eq!(Codec::Av1.nvenc_encoder(), "av1_nvenc");
}

#[test]
fn test_encoder_preset_nvenc() {
    assert_eq!(EncoderPreset::Fast.nvenc_preset(), "p1");
    assert_eq!(EncoderPreset::Medium.nvenc_preset(), "p4");
    assert_eq!(EncoderPreset::Slow.nvenc_preset(), "p6");
    assert_eq!(EncoderPreset::Quality.nvenc_preset(), "p7");
}

#[test]
fn test_capture_config_builder() {
    let config = CaptureConfig::native()
        .with_preset(Preset::P720_60)
        .with_pixel_format(PixelFormat::Yuv444p)
        .with_scale_filter(ScaleFilter::Box)
        .with_backend(BackendKind::Software)
        .with_codec(Codec::Hevc)
        .with_bitrate(5000)
        .with_encoder_preset(EncoderPreset::Fast);

    assert_eq!((config.target_width, config.target_height), (1280, 720));
    assert_eq!(config.refresh_rate, 60);
    assert_eq!(config.pixel_format, PixelFormat::Yuv444p);
    assert_eq!(config.scale_filter, ScaleFilter::Box);
    assert_eq!(config.backend, BackendKind::Software);
    assert_eq!(config.codec, Codec::Hevc);
    assert_eq!(config.bitrate, 5000);
    assert_eq!(config.encoder_preset, EncoderPreset::Fast);
}

#[test]
fn test_output_size() {
    let native = CaptureConfig::native();
    assert_eq!(native.output_size(1920, 1080), (1920, 1080));
    // 4:2:0 rounds odd native sizes down
    assert_eq!(native.output_size(801, 601), (800, 600));

    let rgb = native.clone().with_pixel_format(PixelFormat::Rgb);
    assert_eq!(rgb.output_size(801, 601), (801, 601));

    let scaled = CaptureConfig::native().with_resolution(1280, 720);
    assert_eq!(scaled.output_size(1920, 1080), (1280, 720));
}

#[test]
fn test_frame_interval() {
    let config = CaptureConfig::native().with_refresh_rate(50);
    assert_eq!(config.frame_interval().unwrap().as_millis(), 20);
    assert!(config.with_refresh_rate(0).frame_interval().is_none());
}

#[test]
fn test_effective_bitrate() {
    let config = CaptureConfig::native().with_bitrate(10000);
    assert_eq!(config.effective_bitrate(1920, 1080), 10000);

    let auto = CaptureConfig::native();
    let hd = auto.effective_bitrate(1920, 1080);
    assert!(hd > auto.effective_bitrate(1280, 720));
    assert_eq!(auto.effective_bitrate(16, 16), 1000);
}

#[test]
fn test_capture_config_validation() {
    assert!(CaptureConfig::native().validate().is_ok());
    assert!(CaptureConfig::native().with_refresh_rate(0).validate().is_ok());

    let half = CaptureConfig::native().with_resolution(1280, 0);
    assert!(matches!(half.validate(), Err(CaptureError::Config(_))));

    let huge = CaptureConfig::native().with_resolution(15360, 8640);
    assert!(huge.validate().is_err());

    let odd = CaptureConfig::native().with_resolution(1279, 720);
    assert!(odd.validate().is_err());
    assert!(odd.with_pixel_format(PixelFormat::Rgba).validate().is_ok());

    let fast = CaptureConfig::native().with_refresh_rate(1000);
    assert!(fast.validate().is_err());
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flare").join("config.toml");

    let mut file = ConfigFile::default();
    file.capture.preset = "1440p60".into();
    file.capture.source = "Monitor-1".into();
    file.encoder.codec = "hevc".into();
    file.output.history = false;
    file.save_to(path.clone()).unwrap();

    let loaded = ConfigFile::load_from(path).unwrap();
    assert_eq!(loaded, file);
    assert_eq!(loaded.source(), Some("Monitor-1"));

    let config = loaded.to_capture_config().unwrap();
    assert_eq!((config.target_width, config.target_height), (2560, 1440));
    assert_eq!(config.codec, Codec::Hevc);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let loaded = ConfigFile::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(loaded, ConfigFile::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[capture]\nfps = 30\nbackend = \"software\"\n").unwrap();

    let loaded = ConfigFile::load_from(path).unwrap();
    assert_eq!(loaded.capture.fps, 30);
    assert_eq!(loaded.capture.pixel_format, "yuv420p");
    assert_eq!(loaded.encoder.codec, "h264");

    let config = loaded.to_capture_config().unwrap();
    assert_eq!(config.refresh_rate, 30);
    assert_eq!(config.backend, BackendKind::Software);
    assert!(config.is_native());
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[capture\nfps = ").unwrap();

    let err = ConfigFile::load_from(path).unwrap_err();
    assert_eq!(err.code(), -1);
}

#[test]
fn test_invalid_values_rejected() {
    let mut file = ConfigFile::default();
    file.capture.pixel_format = "yuv422p".into();
    assert!(file.to_capture_config().is_err());

    let mut file = ConfigFile::default();
    file.capture.width = 1279;
    file.capture.height = 720;
    assert!(file.to_capture_config().is_err());
}

#[test]
fn test_sample_config_is_default() {
    let parsed: ConfigFile = toml::from_str(&sample_config()).unwrap();
    assert_eq!(parsed, ConfigFile::default());
    assert!(parsed.to_capture_config().is_ok());
}
