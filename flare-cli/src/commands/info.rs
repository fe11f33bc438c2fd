//! Info command - show system information and capabilities

use anyhow::Result;
use flare_core::backend::{nvenc, nvidia};
use flare_core::config::{BackendKind, Codec, ConfigFile, Preset};
use flare_core::env::{self, DisplayServer};
use flare_core::detect;

/// Show display server, backend availability and NVENC support
pub async fn info() -> Result<()> {
    println!("Flare - System Information\n");

    println!("System:");
    println!("  OS:          {}", env::os_name());
    let server = env::detect_display_server();
    println!("  Display:     {}", server.description());
    if let Some(note) = server.capture_note() {
        println!("  Note:        {}", note);
    }

    println!();

    // Vendor runtime
    println!("NVIDIA Runtime:");
    let runtime = nvidia::runtime();
    if runtime.cuda_devices > 0 {
        println!("  CUDA devices:  {}", runtime.cuda_devices);
    } else {
        println!("  CUDA devices:  none");
    }
    match runtime.nvenc_api {
        Some((major, minor)) => println!("  NVENC API:     {}.{}", major, minor),
        None => println!("  NVENC API:     not available"),
    }
    println!(
        "  NvFBC:         {}",
        if runtime.nvfbc_present { "installed" } else { "not installed" }
    );
    if let Some(error) = &runtime.error {
        println!("  Load error:    {}", error);
    }

    println!();

    println!("Codecs:");
    for codec in Codec::ALL {
        println!("  {:<6} {}", codec.display_name(), codec_status(codec));
    }

    println!();

    println!("Backends:");
    for backend in detect::detect_backends() {
        let icon = if backend.available { "[OK]" } else { "[--]" };
        match &backend.reason {
            Some(reason) => println!("  {} {:<9} {}", icon, backend.kind.to_string(), reason),
            None => println!("  {} {}", icon, backend.kind),
        }
    }
    match detect::resolve(BackendKind::Auto) {
        Ok(kind) => println!("  'auto' resolves to: {}", kind),
        Err(e) => println!("  'auto' cannot resolve: {}", e),
    }

    if !server.can_capture() {
        println!();
        println!("  Troubleshooting:");
        match server {
            DisplayServer::Wayland { .. } => {
                println!("    - Capture goes through X11; enable XWayland in your compositor");
            }
            _ => {
                println!("    - Set DISPLAY to a reachable X server, e.g. DISPLAY=:0");
            }
        }
    }

    println!();
    println!("Configuration:");
    let path = ConfigFile::default_path();
    println!(
        "  {} ({})",
        path.display(),
        if path.exists() { "exists" } else { "defaults" }
    );

    println!();
    println!("Supported presets:");
    for preset in [
        Preset::P720_30,
        Preset::P720_60,
        Preset::P1080_30,
        Preset::P1080_60,
        Preset::P1440_60,
        Preset::P4K_30,
        Preset::P4K_60,
    ] {
        let (width, height) = preset.resolution();
        println!(
            "  {:<8} - {}x{} @ {}fps, ~{} kbps",
            preset.to_string(),
            width,
            height,
            preset.fps(),
            preset.suggested_bitrate()
        );
    }

    Ok(())
}

fn codec_status(codec: Codec) -> &'static str {
    if nvenc::encoder_available(codec) {
        "available"
    } else {
        "not in FFmpeg"
    }
}
