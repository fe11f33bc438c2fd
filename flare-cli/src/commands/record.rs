//! Record command - capture a source into a file

use anyhow::{anyhow, Context, Result};
use clap::Args;
use flare_core::config::ConfigFile;
use flare_core::{
    BackendKind, CaptureConfig, CaptureError, CaptureSession, EventLog, HistoryAction, JsonLinesLog, Status,
    TracingLog,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::signal;
use tracing::{error, info, warn};

/// Output file shared with the frame callback
///
/// The first write error is kept and every later frame is dropped.
struct OutputSink<W: Write> {
    writer: Mutex<W>,
    error: Mutex<Option<std::io::Error>>,
}

impl<W: Write> OutputSink<W> {
    fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            error: Mutex::new(None),
        }
    }

    /// Append one frame; false once writing has failed
    fn write(&self, data: &[u8]) -> bool {
        let mut error = self.error.lock();
        if error.is_some() {
            return false;
        }
        match self.writer.lock().write_all(data) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write frame: {}", e);
                *error = Some(e);
                false
            }
        }
    }

    /// Flush and report the first write error, if any
    fn finish(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.lock().take() {
            return Err(e);
        }
        self.writer.lock().flush()
    }
}

/// Arguments for the record command
#[derive(Args)]
pub struct RecordArgs {
    /// Source name to capture (see 'flare list'); defaults to the first
    #[arg(short, long)]
    source: Option<String>,

    /// Output preset (720p30, 720p60, 1080p30, 1080p60, 1440p60, 4k30, 4k60)
    #[arg(short, long)]
    preset: Option<String>,

    /// Output size as WIDTHxHEIGHT (overrides the preset size)
    #[arg(long)]
    size: Option<String>,

    /// Frames per second, 0 for uncapped (overrides the preset rate)
    #[arg(short, long)]
    fps: Option<u32>,

    /// Raw pixel format for the software backend (yuv420p, yuv444p, nv12, rgb, ...)
    #[arg(long)]
    format: Option<String>,

    /// Backend (auto, software, hardware)
    #[arg(short, long)]
    backend: Option<String>,

    /// Video codec for the hardware backend (h264, hevc, av1)
    #[arg(short, long)]
    codec: Option<String>,

    /// Encoder quality preset (fast, medium, slow, quality)
    #[arg(short, long)]
    quality: Option<String>,

    /// Bitrate in kbps (0 = auto)
    #[arg(long)]
    bitrate: Option<u32>,

    /// Output file (default: <output dir>/flare-<timestamp>.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Do not append to the history log
    #[arg(long)]
    no_history: bool,
}

impl RecordArgs {
    /// Apply command line overrides on top of the config file
    fn apply(&self, file: &mut ConfigFile) -> Result<()> {
        if let Some(preset) = &self.preset {
            file.capture.preset = preset.clone();
        }
        if let Some(size) = &self.size {
            let (width, height) = parse_size(size)?;
            file.capture.preset.clear();
            file.capture.width = width;
            file.capture.height = height;
        }
        if let Some(fps) = self.fps {
            file.capture.fps = fps;
        }
        if let Some(format) = &self.format {
            file.capture.pixel_format = format.clone();
        }
        if let Some(backend) = &self.backend {
            file.capture.backend = backend.clone();
        }
        if let Some(source) = &self.source {
            file.capture.source = source.clone();
        }
        if let Some(codec) = &self.codec {
            file.encoder.codec = codec.clone();
        }
        if let Some(quality) = &self.quality {
            file.encoder.quality = quality.clone();
        }
        if let Some(bitrate) = self.bitrate {
            file.encoder.bitrate = bitrate;
        }
        Ok(())
    }
}

fn parse_size(size: &str) -> Result<(u32, u32)> {
    let (width, height) = size
        .to_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| anyhow!("Invalid size '{}', expected WIDTHxHEIGHT", size))?;
    Ok((
        width.parse().with_context(|| format!("Invalid width in '{}'", size))?,
        height.parse().with_context(|| format!("Invalid height in '{}'", size))?,
    ))
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn open_history(enabled: bool) -> Arc<dyn EventLog> {
    if !enabled {
        return Arc::new(TracingLog);
    }
    match JsonLinesLog::default_path().map(JsonLinesLog::open) {
        Some(Ok(log)) => {
            info!("History log: {}", log.path().display());
            Arc::new(log)
        }
        Some(Err(e)) => {
            warn!("History log unavailable, logging only: {}", e);
            Arc::new(TracingLog)
        }
        None => Arc::new(TracingLog),
    }
}

fn output_path(file: &ConfigFile, config: &CaptureConfig, kind: BackendKind) -> PathBuf {
    let extension = match kind {
        BackendKind::Hardware => config.codec.file_extension(),
        _ => config.pixel_format.name(),
    };
    file.output_dir()
        .join(format!("flare-{}.{}", unix_secs(), extension))
}

/// Capture the selected source into a file until Ctrl+C or the duration ends
pub async fn record(args: RecordArgs) -> Result<()> {
    let app_started = Instant::now();
    let mut file = ConfigFile::load_or_default();
    args.apply(&mut file)?;
    let config = file.to_capture_config()?;

    let history = open_history(file.output.history && !args.no_history);
    if let Err(e) = history.history(HistoryAction::OpenApp, 0) {
        warn!("Failed to write history: {}", e);
    }

    let result = run(&args, &file, config, history.clone()).await;

    if let Err(e) = &result {
        let code = e.downcast_ref::<CaptureError>().map_or(-1, CaptureError::code);
        if let Err(log_err) = history.log(Status::Error, &format!("{:#}", e), code) {
            warn!("Failed to write history: {}", log_err);
        }
    }
    if let Err(e) = history.history(HistoryAction::CloseApp, app_started.elapsed().as_secs()) {
        warn!("Failed to write history: {}", e);
    }
    result
}

async fn run(
    args: &RecordArgs,
    file: &ConfigFile,
    config: CaptureConfig,
    history: Arc<dyn EventLog>,
) -> Result<()> {
    println!("Flare - Recording\n");

    let session = Arc::new(CaptureSession::new());
    session.configure(config.clone())?;

    let sources = session
        .list_sources()
        .context("Failed to enumerate capture sources")?;
    if let Some(name) = file.source() {
        session
            .select_source(name)
            .with_context(|| format!("Available sources: {}", sources.join(", ")))?;
    }
    let source = session
        .selected_source()
        .ok_or_else(|| anyhow!("No capture source selected"))?;
    let kind = session.backend_kind().unwrap_or(BackendKind::Software);

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| output_path(file, &config, kind));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let sink = Arc::new(OutputSink::new(BufWriter::new(
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
    )));

    let (width, height) = config.output_size(source.geometry.width, source.geometry.height);
    println!("Configuration:");
    println!("  Source:      {}", source);
    println!("  Backend:     {}", kind);
    println!("  Resolution:  {}x{}", width, height);
    match config.refresh_rate {
        0 => println!("  Framerate:   uncapped"),
        fps => println!("  Framerate:   {} fps", fps),
    }
    match kind {
        BackendKind::Hardware => println!(
            "  Codec:       {} ({} kbps)",
            config.codec,
            config.effective_bitrate(width, height)
        ),
        _ => println!("  Format:      {}", config.pixel_format),
    }
    println!("  Output:      {}", path.display());
    println!();

    {
        let sink = sink.clone();
        let stop = session.stop_handle();
        session.on_frame(move |data, _len| {
            if !sink.write(data) {
                stop.stop();
            }
        })?;
    }
    let errors = history.clone();
    session.on_error(move |message, code| {
        let status = Status::for_code(code);
        match status {
            Status::Warning => warn!("{} (code {})", message, code),
            _ => error!("{} (code {})", message, code),
        }
        if let Err(e) = errors.log(status, message, code) {
            warn!("Failed to write history: {}", e);
        }
    })?;

    session.load()?;

    println!("Recording... press Ctrl+C to stop\n");
    let started = Instant::now();
    let stop = session.stop_handle();
    let mut capture = {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.start_capture())
    };

    let limit = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        joined = &mut capture => joined,
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            println!("\nReceived interrupt signal...");
            stop.stop();
            capture.await
        }
        _ = limit => {
            info!("Recording duration reached");
            stop.stop();
            capture.await
        }
    };
    let elapsed = started.elapsed();
    let capture_result = outcome.context("Capture thread panicked")?;
    if let Err(e) = history.history(HistoryAction::Record, elapsed.as_secs()) {
        warn!("Failed to write history: {}", e);
    }

    sink.finish()
        .with_context(|| format!("Failed writing {}", path.display()))?;

    let stats = session.stats();
    println!("Recording stopped.");
    println!("  Duration:    {:.1}s", elapsed.as_secs_f64());
    println!("  Frames:      {} ({} skipped)", stats.frames_delivered, stats.frames_skipped);
    println!("  Written:     {:.1} MB", stats.bytes_delivered as f64 / 1_048_576.0);
    println!("  Average:     {}", stats.format_line());
    println!("  Output:      {}", path.display());

    capture_result.context("Capture failed")?;
    Ok(())
}
