//! List sources command

use anyhow::{Context, Result};
use clap::Args;
use flare_core::config::{BackendKind, ConfigFile};
use flare_core::CaptureSession;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Print sources as JSON
    #[arg(long)]
    json: bool,

    /// Backend to enumerate with (auto, software, hardware)
    #[arg(short, long)]
    backend: Option<String>,
}

/// List available capture sources
pub async fn list(args: ListArgs) -> Result<()> {
    let mut config = ConfigFile::load_or_default().to_capture_config()?;
    if let Some(backend) = &args.backend {
        let kind: BackendKind = backend.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        config = config.with_backend(kind);
    }

    let session = CaptureSession::new();
    session.configure(config)?;
    session
        .list_sources()
        .context("Failed to enumerate capture sources")?;
    let sources = session.sources();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Flare - Available Capture Sources\n");
    println!(
        "{:<32} {:<8} {:<12} {:<22}",
        "Name", "Type", "Handle", "Geometry"
    );
    println!("{}", "-".repeat(76));

    for source in &sources {
        println!(
            "{:<32} {:<8} {:<12} {}",
            truncate(&source.name, 30),
            source.kind.to_string(),
            source.handle.to_string(),
            source.geometry
        );
    }

    if let Some(kind) = session.backend_kind() {
        println!("\n{} source(s) via {} backend", sources.len(), kind);
    }
    println!("Use 'flare record --source <NAME>' to capture one.");

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{}...", kept)
    }
}
