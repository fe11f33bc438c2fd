//! Runtime backend selection
//!
//! Decides which [`BackendKind`] a configuration resolves to on this
//! machine. `Auto` prefers the hardware path when FFmpeg has an NVENC
//! encoder and the NVIDIA driver libraries load, and falls back to software.

use serde::Serialize;
use tracing::debug;

use crate::backend::{nvenc, nvidia};
use crate::config::{BackendKind, Codec};
use crate::env;
use crate::error::{CaptureError, Result};

/// Availability of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub available: bool,
    /// Why the backend is unavailable
    pub reason: Option<String>,
}

/// Check the software path
pub fn software() -> BackendStatus {
    let server = env::detect_display_server();
    BackendStatus {
        kind: BackendKind::Software,
        available: server.can_capture(),
        reason: (!server.can_capture()).then(|| {
            server
                .capture_note()
                .unwrap_or("No X11 display")
                .to_string()
        }),
    }
}

/// Check the hardware path
pub fn hardware() -> BackendStatus {
    let runtime = nvidia::runtime();
    let reason = if !runtime.can_encode() {
        Some(
            runtime
                .error
                .clone()
                .unwrap_or_else(|| "No CUDA device found".to_string()),
        )
    } else if !Codec::ALL.iter().any(|codec| nvenc::encoder_available(*codec)) {
        Some("FFmpeg was built without NVENC encoders".to_string())
    } else {
        None
    };
    BackendStatus {
        kind: BackendKind::Hardware,
        available: reason.is_none(),
        reason,
    }
}

/// Check every backend
pub fn detect_backends() -> Vec<BackendStatus> {
    vec![hardware(), software()]
}

/// Concrete backend for a requested kind
///
/// An explicit `Hardware` request on a machine without it is an error rather
/// than a silent fallback.
pub fn resolve(requested: BackendKind) -> Result<BackendKind> {
    resolve_with(requested, &hardware())
}

fn resolve_with(requested: BackendKind, hardware: &BackendStatus) -> Result<BackendKind> {
    match requested {
        BackendKind::Auto if hardware.available => Ok(BackendKind::Hardware),
        BackendKind::Auto => {
            debug!(
                "Hardware backend unavailable ({}), using software",
                hardware.reason.as_deref().unwrap_or("unknown")
            );
            Ok(BackendKind::Software)
        }
        BackendKind::Hardware if !hardware.available => Err(CaptureError::Unsupported(format!(
            "Hardware capture unavailable: {}",
            hardware.reason.as_deref().unwrap_or("unknown")
        ))),
        other => Ok(other),
    }
}
