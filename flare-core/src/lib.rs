//! Flare Core Library
//!
//! Screen capture pipeline for X11 with optional NVIDIA hardware encoding.
//!
//! This library provides:
//! - Source enumeration (monitors and windows) with name-based selection
//! - A software backend: MIT-SHM grab plus CPU pixel format conversion and scaling
//! - A hardware backend: GPU capture and NVENC encode through FFmpeg
//! - Frame pacing and a single-worker delivery handoff to the consumer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌───────────────────┐
//! │ SourceCatalog   │───▶│ CaptureBackend   │───▶│ DeliveryDispatcher│───▶ on_frame
//! │ (monitors, wins)│    │ (grab + produce) │    │ (1 buffer, 1 wkr) │
//! └─────────────────┘    └──────────────────┘    └───────────────────┘
//! ```
//!
//! [`CaptureSession`] ties the pieces together.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod formats;
pub mod history;
pub mod metrics;
pub mod pacer;
pub mod detect;
pub mod session;
pub mod types;

pub use backend::{create_backend, CaptureBackend};
pub use config::{BackendKind, CaptureConfig, Codec, EncoderPreset, Preset, ScaleFilter};
pub use error::{CaptureError, Result};
pub use formats::PixelFormat;
pub use history::{EventLog, HistoryAction, JsonLinesLog, Status, TracingLog};
pub use metrics::CaptureStats;
pub use session::{CaptureSession, Capturer, SessionState, StopHandle};
pub use types::{CaptureSource, FrameBuffer, Geometry, SourceHandle, SourceKind};
