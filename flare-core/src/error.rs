//! Error types for Flare
//!
//! Every failure in the capture pipeline is a [`CaptureError`]. Errors carry a
//! stable numeric code so they can be forwarded through the `(message, code)`
//! error callback without losing their category.

use thiserror::Error;

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Main error type for Flare operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Invalid configuration or an operation that would change frozen state
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested source name is not in the catalog
    #[error("Selected source does not exist: {0}")]
    SourceNotFound(String),

    /// The platform reported zero usable sources
    #[error("No capture sources found")]
    NoSourcesFound,

    /// Operation is not valid in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Connection, shared memory or session allocation failed
    #[error("Resource error: {0}")]
    Resource(String),

    /// A platform or vendor call failed inside the capture loop
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// Pixel format conversion or scaling failed
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The installed encoder does not support the requested codec
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Encoder error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Vendor library returned a failure status
    #[error("Vendor error (status {status}): {message}")]
    Vendor { status: i32, message: String },

    /// Hardware session was invalidated and rebuilt; capture continues
    #[error("Capture session recreated: {0}")]
    SessionRecreated(String),

    /// Consumer worker failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a resource error
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Create an acquisition error
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }

    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a vendor status error
    pub fn vendor(status: i32, msg: impl Into<String>) -> Self {
        Self::Vendor {
            status,
            message: msg.into(),
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &CaptureError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Numeric code passed to error callbacks
    ///
    /// Codes are negative like the platform status codes they replace and are
    /// never zero. Context wrappers report the code of the wrapped error.
    pub fn code(&self) -> i32 {
        match self.root() {
            Self::Config(_) => -1,
            Self::SourceNotFound(_) => -2,
            Self::NoSourcesFound => -3,
            Self::InvalidState(_) => -4,
            Self::Resource(_) => -5,
            Self::Acquisition(_) => -6,
            Self::Conversion(_) => -7,
            Self::UnsupportedCodec(_) => -8,
            Self::Encoder(_) => -9,
            Self::Vendor { .. } => -10,
            Self::SessionRecreated(_) => -11,
            Self::Delivery(_) => -12,
            Self::Unsupported(_) => -13,
            Self::Io(_) => -14,
            Self::WithContext { .. } => -1,
        }
    }

    /// Whether this is a warning that does not stop capture
    pub fn is_warning(&self) -> bool {
        matches!(self.root(), Self::SessionRecreated(_))
    }

    /// Whether the user can fix this without code changes
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::Config(_)
                | Self::SourceNotFound(_)
                | Self::NoSourcesFound
                | Self::UnsupportedCodec(_)
                | Self::SessionRecreated(_)
        )
    }

    /// A short hint for the user, if one applies
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::Config(_) => Some("Check ~/.config/flare/config.toml and the command arguments"),
            Self::SourceNotFound(_) => Some("Run 'flare list' to see available sources"),
            Self::NoSourcesFound => {
                Some("Make sure an X11 display is reachable (DISPLAY) and a window manager is running")
            }
            Self::Resource(_) => {
                Some("Check that the X server supports MIT-SHM and that DISPLAY is set")
            }
            Self::UnsupportedCodec(_) => {
                Some("Your NVIDIA GPU or FFmpeg build does not support this codec; try --codec h264")
            }
            Self::Encoder(_) | Self::Vendor { .. } => {
                Some("Make sure NVIDIA drivers are installed and FFmpeg has NVENC support")
            }
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// Conversions from external error types

impl From<x11rb::errors::ConnectError> for CaptureError {
    fn from(err: x11rb::errors::ConnectError) -> Self {
        Self::Resource(format!("X11 connection failed: {}", err))
    }
}

impl From<x11rb::errors::ConnectionError> for CaptureError {
    fn from(err: x11rb::errors::ConnectionError) -> Self {
        Self::Acquisition(format!("X11 connection lost: {}", err))
    }
}

impl From<x11rb::errors::ReplyError> for CaptureError {
    fn from(err: x11rb::errors::ReplyError) -> Self {
        Self::Acquisition(format!("X11 request failed: {}", err))
    }
}

impl From<x11rb::errors::ReplyOrIdError> for CaptureError {
    fn from(err: x11rb::errors::ReplyOrIdError) -> Self {
        Self::Acquisition(format!("X11 request failed: {}", err))
    }
}

impl From<ffmpeg_next::Error> for CaptureError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Encoder(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_nonzero() {
        let errors = [
            CaptureError::config("x"),
            CaptureError::SourceNotFound("Monitor-9".into()),
            CaptureError::NoSourcesFound,
            CaptureError::resource("x"),
            CaptureError::acquisition("x"),
            CaptureError::vendor(7, "x"),
        ];
        for err in &errors {
            assert_ne!(err.code(), 0, "{}", err);
        }
    }

    #[test]
    fn test_context_keeps_code() {
        let err = CaptureError::NoSourcesFound.with_context("Loading session");
        assert_eq!(err.code(), CaptureError::NoSourcesFound.code());
        assert!(err.to_string().contains("Loading session"));
    }

    #[test]
    fn test_recreated_is_warning() {
        assert!(CaptureError::SessionRecreated("mode change".into()).is_warning());
        assert!(!CaptureError::acquisition("lost").is_warning());
    }
}
